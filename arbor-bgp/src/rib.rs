//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use arbor_utils::protocol::Protocol;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::packet::attribute::Attrs;
use crate::packet::consts::COMM_NO_ADVERTISE;

// Default value for the LOCAL_PREF attribute.
pub const DFLT_LOCAL_PREF: u32 = 100;

// BGP routing table: Adj-RIB-In, Loc-RIB and Adj-RIB-Out per destination.
#[derive(Debug, Default)]
pub struct Rib {
    pub destinations: BTreeMap<IpNetwork, Destination>,
}

#[derive(Debug, Default)]
pub struct Destination {
    // Locally originated route (network statements and redistribution).
    pub local: Option<LocalRoute>,
    // Per-peer Adj-RIB-In and Adj-RIB-Out.
    pub adj_rib: BTreeMap<IpAddr, AdjRib>,
    // Loc-RIB entry: the selected best path.
    pub best: Option<BestPath>,
}

#[derive(Debug, Default)]
pub struct AdjRib {
    pub in_: Option<Route>,
    // Attributes last advertised to the peer.
    pub out: Option<Attrs>,
}

// Route learned from a peer.
#[derive(Clone, Debug)]
pub struct Route {
    pub attrs: Attrs,
    pub route_type: RouteType,
    pub peer_id: Ipv4Addr,
    pub peer_addr: IpAddr,
    pub last_modified: Instant,
    pub igp_cost: Option<u32>,
    pub ineligible: Option<RouteIneligibleReason>,
    // Kept across a graceful restart until the peer resynchronizes.
    pub stale: bool,
}

// Locally originated route.
#[derive(Clone, Debug)]
pub struct LocalRoute {
    pub attrs: Attrs,
    pub origin_protocol: Protocol,
}

// Selected best path for one destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BestPath {
    pub source: BestPathSource,
    pub attrs: Attrs,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BestPathSource {
    Local,
    Neighbor {
        route_type: RouteType,
        peer_id: Ipv4Addr,
        peer_addr: IpAddr,
    },
}

// BGP route types, ordered so that eBGP routes are preferred.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteType {
    Internal,
    External,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteIneligibleReason {
    AsLoop,
    Originator,
    ClusterLoop,
    RpkiInvalid,
    Damped,
}

// Reason a route lost the path selection, recorded for observability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteRejectReason {
    LocalPrefLower,
    NotLocallyOriginated,
    AsPathLonger,
    OriginTypeHigher,
    MedHigher,
    PreferExternal,
    NexthopCostHigher,
    NewerRoute,
    HigherRouterId,
    HigherPeerAddress,
}

// ===== impl Rib =====

impl Rib {
    pub(crate) fn destination(&mut self, prefix: IpNetwork) -> &mut Destination {
        self.destinations.entry(prefix).or_default()
    }

    // Removes empty destination entries.
    pub(crate) fn gc(&mut self, prefix: &IpNetwork) {
        if let Some(dest) = self.destinations.get(prefix)
            && dest.local.is_none()
            && dest.best.is_none()
            && dest
                .adj_rib
                .values()
                .all(|adj_rib| adj_rib.in_.is_none() && adj_rib.out.is_none())
        {
            self.destinations.remove(prefix);
        }
    }
}

// ===== impl Destination =====

impl Destination {
    // Runs the best-path decision process over the eligible Adj-RIB-In
    // entries and the local route. Returns the new best path, if any.
    pub(crate) fn best_path(&self) -> Option<BestPath> {
        let mut best: Option<Candidate<'_>> = None;

        // Locally originated route.
        if let Some(local) = &self.local {
            best = Some(Candidate {
                attrs: &local.attrs,
                local: true,
                route_type: RouteType::External,
                igp_cost: None,
                last_modified: None,
                peer_id: None,
                peer_addr: None,
            });
        }

        for (peer_addr, adj_rib) in &self.adj_rib {
            let Some(route) = &adj_rib.in_ else {
                continue;
            };
            if route.ineligible.is_some() {
                continue;
            }
            // NO_ADVERTISE routes stay usable locally; the export path
            // filters them out.
            let candidate = Candidate {
                attrs: &route.attrs,
                local: false,
                route_type: route.route_type,
                igp_cost: route.igp_cost,
                last_modified: Some(route.last_modified),
                peer_id: Some(route.peer_id),
                peer_addr: Some(*peer_addr),
            };
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    match candidate_compare(&candidate, &current) {
                        Ordering::Greater => Some(candidate),
                        _ => Some(current),
                    }
                }
            };
        }

        best.map(|candidate| BestPath {
            source: match candidate.local {
                true => BestPathSource::Local,
                false => BestPathSource::Neighbor {
                    route_type: candidate.route_type,
                    peer_id: candidate.peer_id.unwrap(),
                    peer_addr: candidate.peer_addr.unwrap(),
                },
            },
            attrs: candidate.attrs.clone(),
        })
    }
}

// Best-path candidate.
struct Candidate<'a> {
    attrs: &'a Attrs,
    local: bool,
    route_type: RouteType,
    igp_cost: Option<u32>,
    last_modified: Option<Instant>,
    peer_id: Option<Ipv4Addr>,
    peer_addr: Option<IpAddr>,
}

// The decision process: returns `Greater` when `a` is preferred over `b`.
//
// The tie-breakers run in the standard order: LOCAL_PREF, locally
// originated, AS_PATH length, ORIGIN, MED (same neighboring AS only),
// eBGP over iBGP, IGP cost to the next-hop, route age, peer router-id and
// finally peer address.
fn candidate_compare(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    // 1. Prefer higher LOCAL_PREF.
    let a_lp = a.attrs.base.local_pref.unwrap_or(DFLT_LOCAL_PREF);
    let b_lp = b.attrs.base.local_pref.unwrap_or(DFLT_LOCAL_PREF);
    let cmp = a_lp.cmp(&b_lp);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 2. Prefer locally originated routes.
    let cmp = a.local.cmp(&b.local);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 3. Prefer the shorter AS_PATH.
    let a_len = a.attrs.base.as_path.path_length();
    let b_len = b.attrs.base.as_path.path_length();
    let cmp = b_len.cmp(&a_len);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 4. Prefer the lower ORIGIN (IGP < EGP < Incomplete).
    let cmp = (b.attrs.base.origin as u8).cmp(&(a.attrs.base.origin as u8));
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 5. Prefer the lower MED, comparable only between routes from the
    // same neighboring AS.
    let a_nbr_as = a.attrs.base.as_path.first();
    let b_nbr_as = b.attrs.base.as_path.first();
    if a_nbr_as == b_nbr_as {
        let a_med = a.attrs.base.med.unwrap_or(0);
        let b_med = b.attrs.base.med.unwrap_or(0);
        let cmp = b_med.cmp(&a_med);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    // 6. Prefer eBGP over iBGP.
    let cmp = a.route_type.cmp(&b.route_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 7. Prefer the lower IGP metric to the next-hop.
    let a_cost = a.igp_cost.unwrap_or(u32::MAX);
    let b_cost = b.igp_cost.unwrap_or(u32::MAX);
    let cmp = b_cost.cmp(&a_cost);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // 8. Prefer the oldest established route.
    if let (Some(a_time), Some(b_time)) = (a.last_modified, b.last_modified) {
        let cmp = b_time.cmp(&a_time);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    // 9. Prefer the lowest peer router-id, then the lowest peer address.
    let cmp = match (b.peer_id, a.peer_id) {
        (Some(b_id), Some(a_id)) => b_id.cmp(&a_id),
        _ => Ordering::Equal,
    };
    if cmp != Ordering::Equal {
        return cmp;
    }
    match (b.peer_addr, a.peer_addr) {
        (Some(b_addr), Some(a_addr)) => b_addr.cmp(&a_addr),
        _ => Ordering::Equal,
    }
}

// Returns whether the given attributes forbid any readvertisement.
pub(crate) fn no_advertise(attrs: &Attrs) -> bool {
    attrs
        .comm
        .as_ref()
        .is_some_and(|comm| comm.contains(&COMM_NO_ADVERTISE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::attribute::AsPath;
    use crate::packet::consts::Origin;

    fn route(
        peer_id: Ipv4Addr,
        peer_addr: IpAddr,
        route_type: RouteType,
        attrs: Attrs,
    ) -> Route {
        Route {
            attrs,
            route_type,
            peer_id,
            peer_addr,
            last_modified: Instant::now(),
            igp_cost: None,
            ineligible: None,
            stale: false,
        }
    }

    fn attrs(as_path: &[u32]) -> Attrs {
        let mut attrs = Attrs::default();
        attrs.base.origin = Origin::Igp;
        attrs.base.as_path = AsPath::from(as_path);
        attrs.base.nexthop = Some(Ipv4Addr::new(10, 0, 0, 2));
        attrs
    }

    fn dest_with(routes: Vec<(IpAddr, Route)>) -> Destination {
        let mut dest = Destination::default();
        for (addr, route) in routes {
            dest.adj_rib.entry(addr).or_default().in_ = Some(route);
        }
        dest
    }

    #[test]
    fn shorter_as_path_wins() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let peer3: IpAddr = "10.0.0.3".parse().unwrap();
        let dest = dest_with(vec![
            (
                peer2,
                route(
                    Ipv4Addr::new(2, 2, 2, 2),
                    peer2,
                    RouteType::External,
                    attrs(&[65002]),
                ),
            ),
            (
                peer3,
                route(
                    Ipv4Addr::new(3, 3, 3, 3),
                    peer3,
                    RouteType::External,
                    attrs(&[65003, 65099]),
                ),
            ),
        ]);

        let best = dest.best_path().unwrap();
        let BestPathSource::Neighbor { peer_addr, .. } = best.source else {
            panic!("expected a neighbor source");
        };
        assert_eq!(peer_addr, peer2);
        assert_eq!(best.attrs.base.as_path.first(), Some(65002));
    }

    #[test]
    fn higher_local_pref_wins() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let peer3: IpAddr = "10.0.0.3".parse().unwrap();
        let mut lp_attrs = attrs(&[65003, 65099]);
        lp_attrs.base.local_pref = Some(200);
        let dest = dest_with(vec![
            (
                peer2,
                route(
                    Ipv4Addr::new(2, 2, 2, 2),
                    peer2,
                    RouteType::Internal,
                    attrs(&[65002]),
                ),
            ),
            (
                peer3,
                route(
                    Ipv4Addr::new(3, 3, 3, 3),
                    peer3,
                    RouteType::Internal,
                    lp_attrs,
                ),
            ),
        ]);

        // LOCAL_PREF outranks AS_PATH length.
        let best = dest.best_path().unwrap();
        let BestPathSource::Neighbor { peer_addr, .. } = best.source else {
            panic!("expected a neighbor source");
        };
        assert_eq!(peer_addr, peer3);
    }

    #[test]
    fn local_route_beats_learned() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let mut dest = dest_with(vec![(
            peer2,
            route(
                Ipv4Addr::new(2, 2, 2, 2),
                peer2,
                RouteType::External,
                attrs(&[65002]),
            ),
        )]);
        dest.local = Some(LocalRoute {
            attrs: attrs(&[]),
            origin_protocol: Protocol::BGP,
        });

        let best = dest.best_path().unwrap();
        assert_eq!(best.source, BestPathSource::Local);
    }

    #[test]
    fn ebgp_beats_ibgp() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let peer3: IpAddr = "10.0.0.3".parse().unwrap();
        let dest = dest_with(vec![
            (
                peer2,
                route(
                    Ipv4Addr::new(2, 2, 2, 2),
                    peer2,
                    RouteType::Internal,
                    attrs(&[65002]),
                ),
            ),
            (
                peer3,
                route(
                    Ipv4Addr::new(3, 3, 3, 3),
                    peer3,
                    RouteType::External,
                    attrs(&[65003]),
                ),
            ),
        ]);

        let best = dest.best_path().unwrap();
        let BestPathSource::Neighbor {
            route_type,
            peer_addr,
            ..
        } = best.source
        else {
            panic!("expected a neighbor source");
        };
        assert_eq!(route_type, RouteType::External);
        assert_eq!(peer_addr, peer3);
    }

    #[test]
    fn lowest_peer_id_is_final_tiebreak() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let peer3: IpAddr = "10.0.0.3".parse().unwrap();
        let now = Instant::now();
        let mut route2 = route(
            Ipv4Addr::new(9, 9, 9, 9),
            peer2,
            RouteType::External,
            attrs(&[65002]),
        );
        let mut route3 = route(
            Ipv4Addr::new(3, 3, 3, 3),
            peer3,
            RouteType::External,
            attrs(&[65003]),
        );
        route2.last_modified = now;
        route3.last_modified = now;
        let dest = dest_with(vec![(peer2, route2), (peer3, route3)]);

        let best = dest.best_path().unwrap();
        let BestPathSource::Neighbor { peer_id, .. } = best.source else {
            panic!("expected a neighbor source");
        };
        assert_eq!(peer_id, Ipv4Addr::new(3, 3, 3, 3));
    }

    #[test]
    fn ineligible_routes_are_skipped() {
        let peer2: IpAddr = "10.0.0.2".parse().unwrap();
        let mut bad = route(
            Ipv4Addr::new(2, 2, 2, 2),
            peer2,
            RouteType::External,
            attrs(&[65002]),
        );
        bad.ineligible = Some(RouteIneligibleReason::AsLoop);
        let dest = dest_with(vec![(peer2, bad)]);

        assert!(dest.best_path().is_none());
    }
}
