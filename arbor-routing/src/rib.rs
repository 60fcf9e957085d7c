//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{BgpRouteType, Nexthop, RouteKeyMsg, RouteMsg};
use ipnetwork::IpNetwork;
use rtnetlink::Handle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::netlink;

// Merged routing table: per prefix, the candidate routes of every
// protocol, plus a shadow of what is installed in the kernel.
#[derive(Debug, Default)]
pub struct Rib {
    pub prefixes: BTreeMap<IpNetwork, BTreeMap<Protocol, Route>>,
    // Shadow table mirroring the kernel's forwarding state.
    pub shadow: BTreeMap<IpNetwork, Route>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    pub protocol: Protocol,
    pub distance: u8,
    pub metric: u32,
    pub bgp_type: Option<BgpRouteType>,
    pub nexthops: BTreeSet<Nexthop>,
}

// Route snapshot for the observation surface.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteSummary {
    pub prefix: IpNetwork,
    pub protocol: Protocol,
    pub distance: u8,
    pub metric: u32,
    pub installed: bool,
}

// ===== impl Rib =====

impl Rib {
    // Processes a route announcement from a protocol engine.
    pub(crate) async fn route_add(&mut self, handle: &Handle, msg: RouteMsg) {
        let route = Route {
            protocol: msg.protocol,
            distance: effective_distance(&msg),
            metric: msg.metric,
            bgp_type: msg.bgp_type,
            nexthops: msg.nexthops,
        };
        self.prefixes
            .entry(msg.prefix)
            .or_default()
            .insert(msg.protocol, route);
        self.apply(handle, msg.prefix).await;
    }

    // Processes a route withdrawal from a protocol engine.
    pub(crate) async fn route_del(
        &mut self,
        handle: &Handle,
        msg: RouteKeyMsg,
    ) {
        if let Some(candidates) = self.prefixes.get_mut(&msg.prefix) {
            candidates.remove(&msg.protocol);
            if candidates.is_empty() {
                self.prefixes.remove(&msg.prefix);
            }
        }
        self.apply(handle, msg.prefix).await;
    }

    // Selects the best candidate for one prefix and diffs it against the
    // shadow table, issuing the kernel updates.
    //
    // Routes with unresolved next-hops stay pending: the originating
    // engine reannounces them once an adjacency supplies a gateway
    // address, which retries the installation here.
    pub(crate) async fn apply(&mut self, handle: &Handle, prefix: IpNetwork) {
        let desired = self
            .prefixes
            .get(&prefix)
            .and_then(|candidates| {
                candidates
                    .values()
                    .filter(|route| {
                        route
                            .nexthops
                            .iter()
                            .all(|nexthop| nexthop.is_resolved())
                    })
                    .min_by_key(|route| (route.distance, route.protocol))
            })
            .cloned();

        match (&desired, self.shadow.get(&prefix)) {
            (Some(desired), Some(installed)) if desired == installed => {
                // Nothing to do.
            }
            (Some(desired), installed) => {
                // Connected routes are installed by the kernel itself when
                // the address is configured.
                if desired.protocol != Protocol::DIRECT {
                    if let Some(installed) = installed
                        && installed.protocol != desired.protocol
                        && installed.protocol != Protocol::DIRECT
                    {
                        netlink::ip_route_uninstall(
                            handle,
                            &prefix,
                            installed.protocol,
                        )
                        .await;
                    }
                    debug!(%prefix, protocol = %desired.protocol, "installing route");
                    netlink::ip_route_install(handle, &prefix, desired).await;
                }
                self.shadow.insert(prefix, desired.clone());
            }
            (None, Some(installed)) => {
                if installed.protocol != Protocol::DIRECT {
                    debug!(%prefix, protocol = %installed.protocol, "uninstalling route");
                    netlink::ip_route_uninstall(
                        handle,
                        &prefix,
                        installed.protocol,
                    )
                    .await;
                }
                self.shadow.remove(&prefix);
            }
            (None, None) => (),
        }
    }

    // Removes every route installed by this process, used at shutdown.
    pub(crate) async fn uninstall_all(&mut self, handle: &Handle) {
        let prefixes = self.shadow.keys().copied().collect::<Vec<_>>();
        for prefix in prefixes {
            if let Some(installed) = self.shadow.remove(&prefix)
                && installed.protocol != Protocol::DIRECT
            {
                netlink::ip_route_uninstall(
                    handle,
                    &prefix,
                    installed.protocol,
                )
                .await;
            }
        }
    }

    // Snapshot for the observation surface.
    pub(crate) fn summaries(&self) -> Vec<RouteSummary> {
        self.prefixes
            .iter()
            .flat_map(|(prefix, candidates)| {
                candidates.values().map(|route| RouteSummary {
                    prefix: *prefix,
                    protocol: route.protocol,
                    distance: route.distance,
                    metric: route.metric,
                    installed: self.shadow.get(prefix)
                        == Some(route),
                })
            })
            .collect()
    }
}

// ===== helper functions =====

// Administrative distance, refining BGP routes so iBGP is preferred over
// eBGP per the configured protocol precedence.
fn effective_distance(msg: &RouteMsg) -> u8 {
    match msg.bgp_type {
        Some(BgpRouteType::Internal) => 200,
        Some(BgpRouteType::External) => 210,
        None => msg.distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_msg(
        protocol: Protocol,
        prefix: &str,
        metric: u32,
        resolved: bool,
    ) -> RouteMsg {
        let nexthop = match resolved {
            true => Nexthop::Address {
                ifindex: 2,
                addr: "10.0.0.2".parse().unwrap(),
            },
            false => Nexthop::Unresolved {
                router_id: "2.2.2.2".parse().unwrap(),
            },
        };
        RouteMsg {
            protocol,
            prefix: prefix.parse().unwrap(),
            distance: protocol.default_distance(),
            metric,
            bgp_type: None,
            nexthops: [nexthop].into(),
        }
    }

    // Selection logic alone, without the kernel side.
    fn best(rib: &Rib, prefix: &str) -> Option<Protocol> {
        let prefix: IpNetwork = prefix.parse().unwrap();
        rib.prefixes.get(&prefix).and_then(|candidates| {
            candidates
                .values()
                .filter(|route| {
                    route.nexthops.iter().all(|nexthop| nexthop.is_resolved())
                })
                .min_by_key(|route| (route.distance, route.protocol))
                .map(|route| route.protocol)
        })
    }

    fn insert(rib: &mut Rib, msg: RouteMsg) {
        let route = Route {
            protocol: msg.protocol,
            distance: effective_distance(&msg),
            metric: msg.metric,
            bgp_type: msg.bgp_type,
            nexthops: msg.nexthops,
        };
        rib.prefixes
            .entry(msg.prefix)
            .or_default()
            .insert(msg.protocol, route);
    }

    #[test]
    fn protocol_precedence() {
        let mut rib = Rib::default();
        insert(
            &mut rib,
            route_msg(Protocol::BGP, "10.10.10.0/24", 0, true),
        );
        insert(
            &mut rib,
            route_msg(Protocol::ISIS, "10.10.10.0/24", 20, true),
        );
        insert(
            &mut rib,
            route_msg(Protocol::OSPFV2, "10.10.10.0/24", 10, true),
        );
        assert_eq!(best(&rib, "10.10.10.0/24"), Some(Protocol::OSPFV2));

        insert(
            &mut rib,
            route_msg(Protocol::STATIC, "10.10.10.0/24", 1, true),
        );
        assert_eq!(best(&rib, "10.10.10.0/24"), Some(Protocol::STATIC));

        insert(
            &mut rib,
            route_msg(Protocol::DIRECT, "10.10.10.0/24", 0, true),
        );
        assert_eq!(best(&rib, "10.10.10.0/24"), Some(Protocol::DIRECT));
    }

    #[test]
    fn unresolved_routes_stay_pending() {
        let mut rib = Rib::default();
        insert(
            &mut rib,
            route_msg(Protocol::OSPFV2, "10.10.10.0/24", 10, false),
        );
        // The unresolved OSPF route is not eligible for installation.
        assert_eq!(best(&rib, "10.10.10.0/24"), None);

        // A resolved route from a less-preferred protocol is installed
        // instead.
        insert(
            &mut rib,
            route_msg(Protocol::BGP, "10.10.10.0/24", 0, true),
        );
        assert_eq!(best(&rib, "10.10.10.0/24"), Some(Protocol::BGP));

        // The engine reannounces the route once it resolves.
        insert(
            &mut rib,
            route_msg(Protocol::OSPFV2, "10.10.10.0/24", 10, true),
        );
        assert_eq!(best(&rib, "10.10.10.0/24"), Some(Protocol::OSPFV2));
    }

    #[test]
    fn ibgp_preferred_over_ebgp() {
        let mut ibgp = route_msg(Protocol::BGP, "10.10.10.0/24", 0, true);
        ibgp.bgp_type = Some(BgpRouteType::Internal);
        let mut ebgp = route_msg(Protocol::BGP, "10.10.11.0/24", 0, true);
        ebgp.bgp_type = Some(BgpRouteType::External);

        assert!(effective_distance(&ibgp) < effective_distance(&ebgp));
    }
}
