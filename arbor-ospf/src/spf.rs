//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use arbor_utils::ip::Ipv4AddrExt;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::packet::lsa::{Lsa, LsaBody, LsaRouterLinkType};

// Default SPF timers, in seconds.
pub const DFLT_SPF_DELAY: u64 = 5;
pub const DFLT_SPF_INTERVAL: u64 = 10;

// SPF graph vertex.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    Router(Ipv4Addr),
    Network(Ipv4Addr),
}

// Route path types, ordered by decreasing preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IntraArea,
    External1,
    External2,
}

// Computed route next-hop.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum SpfNexthop {
    // Directly attached network.
    Connected { ifname: String, ifindex: u32 },
    // Gateway reachable through a local interface.
    Address { ifname: String, ifindex: u32, addr: Ipv4Addr },
    // No interface address is known for the first-hop router yet. The
    // route is reannounced once an adjacency supplies one.
    Unresolved { router_id: Ipv4Addr },
}

// Computed route.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SpfRoute {
    pub path_type: PathType,
    // Total cost for intra-area and E1 routes; the external metric alone
    // for E2 routes.
    pub metric: u32,
    // Cost of the internal path to the advertising router, used as the E2
    // tie-breaker.
    pub internal_cost: u32,
    pub nexthop: SpfNexthop,
    pub adv_rtr: Ipv4Addr,
}

// Local interface snapshot used for next-hop resolution.
#[derive(Clone, Debug)]
pub struct SpfInterface {
    pub name: String,
    pub ifindex: u32,
    pub addr: Ipv4Network,
}

// Local neighbor snapshot used for next-hop resolution.
#[derive(Clone, Debug)]
pub struct SpfNeighbor {
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub ifname: String,
    pub ifindex: u32,
}

// ===== global functions =====

// Dijkstra's algorithm over the router/network LSA graph of one area,
// followed by route derivation from stub links, network LSAs and
// AS-external LSAs.
//
// The input is a consistent LSDB snapshot; the output is deterministic for
// a given snapshot.
pub(crate) fn run(
    router_id: Ipv4Addr,
    lsas: &[Arc<Lsa>],
    interfaces: &[SpfInterface],
    neighbors: &[SpfNeighbor],
) -> BTreeMap<Ipv4Network, SpfRoute> {
    // Index the LSDB snapshot by vertex, ignoring MaxAge instances.
    let mut routers = BTreeMap::new();
    let mut networks = BTreeMap::new();
    let mut externals = vec![];
    for lsa in lsas.iter().filter(|lsa| !lsa.hdr.is_maxage()) {
        match &lsa.body {
            LsaBody::Router(body) => {
                routers.insert(lsa.hdr.adv_rtr, (lsa.hdr, body));
            }
            LsaBody::Network(body) => {
                networks.insert(lsa.hdr.lsa_id, (lsa.hdr, body));
            }
            LsaBody::AsExternal(body) => {
                externals.push((lsa.hdr, body));
            }
            _ => (),
        }
    }

    // Dijkstra.
    let root = VertexId::Router(router_id);
    let mut dist = BTreeMap::new();
    let mut nexthops: BTreeMap<VertexId, SpfNexthop> = BTreeMap::new();
    let mut settled = BTreeMap::new();
    let mut candidates = BinaryHeap::new();
    dist.insert(root, 0u32);
    candidates.push(Reverse((0u32, root)));

    while let Some(Reverse((cost, vertex))) = candidates.pop() {
        if settled.contains_key(&vertex) {
            continue;
        }
        settled.insert(vertex, cost);

        // Examine the settled vertex's outgoing edges.
        let edges = vertex_edges(&vertex, &routers, &networks);
        for (target, edge_cost) in edges {
            let new_cost = cost.saturating_add(edge_cost);
            if dist
                .get(&target)
                .is_none_or(|&old_cost| new_cost < old_cost)
            {
                dist.insert(target, new_cost);

                // Compute the next-hop used to reach the new vertex.
                let nexthop = calc_nexthop(
                    router_id, &vertex, &target, &routers, interfaces,
                    neighbors, &nexthops,
                );
                if let Some(nexthop) = nexthop {
                    nexthops.insert(target, nexthop);
                }
                candidates.push(Reverse((new_cost, target)));
            }
        }
    }

    // Derive routes from the shortest-path tree.
    let mut routes: BTreeMap<Ipv4Network, SpfRoute> = BTreeMap::new();
    let mut install = |prefix, route: SpfRoute| {
        match routes.get(&prefix) {
            Some(best)
                if (best.path_type, best.metric, best.internal_cost)
                    <= (route.path_type, route.metric, route.internal_cost) => {
            }
            _ => {
                routes.insert(prefix, route);
            }
        }
    };

    // Transit networks.
    for (addr, (hdr, body)) in &networks {
        let vertex = VertexId::Network(*addr);
        let Some(&cost) = settled.get(&vertex) else {
            continue;
        };
        let Some(prefix) = prefix_from_mask(*addr, body.mask) else {
            continue;
        };
        let nexthop = nexthops
            .get(&vertex)
            .cloned()
            .unwrap_or(SpfNexthop::Unresolved { router_id: hdr.adv_rtr });
        install(
            prefix,
            SpfRoute {
                path_type: PathType::IntraArea,
                metric: cost,
                internal_cost: cost,
                nexthop,
                adv_rtr: hdr.adv_rtr,
            },
        );
    }

    // Stub links of settled routers.
    for (rtr_id, (_, body)) in &routers {
        let vertex = VertexId::Router(*rtr_id);
        let Some(&cost) = settled.get(&vertex) else {
            continue;
        };
        for link in body
            .links
            .iter()
            .filter(|link| link.link_type == LsaRouterLinkType::StubNetwork)
        {
            let Some(prefix) = prefix_from_mask(link.link_id, link.link_data)
            else {
                continue;
            };
            let metric = cost.saturating_add(link.metric as u32);
            let nexthop = if *rtr_id == router_id {
                match interfaces.iter().find(|iface| {
                    iface.addr.network() == prefix.network()
                        && iface.addr.prefix() == prefix.prefix()
                }) {
                    Some(iface) => SpfNexthop::Connected {
                        ifname: iface.name.clone(),
                        ifindex: iface.ifindex,
                    },
                    None => continue,
                }
            } else {
                match nexthops.get(&vertex) {
                    Some(nexthop) => nexthop.clone(),
                    None => SpfNexthop::Unresolved { router_id: *rtr_id },
                }
            };
            install(
                prefix,
                SpfRoute {
                    path_type: PathType::IntraArea,
                    metric,
                    internal_cost: metric,
                    nexthop,
                    adv_rtr: *rtr_id,
                },
            );
        }
    }

    // AS-external LSAs. E1 metrics add the internal cost to the
    // advertising router; E2 metrics stand alone, with the internal cost
    // as tie-breaker.
    for (hdr, body) in &externals {
        let vertex = VertexId::Router(hdr.adv_rtr);
        let Some(&internal_cost) = settled.get(&vertex) else {
            continue;
        };
        if hdr.adv_rtr == router_id {
            // Locally redistributed prefix.
            continue;
        }
        let Some(prefix) = prefix_from_mask(hdr.lsa_id, body.mask) else {
            continue;
        };
        let (path_type, metric) = match body.e_bit {
            true => (PathType::External2, body.metric),
            false => {
                (PathType::External1, internal_cost.saturating_add(body.metric))
            }
        };

        // Prefer the forwarding address as the gateway when one is
        // advertised and directly reachable.
        let nexthop = body
            .fwd_addr
            .and_then(|fwd_addr| {
                interfaces
                    .iter()
                    .find(|iface| iface.addr.contains(fwd_addr))
                    .map(|iface| SpfNexthop::Address {
                        ifname: iface.name.clone(),
                        ifindex: iface.ifindex,
                        addr: fwd_addr,
                    })
            })
            .or_else(|| nexthops.get(&vertex).cloned())
            .unwrap_or(SpfNexthop::Unresolved { router_id: hdr.adv_rtr });

        install(
            prefix,
            SpfRoute {
                path_type,
                metric,
                internal_cost,
                nexthop,
                adv_rtr: hdr.adv_rtr,
            },
        );
    }

    routes
}

// ===== helper functions =====

fn prefix_from_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Ipv4Network> {
    let plen = mask.mask_to_plen()?;
    let prefix = Ipv4Network::new(addr, plen).ok()?;
    Some(Ipv4Network::new(prefix.network(), plen).unwrap())
}

// Returns the outgoing edges of a vertex, checking that each edge is
// reported in both directions.
fn vertex_edges(
    vertex: &VertexId,
    routers: &BTreeMap<Ipv4Addr, (crate::packet::lsa::LsaHdr, &crate::packet::lsa::LsaRouter)>,
    networks: &BTreeMap<Ipv4Addr, (crate::packet::lsa::LsaHdr, &crate::packet::lsa::LsaNetwork)>,
) -> Vec<(VertexId, u32)> {
    let mut edges = vec![];

    match vertex {
        VertexId::Router(rtr_id) => {
            let Some((_, body)) = routers.get(rtr_id) else {
                return edges;
            };
            for link in &body.links {
                match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        // Bidirectional check: the remote router must report
                        // a link back.
                        if let Some((_, remote)) = routers.get(&link.link_id)
                            && remote.links.iter().any(|rlink| {
                                rlink.link_type
                                    == LsaRouterLinkType::PointToPoint
                                    && rlink.link_id == *rtr_id
                            })
                        {
                            edges.push((
                                VertexId::Router(link.link_id),
                                link.metric as u32,
                            ));
                        }
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        if networks.contains_key(&link.link_id) {
                            edges.push((
                                VertexId::Network(link.link_id),
                                link.metric as u32,
                            ));
                        }
                    }
                    LsaRouterLinkType::StubNetwork
                    | LsaRouterLinkType::VirtualLink => (),
                }
            }
        }
        VertexId::Network(addr) => {
            let Some((_, body)) = networks.get(addr) else {
                return edges;
            };
            for rtr_id in &body.attached_rtrs {
                // Bidirectional check: the router must report a transit
                // link to this network.
                if let Some((_, remote)) = routers.get(rtr_id)
                    && remote.links.iter().any(|rlink| {
                        rlink.link_type == LsaRouterLinkType::TransitNetwork
                            && rlink.link_id == *addr
                    })
                {
                    // Network-to-router edges have zero cost.
                    edges.push((VertexId::Router(*rtr_id), 0));
                }
            }
        }
    }

    edges
}

// Computes the next-hop for a newly reached vertex.
fn calc_nexthop(
    router_id: Ipv4Addr,
    parent: &VertexId,
    target: &VertexId,
    routers: &BTreeMap<Ipv4Addr, (crate::packet::lsa::LsaHdr, &crate::packet::lsa::LsaRouter)>,
    interfaces: &[SpfInterface],
    neighbors: &[SpfNeighbor],
    nexthops: &BTreeMap<VertexId, SpfNexthop>,
) -> Option<SpfNexthop> {
    match parent {
        // The parent is the root: the target is either a directly connected
        // network or a point-to-point neighbor.
        VertexId::Router(parent_id) if *parent_id == router_id => {
            match target {
                VertexId::Network(addr) => {
                    let iface = interfaces
                        .iter()
                        .find(|iface| iface.addr.contains(*addr))?;
                    Some(SpfNexthop::Connected {
                        ifname: iface.name.clone(),
                        ifindex: iface.ifindex,
                    })
                }
                VertexId::Router(target_id) => {
                    resolve_router_addr(*target_id, neighbors)
                }
            }
        }
        // The parent is a network directly connected to the root: the
        // target router's own interface address on that network is the
        // gateway.
        VertexId::Network(net_addr)
            if matches!(
                nexthops.get(parent),
                Some(SpfNexthop::Connected { .. })
            ) =>
        {
            let VertexId::Router(target_id) = target else {
                return nexthops.get(parent).cloned();
            };
            let iface = interfaces
                .iter()
                .find(|iface| iface.addr.contains(*net_addr))?;

            // Look up the target's interface address on this network: first
            // in the neighbor table, then in its router-LSA link data.
            let addr = neighbors
                .iter()
                .find(|nbr| nbr.router_id == *target_id)
                .map(|nbr| nbr.src)
                .or_else(|| {
                    routers.get(target_id).and_then(|(_, body)| {
                        body.links
                            .iter()
                            .find(|link| {
                                link.link_type
                                    == LsaRouterLinkType::TransitNetwork
                                    && link.link_id == *net_addr
                            })
                            .map(|link| link.link_data)
                    })
                });
            match addr {
                Some(addr) => Some(SpfNexthop::Address {
                    ifname: iface.name.clone(),
                    ifindex: iface.ifindex,
                    addr,
                }),
                None => {
                    Some(SpfNexthop::Unresolved { router_id: *target_id })
                }
            }
        }
        // Deeper in the tree: inherit the parent's next-hop.
        _ => nexthops.get(parent).cloned(),
    }
}

// Resolves the interface address of a directly connected point-to-point
// router through the neighbor table. Without a neighbor entry the route
// stays `Unresolved` so the installer can retry later instead of guessing
// a gateway.
fn resolve_router_addr(
    target_id: Ipv4Addr,
    neighbors: &[SpfNeighbor],
) -> Option<SpfNexthop> {
    match neighbors.iter().find(|nbr| nbr.router_id == target_id) {
        Some(nbr) => Some(SpfNexthop::Address {
            ifname: nbr.ifname.clone(),
            ifindex: nbr.ifindex,
            addr: nbr.src,
        }),
        None => Some(SpfNexthop::Unresolved { router_id: target_id }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Options;
    use crate::packet::lsa::{
        LSA_INIT_SEQ_NO, LsaRouter, LsaRouterLink,
    };

    fn router_lsa(adv_rtr: Ipv4Addr, links: Vec<LsaRouterLink>) -> Arc<Lsa> {
        Arc::new(Lsa::new(
            1,
            Options::E,
            adv_rtr,
            adv_rtr,
            LSA_INIT_SEQ_NO,
            LsaBody::Router(LsaRouter { flags: 0, links }),
        ))
    }

    fn p2p_link(link_id: Ipv4Addr, link_data: Ipv4Addr) -> LsaRouterLink {
        LsaRouterLink {
            link_type: LsaRouterLinkType::PointToPoint,
            link_id,
            link_data,
            metric: 1,
        }
    }

    fn stub_link(
        link_id: Ipv4Addr,
        link_data: Ipv4Addr,
        metric: u16,
    ) -> LsaRouterLink {
        LsaRouterLink {
            link_type: LsaRouterLinkType::StubNetwork,
            link_id,
            link_data,
            metric,
        }
    }

    fn two_router_topology() -> (Vec<Arc<Lsa>>, Vec<SpfInterface>, Vec<SpfNeighbor>)
    {
        let r1 = Ipv4Addr::new(1, 1, 1, 1);
        let r2 = Ipv4Addr::new(2, 2, 2, 2);
        let mask30 = Ipv4Addr::new(255, 255, 255, 252);
        let mask32 = Ipv4Addr::new(255, 255, 255, 255);

        let lsas = vec![
            router_lsa(
                r1,
                vec![
                    p2p_link(r2, Ipv4Addr::new(10, 0, 0, 1)),
                    stub_link(Ipv4Addr::new(10, 0, 0, 0), mask30, 1),
                    stub_link(r1, mask32, 0),
                ],
            ),
            router_lsa(
                r2,
                vec![
                    p2p_link(r1, Ipv4Addr::new(10, 0, 0, 2)),
                    stub_link(Ipv4Addr::new(10, 0, 0, 0), mask30, 1),
                    stub_link(r2, mask32, 0),
                ],
            ),
        ];
        let interfaces = vec![SpfInterface {
            name: "eth0".to_owned(),
            ifindex: 2,
            addr: Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 1), 30).unwrap(),
        }];
        let neighbors = vec![SpfNeighbor {
            router_id: r2,
            src: Ipv4Addr::new(10, 0, 0, 2),
            ifname: "eth0".to_owned(),
            ifindex: 2,
        }];

        (lsas, interfaces, neighbors)
    }

    #[test]
    fn two_router_p2p() {
        let r1 = Ipv4Addr::new(1, 1, 1, 1);
        let r2 = Ipv4Addr::new(2, 2, 2, 2);
        let (lsas, interfaces, neighbors) = two_router_topology();

        let routes = run(r1, &lsas, &interfaces, &neighbors);

        // Route to the remote router-id through the adjacency.
        let prefix = Ipv4Network::new(r2, 32).unwrap();
        let route = routes.get(&prefix).unwrap();
        assert_eq!(route.metric, 1);
        assert_eq!(
            route.nexthop,
            SpfNexthop::Address {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                addr: Ipv4Addr::new(10, 0, 0, 2),
            }
        );

        // Connected stub route.
        let prefix =
            Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 30).unwrap();
        let route = routes.get(&prefix).unwrap();
        assert_eq!(
            route.nexthop,
            SpfNexthop::Connected {
                ifname: "eth0".to_owned(),
                ifindex: 2,
            }
        );
    }

    #[test]
    fn unresolved_nexthop_without_neighbor() {
        let r1 = Ipv4Addr::new(1, 1, 1, 1);
        let r2 = Ipv4Addr::new(2, 2, 2, 2);
        let (lsas, interfaces, _) = two_router_topology();

        // Without a neighbor entry the next-hop stays unresolved rather
        // than falling back to the router-id as a gateway.
        let routes = run(r1, &lsas, &interfaces, &[]);
        let prefix = Ipv4Network::new(r2, 32).unwrap();
        let route = routes.get(&prefix).unwrap();
        assert_eq!(route.nexthop, SpfNexthop::Unresolved { router_id: r2 });
    }

    #[test]
    fn deterministic_output() {
        let r1 = Ipv4Addr::new(1, 1, 1, 1);
        let (lsas, interfaces, neighbors) = two_router_topology();

        let first = run(r1, &lsas, &interfaces, &neighbors);
        let second = run(r1, &lsas, &interfaces, &neighbors);
        assert_eq!(first, second);
    }

    #[test]
    fn external_route_metrics() {
        use crate::packet::lsa::LsaAsExternal;

        let r1 = Ipv4Addr::new(1, 1, 1, 1);
        let r2 = Ipv4Addr::new(2, 2, 2, 2);
        let (mut lsas, interfaces, neighbors) = two_router_topology();

        // R2 redistributes 192.168.1.0/24 as an E2 external with metric 150.
        lsas.push(Arc::new(Lsa::new(
            1,
            Options::E,
            Ipv4Addr::new(192, 168, 1, 0),
            r2,
            LSA_INIT_SEQ_NO,
            LsaBody::AsExternal(LsaAsExternal {
                mask: Ipv4Addr::new(255, 255, 255, 0),
                e_bit: true,
                metric: 150,
                fwd_addr: None,
                route_tag: 0,
            }),
        )));

        let routes = run(r1, &lsas, &interfaces, &neighbors);
        let prefix =
            Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 0), 24).unwrap();
        let route = routes.get(&prefix).unwrap();
        assert_eq!(route.path_type, PathType::External2);
        // E2 routes carry the external metric alone.
        assert_eq!(route.metric, 150);
        assert_eq!(route.internal_cost, 1);
    }
}
