//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::packet::pdu::Lsp;
use crate::packet::{LanId, LevelNumber, SystemId};

// Default SPF timers, in seconds.
pub const DFLT_SPF_DELAY: u64 = 5;
pub const DFLT_SPF_INTERVAL: u64 = 10;

// Computed route next-hop.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum SpfNexthop {
    Connected { ifname: String, ifindex: u32 },
    Address { ifname: String, ifindex: u32, addr: Ipv4Addr },
    Unresolved { system_id: SystemId },
}

// Computed route.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SpfRoute {
    pub level: LevelNumber,
    pub metric: u32,
    pub nexthop: SpfNexthop,
    pub system_id: SystemId,
}

// Local interface snapshot used for next-hop resolution.
#[derive(Clone, Debug)]
pub struct SpfInterface {
    pub name: String,
    pub ifindex: u32,
    pub addr: Ipv4Network,
}

// Local adjacency snapshot used for next-hop resolution.
#[derive(Clone, Debug)]
pub struct SpfAdjacency {
    pub system_id: SystemId,
    pub addr: Option<Ipv4Addr>,
    pub ifname: String,
    pub ifindex: u32,
}

// ===== global functions =====

// Dijkstra's algorithm over the LSP graph of one level.
//
// Vertices are LAN IDs: routers are (system-id, 0) and LAN pseudonodes
// carry the DIS-assigned pseudonode number. The input is a consistent
// LSDB snapshot; the output is deterministic for a given snapshot.
pub(crate) fn run(
    level: LevelNumber,
    system_id: SystemId,
    lsps: &[Arc<Lsp>],
    interfaces: &[SpfInterface],
    adjacencies: &[SpfAdjacency],
) -> BTreeMap<Ipv4Network, SpfRoute> {
    // Group LSP fragments by their originating node, ignoring expired
    // instances.
    let mut nodes: BTreeMap<LanId, Vec<&Arc<Lsp>>> = BTreeMap::new();
    for lsp in lsps
        .iter()
        .filter(|lsp| lsp.rem_lifetime() != 0)
        .filter(|lsp| lsp.seqno != 0)
    {
        let node = LanId::from((lsp.lsp_id.system_id, lsp.lsp_id.pseudonode));
        nodes.entry(node).or_default().push(lsp);
    }

    // Outgoing edges per node, from the narrow and wide IS reachability
    // TLVs.
    let edges = |node: &LanId| -> Vec<(LanId, u32)> {
        let mut list = vec![];
        if let Some(fragments) = nodes.get(node) {
            for lsp in fragments {
                for reach in &lsp.tlvs.is_reach.list {
                    list.push((reach.neighbor, reach.metric as u32));
                }
                for reach in &lsp.tlvs.ext_is_reach.list {
                    list.push((reach.neighbor, reach.metric));
                }
            }
        }
        list
    };

    // Bidirectional connectivity check.
    let has_edge_back = |from: &LanId, to: &LanId| -> bool {
        edges(from).iter().any(|(neighbor, _)| neighbor == to)
    };

    // Dijkstra.
    let root = LanId::from((system_id, 0));
    let mut dist: BTreeMap<LanId, u32> = BTreeMap::new();
    let mut nexthops: BTreeMap<LanId, SpfNexthop> = BTreeMap::new();
    let mut settled: BTreeMap<LanId, u32> = BTreeMap::new();
    let mut candidates = BinaryHeap::new();
    dist.insert(root, 0);
    candidates.push(Reverse((0u32, root)));

    while let Some(Reverse((cost, vertex))) = candidates.pop() {
        if settled.contains_key(&vertex) {
            continue;
        }
        settled.insert(vertex, cost);

        for (target, edge_cost) in edges(&vertex) {
            if !nodes.contains_key(&target)
                || !has_edge_back(&target, &vertex)
            {
                continue;
            }
            let new_cost = cost.saturating_add(edge_cost);
            if dist
                .get(&target)
                .is_none_or(|&old_cost| new_cost < old_cost)
            {
                dist.insert(target, new_cost);
                let nexthop = calc_nexthop(
                    &root, &vertex, &target, interfaces, adjacencies,
                    &nexthops,
                );
                if let Some(nexthop) = nexthop {
                    nexthops.insert(target, nexthop);
                }
                candidates.push(Reverse((new_cost, target)));
            }
        }
    }

    // Derive prefix routes from the IP reachability TLVs of settled
    // routers.
    let mut routes: BTreeMap<Ipv4Network, SpfRoute> = BTreeMap::new();
    let mut install = |prefix: Ipv4Network, route: SpfRoute| {
        match routes.get(&prefix) {
            Some(best) if best.metric <= route.metric => (),
            _ => {
                routes.insert(prefix, route);
            }
        }
    };

    for (node, fragments) in &nodes {
        let Some(&cost) = settled.get(node) else {
            continue;
        };
        let nexthop = match node.system_id == system_id {
            true => None,
            false => Some(nexthops.get(node).cloned().unwrap_or(
                SpfNexthop::Unresolved {
                    system_id: node.system_id,
                },
            )),
        };

        for lsp in fragments {
            let reach_entries = lsp
                .tlvs
                .ipv4_internal_reach
                .list
                .iter()
                .chain(lsp.tlvs.ipv4_external_reach.list.iter())
                .map(|reach| (reach.prefix, reach.metric as u32))
                .chain(
                    lsp.tlvs
                        .ext_ipv4_reach
                        .list
                        .iter()
                        .map(|reach| (reach.prefix, reach.metric)),
                );

            for (prefix, reach_metric) in reach_entries {
                let metric = cost.saturating_add(reach_metric);
                let nexthop = match &nexthop {
                    Some(nexthop) => nexthop.clone(),
                    None => {
                        // Locally attached prefix.
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
                    }
                };
                install(
                    prefix,
                    SpfRoute {
                        level,
                        metric,
                        nexthop,
                        system_id: node.system_id,
                    },
                );
            }
        }
    }

    routes
}

// Merges the L1 and L2 route tables, preferring level 1 for destinations
// known to both.
pub(crate) fn merge_levels(
    l1: BTreeMap<Ipv4Network, SpfRoute>,
    l2: BTreeMap<Ipv4Network, SpfRoute>,
) -> BTreeMap<Ipv4Network, SpfRoute> {
    let mut merged = l2;
    for (prefix, route) in l1 {
        merged.insert(prefix, route);
    }
    merged
}

// ===== helper functions =====

// Computes the next-hop for a newly reached vertex.
fn calc_nexthop(
    root: &LanId,
    parent: &LanId,
    target: &LanId,
    interfaces: &[SpfInterface],
    adjacencies: &[SpfAdjacency],
    nexthops: &BTreeMap<LanId, SpfNexthop>,
) -> Option<SpfNexthop> {
    // Past the first hop, the next-hop is inherited from the parent.
    if parent != root
        && !matches!(nexthops.get(parent), Some(SpfNexthop::Connected { .. }))
    {
        return nexthops.get(parent).cloned();
    }

    // Directly attached pseudonode: the LAN itself is connected.
    if parent == root && target.is_pseudonode() {
        let iface = adjacencies
            .iter()
            .find(|adj| adj.system_id == target.system_id)
            .map(|adj| (adj.ifname.clone(), adj.ifindex));
        return match iface {
            Some((ifname, ifindex)) => {
                Some(SpfNexthop::Connected { ifname, ifindex })
            }
            None => {
                // This system is the DIS: find the interface by circuit.
                interfaces.first().map(|iface| SpfNexthop::Connected {
                    ifname: iface.name.clone(),
                    ifindex: iface.ifindex,
                })
            }
        };
    }

    // First router hop: resolve through the adjacency table.
    match adjacencies
        .iter()
        .find(|adj| adj.system_id == target.system_id)
    {
        Some(adj) => match adj.addr {
            Some(addr) => Some(SpfNexthop::Address {
                ifname: adj.ifname.clone(),
                ifindex: adj.ifindex,
                addr,
            }),
            None => Some(SpfNexthop::Unresolved {
                system_id: target.system_id,
            }),
        },
        None => Some(SpfNexthop::Unresolved {
            system_id: target.system_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::pdu::{LSP_MAX_LIFETIME, LspFlags, LspTlvs};
    use crate::packet::tlv::{ExtIpv4Reach, ExtIsReach};
    use crate::packet::LspId;

    fn system_id(n: u8) -> SystemId {
        SystemId::from([0, 0, 0, 0, 0, n])
    }

    fn router_lsp(
        level: LevelNumber,
        sys: SystemId,
        neighbors: Vec<ExtIsReach>,
        prefixes: Vec<ExtIpv4Reach>,
    ) -> Arc<Lsp> {
        Arc::new(Lsp::new(
            level,
            LSP_MAX_LIFETIME,
            LspId::from((sys, 0, 0)),
            1,
            LspFlags::IS_TYPE1 | LspFlags::IS_TYPE2,
            LspTlvs::new([], [], [], neighbors, [], [], prefixes),
        ))
    }

    fn reach(sys: SystemId, metric: u32) -> ExtIsReach {
        ExtIsReach {
            neighbor: LanId::from((sys, 0)),
            metric,
        }
    }

    fn prefix_reach(prefix: &str, metric: u32) -> ExtIpv4Reach {
        ExtIpv4Reach {
            metric,
            up_down: false,
            prefix: prefix.parse().unwrap(),
        }
    }

    fn two_router_topology(
        level: LevelNumber,
    ) -> (Vec<Arc<Lsp>>, Vec<SpfInterface>, Vec<SpfAdjacency>) {
        let r1 = system_id(1);
        let r2 = system_id(2);

        let lsps = vec![
            router_lsp(
                level,
                r1,
                vec![reach(r2, 10)],
                vec![prefix_reach("10.0.0.0/30", 10)],
            ),
            router_lsp(
                level,
                r2,
                vec![reach(r1, 10)],
                vec![
                    prefix_reach("10.0.0.0/30", 10),
                    prefix_reach("192.168.2.0/24", 10),
                ],
            ),
        ];
        let interfaces = vec![SpfInterface {
            name: "eth0".to_owned(),
            ifindex: 2,
            addr: "10.0.0.1/30".parse().unwrap(),
        }];
        let adjacencies = vec![SpfAdjacency {
            system_id: r2,
            addr: Some("10.0.0.2".parse().unwrap()),
            ifname: "eth0".to_owned(),
            ifindex: 2,
        }];

        (lsps, interfaces, adjacencies)
    }

    #[test]
    fn two_router_p2p() {
        let r1 = system_id(1);
        let r2 = system_id(2);
        let (lsps, interfaces, adjacencies) =
            two_router_topology(LevelNumber::L1);

        let routes =
            run(LevelNumber::L1, r1, &lsps, &interfaces, &adjacencies);

        let prefix: Ipv4Network = "192.168.2.0/24".parse().unwrap();
        let route = routes.get(&prefix).unwrap();
        assert_eq!(route.metric, 20);
        assert_eq!(route.system_id, r2);
        assert_eq!(
            route.nexthop,
            SpfNexthop::Address {
                ifname: "eth0".to_owned(),
                ifindex: 2,
                addr: "10.0.0.2".parse().unwrap(),
            }
        );

        // The shared subnet resolves as connected.
        let prefix: Ipv4Network = "10.0.0.0/30".parse().unwrap();
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
    fn deterministic_output() {
        let r1 = system_id(1);
        let (lsps, interfaces, adjacencies) =
            two_router_topology(LevelNumber::L1);

        let first =
            run(LevelNumber::L1, r1, &lsps, &interfaces, &adjacencies);
        let second =
            run(LevelNumber::L1, r1, &lsps, &interfaces, &adjacencies);
        assert_eq!(first, second);
    }

    #[test]
    fn one_way_reachability_is_ignored() {
        let r1 = system_id(1);
        let r2 = system_id(2);
        let level = LevelNumber::L1;

        // R2 does not report a link back to R1.
        let lsps = vec![
            router_lsp(
                level,
                r1,
                vec![reach(r2, 10)],
                vec![prefix_reach("10.0.0.0/30", 10)],
            ),
            router_lsp(
                level,
                r2,
                vec![],
                vec![prefix_reach("192.168.2.0/24", 10)],
            ),
        ];
        let (_, interfaces, adjacencies) = two_router_topology(level);

        let routes = run(level, r1, &lsps, &interfaces, &adjacencies);
        let prefix: Ipv4Network = "192.168.2.0/24".parse().unwrap();
        assert!(!routes.contains_key(&prefix));
    }

    #[test]
    fn l1_preferred_on_merge() {
        let r1 = system_id(1);
        let r2 = system_id(2);
        let (lsps, interfaces, adjacencies) =
            two_router_topology(LevelNumber::L1);
        let (l2_lsps, ..) = two_router_topology(LevelNumber::L2);

        let l1 = run(LevelNumber::L1, r1, &lsps, &interfaces, &adjacencies);
        let l2 =
            run(LevelNumber::L2, r1, &l2_lsps, &interfaces, &adjacencies);
        let merged = merge_levels(l1, l2);

        let prefix: Ipv4Network = "192.168.2.0/24".parse().unwrap();
        let route = merged.get(&prefix).unwrap();
        assert_eq!(route.level, LevelNumber::L1);
        assert_eq!(route.system_id, r2);
    }
}
