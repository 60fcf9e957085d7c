//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use arbor_utils::ibus::IbusChannelsTx;
use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{Nexthop, RedistRouteMsg};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rib::Rib;

// Redistribution fabric configuration. The per-source metrics are the
// defaults applied when injecting into any target engine.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedistributionCfg {
    pub enabled: bool,
    pub interval: u64,
    pub metric_static: u32,
    pub metric_ospf: u32,
    pub metric_isis: u32,
    pub metric_bgp: u32,
}

// Cross-protocol route leakage with per-prefix origin tracking.
#[derive(Debug, Default)]
pub struct Redistribution {
    // Origin ledger: the protocol each prefix was first learned from. A
    // prefix is never reinjected into its recorded origin.
    pub origins: BTreeMap<IpNetwork, Protocol>,
    // Injections performed so far: (target, prefix) -> source.
    pub injected: BTreeMap<(Protocol, IpNetwork), Protocol>,
}

impl Default for RedistributionCfg {
    fn default() -> RedistributionCfg {
        RedistributionCfg {
            enabled: true,
            interval: 10,
            metric_static: 50,
            metric_ospf: 100,
            metric_isis: 100,
            metric_bgp: 150,
        }
    }
}

// ===== impl Redistribution =====

impl Redistribution {
    // Runs one redistribution cycle over the current RIB contents.
    pub(crate) fn cycle(
        &mut self,
        config: &RedistributionCfg,
        rib: &Rib,
        ibus_tx: &IbusChannelsTx,
    ) {
        // Even with a single active engine, static routes still feed it.
        let targets = active_targets(ibus_tx);

        // 1-2. Collect routes and record their origins.
        let mut collected: Vec<(Protocol, IpNetwork, u32, Option<IpAddr>)> =
            vec![];
        for (prefix, candidates) in &rib.prefixes {
            for route in candidates.values() {
                let source = route.protocol;
                if !matches!(
                    source,
                    Protocol::STATIC
                        | Protocol::OSPFV2
                        | Protocol::ISIS
                        | Protocol::BGP
                ) {
                    continue;
                }

                // Skip prefixes this fabric itself injected into the
                // source engine, breaking the feedback loop.
                if self.injected.contains_key(&(source, *prefix)) {
                    continue;
                }

                self.origins.entry(*prefix).or_insert(source);
                let nexthop = route.nexthops.iter().find_map(|nexthop| {
                    match nexthop {
                        Nexthop::Address { addr, .. } => Some(*addr),
                        _ => None,
                    }
                });
                collected.push((source, *prefix, route.metric, nexthop));
            }
        }

        // 3-4. Inject each collected route into every other engine,
        // unless the prefix originates from that engine.
        for (source, prefix, _metric, nexthop) in &collected {
            for target in &targets {
                if target == source {
                    continue;
                }
                if self.origins.get(prefix) == Some(target) {
                    continue;
                }
                if self.injected.contains_key(&(*target, *prefix)) {
                    // Already injected in a previous cycle; reinjecting
                    // within the same cycle is likewise a no-op.
                    continue;
                }

                let metric = source_metric(config, *source);
                debug!(
                    %prefix, source = %source, target = %target,
                    "redistributing route"
                );
                ibus_tx.redistribute_add(RedistRouteMsg {
                    target: *target,
                    origin: *source,
                    prefix: *prefix,
                    metric,
                    nexthop: *nexthop,
                });
                self.injected.insert((*target, *prefix), *source);
            }
        }

        // Withdraw injections whose source route disappeared.
        let stale = self
            .injected
            .iter()
            .filter(|((_, prefix), source)| {
                !rib.prefixes
                    .get(prefix)
                    .is_some_and(|candidates| {
                        candidates.contains_key(source)
                    })
            })
            .map(|((target, prefix), _)| (*target, *prefix))
            .collect::<Vec<_>>();
        for (target, prefix) in stale {
            debug!(%prefix, target = %target, "withdrawing redistributed route");
            ibus_tx.redistribute_del(target, prefix);
            self.injected.remove(&(target, prefix));

            // Drop the ledger entry once the prefix is gone entirely.
            if !rib.prefixes.contains_key(&prefix) {
                self.origins.remove(&prefix);
            }
        }
    }
}

// ===== helper functions =====

fn active_targets(ibus_tx: &IbusChannelsTx) -> Vec<Protocol> {
    let mut targets = vec![];
    if ibus_tx.ospf.is_some() {
        targets.push(Protocol::OSPFV2);
    }
    if ibus_tx.isis.is_some() {
        targets.push(Protocol::ISIS);
    }
    if ibus_tx.bgp.is_some() {
        targets.push(Protocol::BGP);
    }
    targets
}

// Source-dependent default injection metric.
fn source_metric(config: &RedistributionCfg, source: Protocol) -> u32 {
    match source {
        Protocol::STATIC => config.metric_static,
        Protocol::OSPFV2 => config.metric_ospf,
        Protocol::ISIS => config.metric_isis,
        Protocol::BGP => config.metric_bgp,
        _ => config.metric_static,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_utils::ibus::{IbusMsg, IbusSender};
    use arbor_utils::southbound::RouteMsg;
    use tokio::sync::mpsc;

    fn rib_with(routes: Vec<RouteMsg>) -> Rib {
        let mut rib = Rib::default();
        for msg in routes {
            let route = crate::rib::Route {
                protocol: msg.protocol,
                distance: msg.distance,
                metric: msg.metric,
                bgp_type: msg.bgp_type,
                nexthops: msg.nexthops,
            };
            rib.prefixes
                .entry(msg.prefix)
                .or_default()
                .insert(msg.protocol, route);
        }
        rib
    }

    fn route(protocol: Protocol, prefix: &str) -> RouteMsg {
        RouteMsg {
            protocol,
            prefix: prefix.parse().unwrap(),
            distance: protocol.default_distance(),
            metric: 10,
            bgp_type: None,
            nexthops: [Nexthop::Address {
                ifindex: 2,
                addr: "10.0.0.2".parse().unwrap(),
            }]
            .into(),
        }
    }

    fn channels() -> (
        IbusChannelsTx,
        mpsc::UnboundedReceiver<IbusMsg>,
        mpsc::UnboundedReceiver<IbusMsg>,
    ) {
        let (ospf_tx, ospf_rx): (IbusSender, _) = mpsc::unbounded_channel();
        let (bgp_tx, bgp_rx): (IbusSender, _) = mpsc::unbounded_channel();
        let ibus_tx = IbusChannelsTx {
            routing: None,
            ospf: Some(ospf_tx),
            isis: None,
            bgp: Some(bgp_tx),
        };
        (ibus_tx, ospf_rx, bgp_rx)
    }

    #[test]
    fn loop_free_round_trip() {
        let config = RedistributionCfg::default();
        let (ibus_tx, mut ospf_rx, mut bgp_rx) = channels();
        let mut redist = Redistribution::default();

        // A BGP-originated prefix is injected into OSPF.
        let prefix: IpNetwork = "192.168.1.0/24".parse().unwrap();
        let rib = rib_with(vec![route(Protocol::BGP, "192.168.1.0/24")]);
        redist.cycle(&config, &rib, &ibus_tx);

        assert_eq!(redist.origins.get(&prefix), Some(&Protocol::BGP));
        let msg = ospf_rx.try_recv().unwrap();
        let IbusMsg::RedistributeAdd(msg) = msg else {
            panic!("expected a redistribute add");
        };
        assert_eq!(msg.target, Protocol::OSPFV2);
        assert_eq!(msg.metric, config.metric_bgp);

        // The next cycle sees the prefix in OSPF too (the injection
        // succeeded), but never reinjects it into BGP, its origin.
        let rib = rib_with(vec![
            route(Protocol::BGP, "192.168.1.0/24"),
            route(Protocol::OSPFV2, "192.168.1.0/24"),
        ]);
        redist.cycle(&config, &rib, &ibus_tx);
        assert!(bgp_rx.try_recv().is_err());

        // And repeating the same cycle is a no-op for OSPF as well.
        redist.cycle(&config, &rib, &ibus_tx);
        assert!(ospf_rx.try_recv().is_err());
    }

    #[test]
    fn withdrawal_removes_injection() {
        let config = RedistributionCfg::default();
        let (ibus_tx, mut ospf_rx, _bgp_rx) = channels();
        let mut redist = Redistribution::default();

        let prefix: IpNetwork = "192.168.1.0/24".parse().unwrap();
        let rib = rib_with(vec![route(Protocol::BGP, "192.168.1.0/24")]);
        redist.cycle(&config, &rib, &ibus_tx);
        let _ = ospf_rx.try_recv().unwrap();

        // The source route disappears: the injected entry is withdrawn
        // and the ledger entry released.
        let rib = Rib::default();
        redist.cycle(&config, &rib, &ibus_tx);
        let msg = ospf_rx.try_recv().unwrap();
        assert!(matches!(
            msg,
            IbusMsg::RedistributeDel { target: Protocol::OSPFV2, prefix: p }
                if p == prefix
        ));
        assert!(!redist.injected.contains_key(&(Protocol::OSPFV2, prefix)));
        assert!(!redist.origins.contains_key(&prefix));
    }

    #[test]
    fn never_reinjects_into_origin() {
        let config = RedistributionCfg::default();
        let (ibus_tx, _ospf_rx, mut bgp_rx) = channels();
        let mut redist = Redistribution::default();

        // Static route first seen by the ledger as static-origin.
        let rib = rib_with(vec![route(Protocol::STATIC, "172.16.0.0/16")]);
        redist.cycle(&config, &rib, &ibus_tx);

        // Injected into BGP with the static default metric.
        let msg = bgp_rx.try_recv().unwrap();
        let IbusMsg::RedistributeAdd(msg) = msg else {
            panic!("expected a redistribute add");
        };
        assert_eq!(msg.metric, config.metric_static);

        // No matter how many cycles run, no injected entry ever targets
        // the engine recorded as the prefix's origin.
        for _ in 0..3 {
            redist.cycle(&config, &rib, &ibus_tx);
        }
        for (target, prefix) in redist.injected.keys() {
            assert_ne!(redist.origins.get(prefix), Some(target));
        }
    }
}
