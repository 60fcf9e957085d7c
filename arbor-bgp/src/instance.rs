//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use arbor_protocol::{InstanceChannelsTx, ProtocolInstance};
use arbor_utils::ibus::IbusMsg;
use arbor_utils::protocol::Protocol;
use arbor_utils::socket::TcpListener;
use arbor_utils::task::Task;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Span, debug_span};

use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::events::{self, Neighbors};
use crate::neighbor::{Neighbor, NeighborCfg, PeerType, fsm};
use crate::network;
use crate::packet::attribute::Attrs;
use crate::packet::consts::Origin;
use crate::policy::{DampingCfg, DampingState, RpkiCfg};
use crate::rib::{BestPathSource, Rib};
use crate::tasks::{
    self, ProtocolInputChannelsRx, ProtocolInputChannelsTx,
    messages::input::{CommandMsg, ProtocolInputMsg},
};

// BGP instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceCfg {
    pub asn: u32,
    pub router_id: Ipv4Addr,
    pub listen_addr: IpAddr,
    pub listen_port: u16,
    pub networks: Vec<IpNetwork>,
    pub neighbors: BTreeMap<IpAddr, NeighborCfg>,
    // Route reflector clients, derived from the neighbor configurations.
    #[serde(default)]
    pub rr_clients: BTreeSet<IpAddr>,
    pub damping: DampingCfg,
    pub rpki: RpkiCfg,
}

#[derive(Debug)]
pub struct Instance {
    pub name: String,
    pub config: InstanceCfg,
    pub state: InstanceState,
    pub tx: InstanceChannelsTx<Instance>,
}

#[derive(Debug, Default)]
pub struct InstanceState {
    pub neighbors: Neighbors,
    pub rib: Rib,
    pub damping: DampingState,
    // IGP cost to each known next-hop, fed by the IGP engines through the
    // ibus.
    pub igp_costs: BTreeMap<IpAddr, u32>,
    pub listener: Option<Arc<TcpListener>>,
    pub tasks: InstanceTasks,
}

#[derive(Debug, Default)]
pub struct InstanceTasks {
    pub tcp_listener: Option<Task<()>>,
}

// Borrowed view of a running instance, passed to the event handlers.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub tx: &'a InstanceChannelsTx<Instance>,
}

//
// Observation snapshots.
//

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceStatus {
    pub asn: u32,
    pub router_id: Ipv4Addr,
    pub neighbors: usize,
    pub neighbors_established: usize,
    pub rib_entries: usize,
    pub loc_rib_routes: usize,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborSummary {
    pub address: IpAddr,
    pub remote_as: u32,
    pub state: fsm::State,
    pub uptime_secs: Option<u64>,
    pub msgs_rcvd: u64,
    pub msgs_sent: u64,
    pub prefixes_rcvd: usize,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RibEntrySummary {
    pub prefix: IpNetwork,
    pub best: bool,
    pub peer: Option<IpAddr>,
    pub as_path: Vec<u32>,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
    pub nexthop: Option<Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct MessageStats {
    pub msgs_rcvd: u64,
    pub msgs_sent: u64,
    pub updates_rcvd: u64,
    pub updates_sent: u64,
    pub notifications_rcvd: u64,
    pub notifications_sent: u64,
}

// ===== impl Instance =====

impl Instance {
    // Splits the instance into a borrowed view and its mutable state
    // collections, so event handlers can borrow them independently.
    fn split(
        &mut self,
    ) -> (
        InstanceUpView<'_>,
        &mut Neighbors,
        &mut Rib,
        &mut DampingState,
        &mut BTreeMap<IpAddr, u32>,
    ) {
        let InstanceState {
            neighbors,
            rib,
            damping,
            igp_costs,
            ..
        } = &mut self.state;
        let instance = InstanceUpView {
            name: &self.name,
            config: &self.config,
            tx: &self.tx,
        };
        (instance, neighbors, rib, damping, igp_costs)
    }

    fn process_command(&mut self, command: CommandMsg) {
        match command {
            CommandMsg::Status(responder) => {
                let neighbors_established = self
                    .state
                    .neighbors
                    .values()
                    .filter(|nbr| nbr.state == fsm::State::Established)
                    .count();
                let loc_rib_routes = self
                    .state
                    .rib
                    .destinations
                    .values()
                    .filter(|dest| dest.best.is_some())
                    .count();
                let _ = responder.send(InstanceStatus {
                    asn: self.config.asn,
                    router_id: self.config.router_id,
                    neighbors: self.state.neighbors.len(),
                    neighbors_established,
                    rib_entries: self.state.rib.destinations.len(),
                    loc_rib_routes,
                });
            }
            CommandMsg::Neighbors(responder) => {
                let neighbors = self
                    .state
                    .neighbors
                    .values()
                    .map(|nbr| NeighborSummary {
                        address: nbr.remote_addr,
                        remote_as: nbr.config.remote_as,
                        state: nbr.state,
                        uptime_secs: nbr
                            .last_established
                            .map(|instant| instant.elapsed().as_secs()),
                        msgs_rcvd: nbr.statistics.msgs_rcvd,
                        msgs_sent: nbr.statistics.msgs_sent,
                        prefixes_rcvd: self
                            .state
                            .rib
                            .destinations
                            .values()
                            .filter(|dest| {
                                dest.adj_rib
                                    .get(&nbr.remote_addr)
                                    .is_some_and(|adj_rib| {
                                        adj_rib.in_.is_some()
                                    })
                            })
                            .count(),
                    })
                    .collect();
                let _ = responder.send(neighbors);
            }
            CommandMsg::Rib(responder) => {
                let mut entries = vec![];
                for (prefix, dest) in &self.state.rib.destinations {
                    let best_peer = dest.best.as_ref().and_then(|best| {
                        match &best.source {
                            BestPathSource::Neighbor { peer_addr, .. } => {
                                Some(*peer_addr)
                            }
                            BestPathSource::Local => None,
                        }
                    });
                    if let Some(local) = &dest.local {
                        entries.push(RibEntrySummary {
                            prefix: *prefix,
                            best: matches!(
                                dest.best.as_ref().map(|best| &best.source),
                                Some(BestPathSource::Local)
                            ),
                            peer: None,
                            as_path: local.attrs.base.as_path.iter().collect(),
                            local_pref: local.attrs.base.local_pref,
                            med: local.attrs.base.med,
                            nexthop: local.attrs.base.nexthop,
                        });
                    }
                    for (peer_addr, adj_rib) in &dest.adj_rib {
                        let Some(route) = &adj_rib.in_ else {
                            continue;
                        };
                        entries.push(RibEntrySummary {
                            prefix: *prefix,
                            best: best_peer == Some(*peer_addr),
                            peer: Some(*peer_addr),
                            as_path: route.attrs.base.as_path.iter().collect(),
                            local_pref: route.attrs.base.local_pref,
                            med: route.attrs.base.med,
                            nexthop: route.attrs.base.nexthop,
                        });
                    }
                }
                let _ = responder.send(entries);
            }
            CommandMsg::Stats(responder) => {
                let mut stats = MessageStats::default();
                for nbr in self.state.neighbors.values() {
                    stats.msgs_rcvd += nbr.statistics.msgs_rcvd;
                    stats.msgs_sent += nbr.statistics.msgs_sent;
                    stats.updates_rcvd += nbr.statistics.updates_rcvd;
                    stats.updates_sent += nbr.statistics.updates_sent;
                    stats.notifications_rcvd +=
                        nbr.statistics.notifications_rcvd;
                    stats.notifications_sent +=
                        nbr.statistics.notifications_sent;
                }
                let _ = responder.send(stats);
            }
            CommandMsg::OriginatePrefix(prefix) => {
                self.originate_local(prefix, Protocol::BGP, None);
            }
            CommandMsg::WithdrawPrefix(prefix) => {
                let (instance, neighbors, rib, ..) = self.split();
                events::withdraw_prefix(&instance, neighbors, rib, prefix);
            }
        }
    }

    // Originates a locally sourced prefix into the Loc-RIB.
    fn originate_local(
        &mut self,
        prefix: IpNetwork,
        origin_protocol: Protocol,
        med: Option<u32>,
    ) {
        let mut attrs = Attrs::default();
        attrs.base.origin = match origin_protocol {
            Protocol::BGP => Origin::Igp,
            _ => Origin::Incomplete,
        };
        attrs.base.local_pref = Some(crate::rib::DFLT_LOCAL_PREF);
        attrs.base.med = med;

        let (instance, neighbors, rib, ..) = self.split();
        events::originate_prefix(
            &instance,
            neighbors,
            rib,
            prefix,
            attrs,
            origin_protocol,
        );
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::BGP;

    type Config = InstanceCfg;
    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        mut config: InstanceCfg,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        // Derive the set of route reflector clients.
        config.rr_clients = config
            .neighbors
            .iter()
            .filter(|(_, nbr_cfg)| nbr_cfg.rr_client)
            .map(|(addr, _)| *addr)
            .collect();

        let mut state = InstanceState::default();
        for (addr, nbr_cfg) in &config.neighbors {
            let peer_type = match nbr_cfg.remote_as == config.asn {
                true => PeerType::Internal,
                false => PeerType::External,
            };
            state.neighbors.insert(
                *addr,
                Neighbor::new(*addr, nbr_cfg.clone(), peer_type),
            );
        }

        Instance {
            name,
            config,
            state,
            tx,
        }
    }

    fn init(&mut self) {
        Debug::InstanceStart.log();

        // Bind the listening socket and start accepting connections. A
        // bind failure is fatal for the instance.
        match network::listen_socket(
            self.config.listen_addr,
            self.config.listen_port,
        ) {
            Ok(listener) => {
                // Register the per-peer MD5 keys on the listening socket.
                for (addr, nbr_cfg) in &self.config.neighbors {
                    if nbr_cfg.md5_key.is_some() {
                        network::listen_socket_md5sig_update(
                            &listener,
                            addr,
                            nbr_cfg.md5_key.as_deref(),
                        );
                    }
                }

                let listener = Arc::new(listener);
                self.state.tasks.tcp_listener = Some(tasks::tcp_listener(
                    listener.clone(),
                    self.tx.protocol_input.session.clone(),
                ));
                self.state.listener = Some(listener);
            }
            Err(error) => {
                Error::InstanceStartError(Box::new(
                    IoError::ListenError(error).into(),
                ))
                .log();
            }
        }

        // Originate the configured networks.
        for prefix in self.config.networks.clone() {
            self.originate_local(prefix, Protocol::BGP, None);
        }

        // Start all configured sessions.
        let (instance, neighbors, ..) = self.split();
        for nbr in neighbors.values_mut() {
            nbr.fsm_event(&instance, fsm::Event::Start);
        }
    }

    fn shutdown(mut self) {
        Debug::InstanceStop.log();

        // Close all sessions with an administrative shutdown NOTIFICATION.
        let (instance, neighbors, rib, ..) = self.split();
        let addrs = neighbors.keys().copied().collect::<Vec<_>>();
        for addr in addrs {
            let nbr = neighbors.get_mut(&addr).unwrap();
            if nbr.state >= fsm::State::OpenSent {
                nbr.fsm_event(
                    &instance,
                    fsm::Event::Stop(Some(Neighbor::shutdown_notification())),
                );
            }
        }

        // Withdraw the Loc-RIB from the routing component.
        for (prefix, dest) in &rib.destinations {
            if dest
                .best
                .as_ref()
                .is_some_and(|best| {
                    matches!(best.source, BestPathSource::Neighbor { .. })
                })
            {
                instance.tx.ibus.route_del(
                    arbor_utils::southbound::RouteKeyMsg {
                        protocol: Protocol::BGP,
                        prefix: *prefix,
                    },
                );
            }
        }
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        match msg {
            IbusMsg::RedistributeAdd(msg) => {
                self.originate_local(
                    msg.prefix,
                    msg.origin,
                    Some(msg.metric),
                );
            }
            IbusMsg::RedistributeDel { prefix, .. } => {
                let (instance, neighbors, rib, ..) = self.split();
                events::withdraw_prefix(&instance, neighbors, rib, prefix);
            }
            IbusMsg::NexthopCostUpd { addr, metric } => {
                match metric {
                    Some(metric) => {
                        self.state.igp_costs.insert(addr, metric);
                    }
                    None => {
                        self.state.igp_costs.remove(&addr);
                    }
                }
            }
            _ => (),
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolInputMsg::TcpAccept(msg) => {
                let (instance, neighbors, rib, damping, _) = self.split();
                events::process_tcp_accept(
                    &instance, neighbors, rib, damping, msg,
                );
            }
            ProtocolInputMsg::TcpConnect(msg) => {
                let (instance, neighbors, rib, damping, _) = self.split();
                events::process_tcp_connect(
                    &instance, neighbors, rib, damping, msg,
                );
            }
            ProtocolInputMsg::TcpConnFail(nbr_addr) => {
                let (instance, neighbors, rib, damping, _) = self.split();
                events::process_tcp_conn_fail(
                    &instance, neighbors, rib, damping, nbr_addr,
                );
            }
            ProtocolInputMsg::NbrRx(msg) => {
                let (instance, neighbors, rib, damping, igp_costs) =
                    self.split();
                if let Err(error) = events::process_nbr_msg(
                    &instance, neighbors, rib, damping, igp_costs, msg,
                ) {
                    error.log();
                }
            }
            ProtocolInputMsg::NbrTimer(msg) => {
                let (instance, neighbors, rib, damping, _) = self.split();
                events::process_nbr_timer(
                    &instance, neighbors, rib, damping, msg,
                );
            }
            ProtocolInputMsg::Command(command) => {
                self.process_command(command);
            }
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (sessionp, sessionc) = mpsc::channel(64);
        let (eventp, eventc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            session: sessionp,
            event: eventp,
        };
        let rx = ProtocolInputChannelsRx {
            session: sessionc,
            event: eventc,
        };

        (tx, rx)
    }

    fn debug_span(name: &str) -> Span {
        debug_span!("bgp-instance", %name)
    }
}
