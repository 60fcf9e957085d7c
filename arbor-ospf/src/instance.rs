//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arbor_protocol::{InstanceChannelsTx, ProtocolInstance};
use arbor_utils::ibus::IbusMsg;
use arbor_utils::ip::Ipv4NetworkExt;
use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};
use arbor_utils::task::{IntervalTask, TimeoutTask};
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Span, debug_span};

use crate::debug::Debug;
use crate::error::Error;
use crate::events;
use crate::interface::{Interface, InterfaceCfg, ism};
use crate::lsdb::{self, Lsdb, LsaOriginateEvent, Neighbors};
use crate::neighbor::nsm;
use crate::packet::lsa::LsaHdr;
use crate::spf::{self, PathType, SpfInterface, SpfNeighbor, SpfNexthop, SpfRoute};
use crate::tasks::{
    self, ProtocolInputChannelsRx, ProtocolInputChannelsTx,
    messages::input::{CommandMsg, ProtocolInputMsg},
};

// OSPF instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceCfg {
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub spf_delay: u64,
    pub spf_interval: u64,
    pub interfaces: BTreeMap<String, InterfaceCfg>,
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
    pub interfaces: BTreeMap<String, Interface>,
    pub neighbors: Neighbors,
    pub lsdb: Lsdb,
    pub routes: BTreeMap<Ipv4Network, SpfRoute>,
    pub spf: SpfScheduler,
    // Prefixes injected by the redistribution fabric.
    pub redistributed: BTreeSet<Ipv4Network>,
    pub statistics: MessageCounters,
    pub tasks: InstanceTasks,
}

// SPF scheduling state: runs are coalesced within `spf_delay` and rate
// limited by `spf_interval`.
#[derive(Debug, Default)]
pub struct SpfScheduler {
    pub delay_timer: Option<TimeoutTask>,
    pub last_run: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct InstanceTasks {
    pub lsdb_age_tick: Option<IntervalTask>,
}

// Per-packet-type message counters.
#[derive(Debug, Default)]
pub struct MessageCounters {
    rx_hello: AtomicU64,
    rx_dbdesc: AtomicU64,
    rx_lsreq: AtomicU64,
    rx_lsupd: AtomicU64,
    rx_lsack: AtomicU64,
    rx_errors: AtomicU64,
    tx_hello: AtomicU64,
    tx_dbdesc: AtomicU64,
    tx_lsreq: AtomicU64,
    tx_lsupd: AtomicU64,
    tx_lsack: AtomicU64,
}

// Borrowed view of a running instance, passed to the event handlers.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub router_id: Ipv4Addr,
    pub config: &'a InstanceCfg,
    pub statistics: &'a MessageCounters,
    pub tx: &'a InstanceChannelsTx<Instance>,
}

//
// Observation snapshots.
//

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceStatus {
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub interfaces: usize,
    pub neighbors: usize,
    pub neighbors_full: usize,
    pub lsdb_entries: usize,
    pub routes: usize,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceSummary {
    pub name: String,
    pub state: ism::State,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborSummary {
    pub interface: String,
    pub router_id: Ipv4Addr,
    pub address: Ipv4Addr,
    pub state: nsm::State,
    pub uptime_secs: Option<u64>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteSummary {
    pub prefix: Ipv4Network,
    pub path_type: PathType,
    pub metric: u32,
    pub nexthop: Option<Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct MessageStats {
    pub rx_hello: u64,
    pub rx_dbdesc: u64,
    pub rx_lsreq: u64,
    pub rx_lsupd: u64,
    pub rx_lsack: u64,
    pub rx_errors: u64,
    pub tx_hello: u64,
    pub tx_dbdesc: u64,
    pub tx_lsreq: u64,
    pub tx_lsupd: u64,
    pub tx_lsack: u64,
}

// ===== impl MessageCounters =====

impl MessageCounters {
    pub(crate) fn rx_hello(&self) {
        self.rx_hello.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_dbdesc(&self) {
        self.rx_dbdesc.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_lsreq(&self) {
        self.rx_lsreq.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_lsupd(&self) {
        self.rx_lsupd.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_lsack(&self) {
        self.rx_lsack.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_errors(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_hello(&self) {
        self.tx_hello.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_dbdesc(&self) {
        self.tx_dbdesc.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_lsreq(&self) {
        self.tx_lsreq.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_lsupd(&self) {
        self.tx_lsupd.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_lsack(&self) {
        self.tx_lsack.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MessageStats {
        MessageStats {
            rx_hello: self.rx_hello.load(Ordering::Relaxed),
            rx_dbdesc: self.rx_dbdesc.load(Ordering::Relaxed),
            rx_lsreq: self.rx_lsreq.load(Ordering::Relaxed),
            rx_lsupd: self.rx_lsupd.load(Ordering::Relaxed),
            rx_lsack: self.rx_lsack.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_hello: self.tx_hello.load(Ordering::Relaxed),
            tx_dbdesc: self.tx_dbdesc.load(Ordering::Relaxed),
            tx_lsreq: self.tx_lsreq.load(Ordering::Relaxed),
            tx_lsupd: self.tx_lsupd.load(Ordering::Relaxed),
            tx_lsack: self.tx_lsack.load(Ordering::Relaxed),
        }
    }
}

// ===== impl Instance =====

impl Instance {
    // Splits the instance into a borrowed view and its mutable state
    // collections, so event handlers can borrow them independently.
    fn split(
        &mut self,
    ) -> (
        InstanceUpView<'_>,
        &mut BTreeMap<String, Interface>,
        &mut Neighbors,
        &mut Lsdb,
        &mut SpfScheduler,
        &mut BTreeMap<Ipv4Network, SpfRoute>,
    ) {
        let InstanceState {
            interfaces,
            neighbors,
            lsdb,
            routes,
            spf,
            statistics,
            ..
        } = &mut self.state;
        let instance = InstanceUpView {
            name: &self.name,
            router_id: self.config.router_id,
            config: &self.config,
            statistics,
            tx: &self.tx,
        };
        (instance, interfaces, neighbors, lsdb, spf, routes)
    }

    fn process_spf_schedule(&mut self) {
        if self.state.spf.delay_timer.is_some() {
            // An SPF run is already pending.
            return;
        }
        let delay = Duration::from_secs(self.config.spf_delay);
        let task = tasks::spf_delay_timer(
            self.tx.protocol_input.event.clone(),
            delay,
        );
        self.state.spf.delay_timer = Some(task);
    }

    fn process_spf_delay_timer(&mut self) {
        // Enforce the minimum hold-down between successive runs.
        if let Some(last_run) = self.state.spf.last_run {
            let hold = Duration::from_secs(self.config.spf_interval);
            let elapsed = last_run.elapsed();
            if elapsed < hold {
                let task = tasks::spf_delay_timer(
                    self.tx.protocol_input.event.clone(),
                    hold - elapsed,
                );
                self.state.spf.delay_timer = Some(task);
                return;
            }
        }
        self.state.spf.delay_timer = None;
        self.run_spf();
    }

    // Runs SPF on a snapshot of the LSDB and synchronizes the computed
    // routes with the routing component.
    fn run_spf(&mut self) {
        Debug::SpfStart.log();
        let start = Instant::now();

        // Take a consistent snapshot of the LSDB and of the local
        // interface/neighbor tables.
        let lsas = self
            .state
            .lsdb
            .iter()
            .map(|(_, lse)| lse.data.clone())
            .collect::<Vec<_>>();
        let interfaces = self
            .state
            .interfaces
            .values()
            .filter(|iface| iface.state.ism_state != ism::State::Down)
            .map(|iface| SpfInterface {
                name: iface.name.clone(),
                ifindex: iface.config.ifindex,
                addr: iface.config.addr,
            })
            .collect::<Vec<_>>();
        let neighbors = self
            .state
            .neighbors
            .iter()
            .flat_map(|(ifname, iface_nbrs)| {
                let interfaces = &self.state.interfaces;
                iface_nbrs
                    .values()
                    .filter(|nbr| nbr.state == nsm::State::Full)
                    .filter_map(move |nbr| {
                        let iface = interfaces.get(ifname)?;
                        Some(SpfNeighbor {
                            router_id: nbr.router_id,
                            src: nbr.src,
                            ifname: ifname.clone(),
                            ifindex: iface.config.ifindex,
                        })
                    })
            })
            .collect::<Vec<_>>();

        let new_routes =
            spf::run(self.config.router_id, &lsas, &interfaces, &neighbors);

        // Withdraw routes that are gone.
        for prefix in self.state.routes.keys() {
            if !new_routes.contains_key(prefix) {
                self.tx.ibus.route_del(RouteKeyMsg {
                    protocol: Protocol::OSPFV2,
                    prefix: IpNetwork::V4(*prefix),
                });
            }
        }

        // Announce new and changed routes.
        for (prefix, route) in &new_routes {
            if self.state.routes.get(prefix) == Some(route) {
                continue;
            }
            self.tx.ibus.route_add(route_msg(*prefix, route));

            // Host routes feed the IGP cost used by the BGP decision
            // process.
            if prefix.is_host_prefix() {
                self.tx.ibus.nexthop_cost_upd(
                    IpAddr::V4(prefix.ip()),
                    Some(route.metric),
                );
            }
        }
        for prefix in self.state.routes.keys() {
            if !new_routes.contains_key(prefix) && prefix.is_host_prefix() {
                self.tx.ibus.nexthop_cost_upd(IpAddr::V4(prefix.ip()), None);
            }
        }

        self.state.routes = new_routes;
        self.state.spf.last_run = Some(Instant::now());
        Debug::SpfFinish(start.elapsed().as_micros() as u32).log();
    }

    fn process_command(&mut self, command: CommandMsg) {
        match command {
            CommandMsg::Status(responder) => {
                let neighbors = self
                    .state
                    .neighbors
                    .values()
                    .flat_map(|iface_nbrs| iface_nbrs.values())
                    .count();
                let neighbors_full = self
                    .state
                    .neighbors
                    .values()
                    .flat_map(|iface_nbrs| iface_nbrs.values())
                    .filter(|nbr| nbr.state == nsm::State::Full)
                    .count();
                let _ = responder.send(InstanceStatus {
                    router_id: self.config.router_id,
                    area_id: self.config.area_id,
                    interfaces: self.state.interfaces.len(),
                    neighbors,
                    neighbors_full,
                    lsdb_entries: self.state.lsdb.len(),
                    routes: self.state.routes.len(),
                });
            }
            CommandMsg::Interfaces(responder) => {
                let interfaces = self
                    .state
                    .interfaces
                    .values()
                    .map(|iface| InterfaceSummary {
                        name: iface.name.clone(),
                        state: iface.state.ism_state,
                        dr: iface.state.dr,
                        bdr: iface.state.bdr,
                    })
                    .collect();
                let _ = responder.send(interfaces);
            }
            CommandMsg::Neighbors(responder) => {
                let neighbors = self
                    .state
                    .neighbors
                    .iter()
                    .flat_map(|(ifname, iface_nbrs)| {
                        iface_nbrs.values().map(move |nbr| NeighborSummary {
                            interface: ifname.clone(),
                            router_id: nbr.router_id,
                            address: nbr.src,
                            state: nbr.state,
                            uptime_secs: nbr
                                .last_full
                                .map(|instant| instant.elapsed().as_secs()),
                        })
                    })
                    .collect();
                let _ = responder.send(neighbors);
            }
            CommandMsg::Lsdb(responder) => {
                let lsa_hdrs = self
                    .state
                    .lsdb
                    .iter()
                    .map(|(_, lse)| {
                        let mut hdr = lse.data.hdr;
                        hdr.age = lse.data.age();
                        hdr
                    })
                    .collect::<Vec<LsaHdr>>();
                let _ = responder.send(lsa_hdrs);
            }
            CommandMsg::Routes(responder) => {
                let routes = self
                    .state
                    .routes
                    .iter()
                    .map(|(prefix, route)| RouteSummary {
                        prefix: *prefix,
                        path_type: route.path_type,
                        metric: route.metric,
                        nexthop: match &route.nexthop {
                            SpfNexthop::Address { addr, .. } => Some(*addr),
                            _ => None,
                        },
                    })
                    .collect();
                let _ = responder.send(routes);
            }
            CommandMsg::Stats(responder) => {
                let _ = responder.send(self.state.statistics.snapshot());
            }
        }
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::OSPFV2;

    type Config = InstanceCfg;
    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        config: InstanceCfg,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        let mut state = InstanceState::default();
        for (ifname, iface_cfg) in &config.interfaces {
            state.interfaces.insert(
                ifname.clone(),
                Interface::new(ifname.clone(), iface_cfg.clone()),
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

        // Start the LSDB aging task.
        let task =
            tasks::lsdb_age_tick(self.tx.protocol_input.event.clone());
        self.state.tasks.lsdb_age_tick = Some(task);

        // Start interfaces.
        let (instance, interfaces, ..) = self.split();
        for iface in interfaces.values_mut() {
            if let Err(error) = iface.start(&instance) {
                error.log();
            }
        }

        // Originate the initial Router-LSA.
        self.tx
            .protocol_input
            .lsa_orig_event(LsaOriginateEvent::InstanceStart);
    }

    fn shutdown(mut self) {
        Debug::InstanceStop.log();

        // Flush self-originated LSAs so peers reconverge without waiting
        // for MaxAge.
        let (instance, interfaces, neighbors, lsdb, ..) = self.split();
        lsdb::flush_all_self_originated(
            &instance, lsdb, interfaces, neighbors,
        );

        // Withdraw all computed routes.
        for prefix in self.state.routes.keys() {
            self.tx.ibus.route_del(RouteKeyMsg {
                protocol: Protocol::OSPFV2,
                prefix: IpNetwork::V4(*prefix),
            });
        }
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        match msg {
            IbusMsg::RedistributeAdd(msg) => {
                let IpNetwork::V4(prefix) = msg.prefix else {
                    return;
                };
                let fwd_addr = match msg.nexthop {
                    Some(IpAddr::V4(addr)) => Some(addr),
                    _ => None,
                };
                self.state.redistributed.insert(prefix);
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                lsdb::originate_external_lsa(
                    &instance, lsdb, interfaces, neighbors, prefix,
                    msg.metric, fwd_addr,
                );
            }
            IbusMsg::RedistributeDel { prefix, .. } => {
                let IpNetwork::V4(prefix) = prefix else {
                    return;
                };
                self.state.redistributed.remove(&prefix);
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                lsdb::flush_external_lsa(
                    &instance, lsdb, interfaces, neighbors, prefix,
                );
            }
            _ => (),
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolInputMsg::NetRxPacket(msg) => {
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                if let Err(error) = events::process_packet(
                    &instance, interfaces, neighbors, lsdb, msg,
                ) {
                    error.log();
                }
            }
            ProtocolInputMsg::HelloInterval(msg) => {
                let (instance, interfaces, neighbors, ..) = self.split();
                if let Some(iface) = interfaces.get(&msg.ifname) {
                    let empty = BTreeMap::new();
                    let iface_nbrs =
                        neighbors.get(&msg.ifname).unwrap_or(&empty);
                    iface.send_hello(iface_nbrs, &instance);
                }
            }
            ProtocolInputMsg::IsmEvent(msg) => {
                let (instance, interfaces, neighbors, ..) = self.split();
                if let Some(iface) = interfaces.get_mut(&msg.ifname) {
                    let iface_nbrs =
                        neighbors.entry(msg.ifname.clone()).or_default();
                    iface.fsm(iface_nbrs, &instance, msg.event);
                }
            }
            ProtocolInputMsg::NsmEvent(msg) => {
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                if let Some(iface) = interfaces.get_mut(&msg.ifname)
                    && let Some(iface_nbrs) = neighbors.get_mut(&msg.ifname)
                {
                    if let Some(nbr) = iface_nbrs.get_mut(&msg.router_id) {
                        nbr.fsm(iface, &instance, lsdb, msg.event);
                        // Purge neighbors that went down.
                        if nbr.state == nsm::State::Down {
                            iface_nbrs.remove(&msg.router_id);
                        }
                    }
                }
            }
            ProtocolInputMsg::RxmtInterval(msg) => {
                let (instance, interfaces, neighbors, ..) = self.split();
                events::process_rxmt_interval(
                    &instance, interfaces, neighbors, msg,
                );
            }
            ProtocolInputMsg::LsaOrigEvent(msg) => {
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                lsdb::process_originate_event(
                    &instance, lsdb, interfaces, neighbors, msg.event,
                );
            }
            ProtocolInputMsg::LsdbAgeTick => {
                let (instance, interfaces, neighbors, lsdb, ..) =
                    self.split();
                lsdb::age_tick(&instance, lsdb, interfaces, neighbors);
            }
            ProtocolInputMsg::SpfSchedule => {
                self.process_spf_schedule();
            }
            ProtocolInputMsg::SpfDelayTimer => {
                self.process_spf_delay_timer();
            }
            ProtocolInputMsg::Command(command) => {
                self.process_command(command);
            }
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (net_packet_rxp, net_packet_rxc) = mpsc::channel(64);
        let (eventp, eventc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            net_packet_rx: net_packet_rxp,
            event: eventp,
        };
        let rx = ProtocolInputChannelsRx {
            net_packet_rx: net_packet_rxc,
            event: eventc,
        };

        (tx, rx)
    }

    fn debug_span(name: &str) -> Span {
        debug_span!("ospf-instance", %name)
    }
}

// ===== helper functions =====

fn route_msg(prefix: Ipv4Network, route: &SpfRoute) -> RouteMsg {
    let nexthop = match &route.nexthop {
        SpfNexthop::Connected { ifindex, .. } => {
            Nexthop::Interface { ifindex: *ifindex }
        }
        SpfNexthop::Address { ifindex, addr, .. } => Nexthop::Address {
            ifindex: *ifindex,
            addr: IpAddr::V4(*addr),
        },
        SpfNexthop::Unresolved { router_id } => {
            Nexthop::Unresolved { router_id: *router_id }
        }
    };

    RouteMsg {
        protocol: Protocol::OSPFV2,
        prefix: IpNetwork::V4(prefix),
        distance: Protocol::OSPFV2.default_distance(),
        metric: route.metric,
        bgp_type: None,
        nexthops: [nexthop].into(),
    }
}
