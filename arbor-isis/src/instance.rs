//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arbor_protocol::{InstanceChannelsTx, ProtocolInstance};
use arbor_utils::ibus::IbusMsg;
use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{Nexthop, RouteKeyMsg, RouteMsg};
use arbor_utils::task::IntervalTask;
use arbor_utils::task::TimeoutTask;
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Span, debug_span};

use crate::adjacency::AdjacencyState;
use crate::debug::Debug;
use crate::events;
use crate::interface::{Interface, InterfaceCfg, Interfaces};
use crate::lsdb::{self, Lsdb};
use crate::packet::{
    AreaAddr, LevelNumber, LevelType, Levels, LspId, SystemId,
};
use crate::spf::{
    self, SpfAdjacency, SpfInterface, SpfNexthop, SpfRoute,
};
use crate::tasks::{
    self, ProtocolInputChannelsRx, ProtocolInputChannelsTx,
    messages::input::{CommandMsg, ProtocolInputMsg},
};

// IS-IS instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InstanceCfg {
    pub system_id: SystemId,
    pub area_addrs: Vec<AreaAddr>,
    pub level_type: LevelType,
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
    pub interfaces: Interfaces,
    pub lsdb: Levels<Lsdb>,
    pub level_routes: Levels<BTreeMap<Ipv4Network, SpfRoute>>,
    pub routes: BTreeMap<Ipv4Network, SpfRoute>,
    pub spf: Levels<SpfScheduler>,
    // Prefixes injected by the redistribution fabric, with their metrics.
    pub redistributed: BTreeMap<Ipv4Network, u32>,
    pub statistics: MessageCounters,
    pub tasks: InstanceTasks,
}

// SPF scheduling state, per level.
#[derive(Debug, Default)]
pub struct SpfScheduler {
    pub delay_timer: Option<TimeoutTask>,
    pub last_run: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct InstanceTasks {
    pub lsdb_age_tick: Option<IntervalTask>,
}

// Per-PDU-type message counters.
#[derive(Debug, Default)]
pub struct MessageCounters {
    rx_hello: AtomicU64,
    rx_lsp: AtomicU64,
    rx_snp: AtomicU64,
    rx_errors: AtomicU64,
    tx_hello: AtomicU64,
    tx_lsp: AtomicU64,
    tx_snp: AtomicU64,
}

// Borrowed view of a running instance, passed to the event handlers.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
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
    pub system_id: SystemId,
    pub level_type: LevelType,
    pub interfaces: usize,
    pub adjacencies: usize,
    pub adjacencies_up: usize,
    pub lsdb_l1_entries: usize,
    pub lsdb_l2_entries: usize,
    pub routes: usize,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceSummary {
    pub name: String,
    pub active: bool,
    pub dis_l1: Option<String>,
    pub dis_l2: Option<String>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct AdjacencySummary {
    pub interface: String,
    pub system_id: SystemId,
    pub level: LevelType,
    pub state: AdjacencyState,
    pub holdtime: u16,
    pub uptime_secs: Option<u64>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct LspSummary {
    pub level: LevelNumber,
    pub lsp_id: String,
    pub seqno: u32,
    pub cksum: u16,
    pub rem_lifetime: u16,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteSummary {
    pub prefix: Ipv4Network,
    pub level: LevelNumber,
    pub metric: u32,
    pub nexthop: Option<std::net::Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, Default)]
#[derive(Deserialize, Serialize)]
pub struct MessageStats {
    pub rx_hello: u64,
    pub rx_lsp: u64,
    pub rx_snp: u64,
    pub rx_errors: u64,
    pub tx_hello: u64,
    pub tx_lsp: u64,
    pub tx_snp: u64,
}

// ===== impl MessageCounters =====

impl MessageCounters {
    pub(crate) fn rx_hello(&self) {
        self.rx_hello.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_lsp(&self) {
        self.rx_lsp.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_snp(&self) {
        self.rx_snp.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn rx_errors(&self) {
        self.rx_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_hello(&self) {
        self.tx_hello.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_lsp(&self) {
        self.tx_lsp.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn tx_snp(&self) {
        self.tx_snp.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MessageStats {
        MessageStats {
            rx_hello: self.rx_hello.load(Ordering::Relaxed),
            rx_lsp: self.rx_lsp.load(Ordering::Relaxed),
            rx_snp: self.rx_snp.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_hello: self.tx_hello.load(Ordering::Relaxed),
            tx_lsp: self.tx_lsp.load(Ordering::Relaxed),
            tx_snp: self.tx_snp.load(Ordering::Relaxed),
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
        &mut Interfaces,
        &mut Levels<Lsdb>,
        &mut BTreeMap<Ipv4Network, u32>,
    ) {
        let InstanceState {
            interfaces,
            lsdb,
            redistributed,
            statistics,
            ..
        } = &mut self.state;
        let instance = InstanceUpView {
            name: &self.name,
            config: &self.config,
            statistics,
            tx: &self.tx,
        };
        (instance, interfaces, lsdb, redistributed)
    }

    fn process_spf_schedule(&mut self, level: LevelNumber) {
        if self.state.spf.get(level).delay_timer.is_some() {
            return;
        }
        let delay = Duration::from_secs(self.config.spf_delay);
        let task = tasks::spf_delay_timer(
            self.tx.protocol_input.event.clone(),
            level,
            delay,
        );
        self.state.spf.get_mut(level).delay_timer = Some(task);
    }

    fn process_spf_delay_timer(&mut self, level: LevelNumber) {
        if let Some(last_run) = self.state.spf.get(level).last_run {
            let hold = Duration::from_secs(self.config.spf_interval);
            let elapsed = last_run.elapsed();
            if elapsed < hold {
                let task = tasks::spf_delay_timer(
                    self.tx.protocol_input.event.clone(),
                    level,
                    hold - elapsed,
                );
                self.state.spf.get_mut(level).delay_timer = Some(task);
                return;
            }
        }
        self.state.spf.get_mut(level).delay_timer = None;
        self.run_spf(level);
    }

    // Runs SPF for one level on a snapshot of the LSDB, then merges the
    // level tables and synchronizes the result with the routing
    // component.
    fn run_spf(&mut self, level: LevelNumber) {
        Debug::SpfStart(level).log();
        let start = Instant::now();

        let lsps = self
            .state
            .lsdb
            .get(level)
            .iter()
            .map(|(_, lse)| lse.data.clone())
            .collect::<Vec<_>>();
        let interfaces = self
            .state
            .interfaces
            .values()
            .filter(|iface| iface.state.active)
            .map(|iface| SpfInterface {
                name: iface.name.clone(),
                ifindex: iface.config.ifindex,
                addr: iface.config.addr,
            })
            .collect::<Vec<_>>();
        let adjacencies = self
            .state
            .interfaces
            .values()
            .flat_map(|iface| {
                iface
                    .state
                    .adjacencies
                    .values()
                    .filter(|adj| adj.state == AdjacencyState::Up)
                    .filter(|adj| adj.level_usage.intersects(level))
                    .map(|adj| SpfAdjacency {
                        system_id: adj.system_id,
                        addr: adj.ipv4_addrs.first().copied(),
                        ifname: iface.name.clone(),
                        ifindex: iface.config.ifindex,
                    })
            })
            .collect::<Vec<_>>();

        let level_routes = spf::run(
            level,
            self.config.system_id,
            &lsps,
            &interfaces,
            &adjacencies,
        );
        *self.state.level_routes.get_mut(level) = level_routes;

        // Merge the level tables, preferring L1 routes.
        let merged = spf::merge_levels(
            self.state.level_routes.l1.clone(),
            self.state.level_routes.l2.clone(),
        );

        // Withdraw routes that are gone.
        for prefix in self.state.routes.keys() {
            if !merged.contains_key(prefix) {
                self.tx.ibus.route_del(RouteKeyMsg {
                    protocol: Protocol::ISIS,
                    prefix: IpNetwork::V4(*prefix),
                });
            }
        }

        // Announce new and changed routes.
        for (prefix, route) in &merged {
            if self.state.routes.get(prefix) == Some(route) {
                continue;
            }
            self.tx.ibus.route_add(route_msg(*prefix, route));
        }

        self.state.routes = merged;
        self.state.spf.get_mut(level).last_run = Some(Instant::now());
        Debug::SpfFinish(level, start.elapsed().as_micros() as u32).log();
    }

    fn process_command(&mut self, command: CommandMsg) {
        match command {
            CommandMsg::Status(responder) => {
                let adjacencies = self
                    .state
                    .interfaces
                    .values()
                    .map(|iface| iface.state.adjacencies.len())
                    .sum();
                let adjacencies_up = self
                    .state
                    .interfaces
                    .values()
                    .flat_map(|iface| iface.state.adjacencies.values())
                    .filter(|adj| adj.state == AdjacencyState::Up)
                    .count();
                let _ = responder.send(InstanceStatus {
                    system_id: self.config.system_id,
                    level_type: self.config.level_type,
                    interfaces: self.state.interfaces.len(),
                    adjacencies,
                    adjacencies_up,
                    lsdb_l1_entries: self.state.lsdb.l1.len(),
                    lsdb_l2_entries: self.state.lsdb.l2.len(),
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
                        active: iface.state.active,
                        dis_l1: iface
                            .state
                            .dis
                            .l1
                            .map(|dis| dis.to_string()),
                        dis_l2: iface
                            .state
                            .dis
                            .l2
                            .map(|dis| dis.to_string()),
                    })
                    .collect();
                let _ = responder.send(interfaces);
            }
            CommandMsg::Adjacencies(responder) => {
                let adjacencies = self
                    .state
                    .interfaces
                    .values()
                    .flat_map(|iface| {
                        iface.state.adjacencies.values().map(|adj| {
                            AdjacencySummary {
                                interface: iface.name.clone(),
                                system_id: adj.system_id,
                                level: adj.level_usage,
                                state: adj.state,
                                holdtime: adj.holdtime,
                                uptime_secs: adj.last_uptime.map(
                                    |instant| instant.elapsed().as_secs(),
                                ),
                            }
                        })
                    })
                    .collect();
                let _ = responder.send(adjacencies);
            }
            CommandMsg::Database(responder) => {
                let mut lsps = vec![];
                for level in [LevelNumber::L1, LevelNumber::L2] {
                    lsps.extend(self.state.lsdb.get(level).iter().map(
                        |(lsp_id, lse)| LspSummary {
                            level,
                            lsp_id: lsp_id.to_string(),
                            seqno: lse.data.seqno,
                            cksum: lse.data.cksum,
                            rem_lifetime: lse.data.rem_lifetime(),
                        },
                    ));
                }
                let _ = responder.send(lsps);
            }
            CommandMsg::Routes(responder) => {
                let routes = self
                    .state
                    .routes
                    .iter()
                    .map(|(prefix, route)| RouteSummary {
                        prefix: *prefix,
                        level: route.level,
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
    const PROTOCOL: Protocol = Protocol::ISIS;

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
        for (circuit_id, (ifname, iface_cfg)) in
            config.interfaces.iter().enumerate()
        {
            state.interfaces.insert(
                ifname.clone(),
                Interface::new(
                    ifname.clone(),
                    iface_cfg.clone(),
                    circuit_id as u8 + 1,
                ),
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

        // Originate the initial LSPs.
        self.tx
            .protocol_input
            .lsp_orig_event(self.config.level_type);
    }

    fn shutdown(mut self) {
        Debug::InstanceStop.log();

        // Purge self-originated LSPs so peers reconverge without waiting
        // for lifetime expiry.
        let system_id = self.config.system_id;
        let (instance, interfaces, lsdb, ..) = self.split();
        for level in instance.config.level_type.levels() {
            let level_lsdb = lsdb.get_mut(level);
            let self_lsps = level_lsdb
                .iter()
                .filter(|(lsp_id, _)| lsp_id.system_id == system_id)
                .map(|(lsp_id, _)| *lsp_id)
                .collect::<Vec<LspId>>();
            for lsp_id in self_lsps {
                lsdb::purge(&instance, level, level_lsdb, interfaces, lsp_id);
            }
        }

        // Withdraw all computed routes.
        for prefix in self.state.routes.keys() {
            self.tx.ibus.route_del(RouteKeyMsg {
                protocol: Protocol::ISIS,
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
                self.state.redistributed.insert(prefix, msg.metric);
                self.tx
                    .protocol_input
                    .lsp_orig_event(self.config.level_type);
            }
            IbusMsg::RedistributeDel { prefix, .. } => {
                let IpNetwork::V4(prefix) = prefix else {
                    return;
                };
                self.state.redistributed.remove(&prefix);
                self.tx
                    .protocol_input
                    .lsp_orig_event(self.config.level_type);
            }
            _ => (),
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        match msg {
            ProtocolInputMsg::NetRxPdu(msg) => {
                let (instance, interfaces, lsdb, redistributed) =
                    self.split();
                if let Err(error) = events::process_pdu(
                    &instance,
                    interfaces,
                    lsdb,
                    redistributed,
                    msg,
                ) {
                    error.log();
                }
            }
            ProtocolInputMsg::HelloInterval(msg) => {
                let (instance, interfaces, ..) = self.split();
                if let Some(iface) = interfaces.get(&msg.ifname) {
                    iface.send_hello(&instance, msg.level);
                }
            }
            ProtocolInputMsg::CsnpInterval(msg) => {
                let (instance, interfaces, lsdb, ..) = self.split();
                events::process_csnp_interval(
                    &instance, interfaces, lsdb, &msg.ifname, msg.level,
                );
            }
            ProtocolInputMsg::SrmInterval(msg) => {
                let (instance, interfaces, ..) = self.split();
                events::process_srm_interval(
                    &instance,
                    interfaces,
                    &msg.ifname,
                );
            }
            ProtocolInputMsg::AdjHoldtimer(msg) => {
                let (instance, interfaces, ..) = self.split();
                events::process_adj_holdtimer(
                    &instance,
                    interfaces,
                    &msg.ifname,
                    msg.system_id,
                );
            }
            ProtocolInputMsg::LspOrigEvent(level_type) => {
                let (instance, interfaces, lsdb, redistributed) =
                    self.split();
                for level in level_type.levels() {
                    if !instance.config.level_type.intersects(level) {
                        continue;
                    }
                    lsdb::originate(
                        &instance,
                        level,
                        lsdb.get_mut(level),
                        interfaces,
                        redistributed,
                    );
                }
            }
            ProtocolInputMsg::LsdbAgeTick => {
                let (instance, interfaces, lsdb, redistributed) =
                    self.split();
                for level in instance.config.level_type.levels() {
                    lsdb::age_tick(
                        &instance,
                        level,
                        lsdb.get_mut(level),
                        interfaces,
                        redistributed,
                    );
                }
            }
            ProtocolInputMsg::SpfSchedule(level) => {
                self.process_spf_schedule(level);
            }
            ProtocolInputMsg::SpfDelayTimer(level) => {
                self.process_spf_delay_timer(level);
            }
            ProtocolInputMsg::Command(command) => {
                self.process_command(command);
            }
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (net_pdu_rxp, net_pdu_rxc) = mpsc::channel(64);
        let (eventp, eventc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            net_pdu_rx: net_pdu_rxp,
            event: eventp,
        };
        let rx = ProtocolInputChannelsRx {
            net_pdu_rx: net_pdu_rxc,
            event: eventc,
        };

        (tx, rx)
    }

    fn debug_span(name: &str) -> Span {
        debug_span!("isis-instance", %name)
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
        SpfNexthop::Unresolved { .. } => {
            // No interface address is known for the first hop; the route
            // is kept pending by the installer.
            Nexthop::Unresolved {
                router_id: std::net::Ipv4Addr::UNSPECIFIED,
            }
        }
    };

    RouteMsg {
        protocol: Protocol::ISIS,
        prefix: IpNetwork::V4(prefix),
        distance: Protocol::ISIS.default_distance(),
        metric: route.metric,
        bgp_type: None,
        nexthops: [nexthop].into(),
    }
}
