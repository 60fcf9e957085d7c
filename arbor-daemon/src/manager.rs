//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::time::Duration;

use arbor_protocol::{ShutdownSender, spawn_protocol_task};
use arbor_utils::ibus::IbusChannelsTx;
use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{Nexthop, RouteMsg};
use arbor_utils::task::{IntervalTask, Task};
use arbor_utils::{Responder, Sender};
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::{
    Config, bgp_instance_cfg, isis_instance_cfg, ospf_instance_cfg,
};

// Grace window for component teardown at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
// Interval of the periodic status report.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

// Handle for one running protocol engine.
struct Engine<Tx> {
    _task: Task<()>,
    channels_tx: Tx,
    shutdown_tx: ShutdownSender,
}

// The manager owns the lifecycle of every component: the components are
// started in dependency order and stopped in reverse.
pub struct Manager {
    routing_tx: Sender<arbor_routing::Command>,
    _routing_task: Task<()>,
    _redist_task: Option<IntervalTask>,
    ospf: Option<Engine<arbor_ospf::tasks::ProtocolInputChannelsTx>>,
    isis: Option<Engine<arbor_isis::tasks::ProtocolInputChannelsTx>>,
    bgp: Option<Engine<arbor_bgp::tasks::ProtocolInputChannelsTx>>,
    _status_task: IntervalTask,
}

// ===== impl Manager =====

impl Manager {
    // Starts all configured components in dependency order: the routing
    // component first, then the protocol engines.
    pub async fn start(config: Config) -> Result<Manager, String> {
        // Resolve interface indexes and MAC addresses once at startup.
        let mut ifindexes = BTreeMap::new();
        let mut macs = BTreeMap::new();
        for iface in &config.interfaces {
            let ifindex = nix::net::if_::if_nametoindex(iface.name.as_str())
                .map_err(|error| {
                format!("interface {} not found: {error}", iface.name)
            })?;
            ifindexes.insert(iface.name.clone(), ifindex);
            if let Some(mac) = read_mac(&iface.name) {
                macs.insert(iface.name.clone(), mac);
            }
        }

        // Inter-component bus: one receiver per component, every
        // component holds the senders of all the others.
        let (routing_ibus_tx, routing_ibus_rx) = mpsc::unbounded_channel();
        let mut ibus_tx = IbusChannelsTx {
            routing: Some(routing_ibus_tx),
            ospf: None,
            isis: None,
            bgp: None,
        };
        let ospf_ibus = config
            .ospf
            .as_ref()
            .map(|_| mpsc::unbounded_channel::<arbor_utils::ibus::IbusMsg>());
        let isis_ibus = config
            .isis
            .as_ref()
            .map(|_| mpsc::unbounded_channel::<arbor_utils::ibus::IbusMsg>());
        let bgp_ibus = config
            .bgp
            .as_ref()
            .map(|_| mpsc::unbounded_channel::<arbor_utils::ibus::IbusMsg>());
        if let Some((tx, _)) = &ospf_ibus {
            ibus_tx.ospf = Some(tx.clone());
        }
        if let Some((tx, _)) = &isis_ibus {
            ibus_tx.isis = Some(tx.clone());
        }
        if let Some((tx, _)) = &bgp_ibus {
            ibus_tx.bgp = Some(tx.clone());
        }

        // Start the routing component (RIB, kernel installer and
        // redistribution fabric).
        let (routing_task, routing_tx, redist_task) = arbor_routing::start(
            config.redistribution.clone(),
            ibus_tx.clone(),
            routing_ibus_rx,
        );

        // Seed the connected and static routes.
        for iface in &config.interfaces {
            let ifindex = ifindexes[&iface.name];
            let msg = RouteMsg {
                protocol: Protocol::DIRECT,
                prefix: ipnetwork::IpNetwork::V4(iface.address),
                distance: Protocol::DIRECT.default_distance(),
                metric: 0,
                bgp_type: None,
                nexthops: [Nexthop::Interface { ifindex }].into(),
            };
            let _ = routing_tx
                .send(arbor_routing::Command::StaticRouteAdd(msg))
                .await;
        }
        for static_route in &config.static_routes {
            let nexthop = match static_route.nexthop {
                Some(addr) => Nexthop::Address { ifindex: 0, addr },
                None => Nexthop::Interface { ifindex: 0 },
            };
            let msg = RouteMsg {
                protocol: Protocol::STATIC,
                prefix: static_route.prefix,
                distance: Protocol::STATIC.default_distance(),
                metric: static_route.metric,
                bgp_type: None,
                nexthops: [nexthop].into(),
            };
            let _ = routing_tx
                .send(arbor_routing::Command::StaticRouteAdd(msg))
                .await;
        }

        // Start the protocol engines.
        let ospf = ospf_instance_cfg(&config, &ifindexes).map(|cfg| {
            let (_, ibus_rx) = ospf_ibus.unwrap();
            let (task, channels_tx, shutdown_tx) = spawn_protocol_task::<
                arbor_ospf::Instance,
            >(
                "main".to_owned(), cfg, ibus_tx.clone(), ibus_rx
            );
            info!(protocol = %Protocol::OSPFV2, "protocol engine started");
            Engine {
                _task: task,
                channels_tx,
                shutdown_tx,
            }
        });
        let isis = isis_instance_cfg(&config, &ifindexes, &macs).map(|cfg| {
            let (_, ibus_rx) = isis_ibus.unwrap();
            let (task, channels_tx, shutdown_tx) = spawn_protocol_task::<
                arbor_isis::Instance,
            >(
                "main".to_owned(), cfg, ibus_tx.clone(), ibus_rx
            );
            info!(protocol = %Protocol::ISIS, "protocol engine started");
            Engine {
                _task: task,
                channels_tx,
                shutdown_tx,
            }
        });
        let bgp = bgp_instance_cfg(&config).map(|cfg| {
            let (_, ibus_rx) = bgp_ibus.unwrap();
            let (task, channels_tx, shutdown_tx) = spawn_protocol_task::<
                arbor_bgp::Instance,
            >(
                "main".to_owned(), cfg, ibus_tx.clone(), ibus_rx
            );
            info!(protocol = %Protocol::BGP, "protocol engine started");
            Engine {
                _task: task,
                channels_tx,
                shutdown_tx,
            }
        });

        // Periodic status report through the observation surface.
        let status_task = status_report_task(
            ospf.as_ref().map(|engine| engine.channels_tx.clone()),
            isis.as_ref().map(|engine| engine.channels_tx.clone()),
            bgp.as_ref().map(|engine| engine.channels_tx.clone()),
        );

        Ok(Manager {
            routing_tx,
            _routing_task: routing_task,
            _redist_task: redist_task,
            ospf,
            isis,
            bgp,
            _status_task: status_task,
        })
    }

    // ===== observation surface =====

    pub async fn ospf_status(
        &self,
    ) -> Option<arbor_ospf::instance::InstanceStatus> {
        let engine = self.ospf.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_ospf::tasks::messages::input::CommandMsg::Status(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn ospf_neighbors(
        &self,
    ) -> Option<Vec<arbor_ospf::instance::NeighborSummary>> {
        let engine = self.ospf.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_ospf::tasks::messages::input::CommandMsg::Neighbors(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn ospf_lsdb(
        &self,
    ) -> Option<Vec<arbor_ospf::packet::lsa::LsaHdr>> {
        let engine = self.ospf.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_ospf::tasks::messages::input::CommandMsg::Lsdb(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn ospf_routes(
        &self,
    ) -> Option<Vec<arbor_ospf::instance::RouteSummary>> {
        let engine = self.ospf.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_ospf::tasks::messages::input::CommandMsg::Routes(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn isis_status(
        &self,
    ) -> Option<arbor_isis::instance::InstanceStatus> {
        let engine = self.isis.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_isis::tasks::messages::input::CommandMsg::Status(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn isis_adjacencies(
        &self,
    ) -> Option<Vec<arbor_isis::instance::AdjacencySummary>> {
        let engine = self.isis.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_isis::tasks::messages::input::CommandMsg::Adjacencies(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn bgp_status(
        &self,
    ) -> Option<arbor_bgp::instance::InstanceStatus> {
        let engine = self.bgp.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_bgp::tasks::messages::input::CommandMsg::Status(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn bgp_neighbors(
        &self,
    ) -> Option<Vec<arbor_bgp::instance::NeighborSummary>> {
        let engine = self.bgp.as_ref()?;
        query(|responder| {
            engine.channels_tx.command(
                arbor_bgp::tasks::messages::input::CommandMsg::Neighbors(
                    responder,
                ),
            );
        })
        .await
    }

    pub async fn rib(&self) -> Option<Vec<arbor_routing::rib::RouteSummary>> {
        let (responder, rx) = oneshot::channel();
        let _ = self
            .routing_tx
            .send(arbor_routing::Command::Rib(responder))
            .await;
        rx.await.ok()
    }

    // ===== command surface =====

    // Originates a local prefix into BGP.
    pub fn bgp_originate(&self, prefix: ipnetwork::IpNetwork) -> bool {
        match &self.bgp {
            Some(engine) => {
                engine.channels_tx.command(
                    arbor_bgp::tasks::messages::input::CommandMsg::OriginatePrefix(
                        prefix,
                    ),
                );
                true
            }
            None => false,
        }
    }

    pub fn bgp_withdraw(&self, prefix: ipnetwork::IpNetwork) -> bool {
        match &self.bgp {
            Some(engine) => {
                engine.channels_tx.command(
                    arbor_bgp::tasks::messages::input::CommandMsg::WithdrawPrefix(
                        prefix,
                    ),
                );
                true
            }
            None => false,
        }
    }

    // Manually injects a prefix into the redistribution fabric. The
    // prefix enters the RIB as a static route and is leaked into the
    // active engines on the next redistribution cycle.
    pub async fn redistribute_prefix(
        &self,
        prefix: ipnetwork::IpNetwork,
        nexthop: Option<std::net::IpAddr>,
        metric: u32,
    ) {
        let nexthop = match nexthop {
            Some(addr) => Nexthop::Address { ifindex: 0, addr },
            None => Nexthop::Interface { ifindex: 0 },
        };
        let msg = RouteMsg {
            protocol: Protocol::STATIC,
            prefix,
            distance: Protocol::STATIC.default_distance(),
            metric,
            bgp_type: None,
            nexthops: [nexthop].into(),
        };
        let _ = self
            .routing_tx
            .send(arbor_routing::Command::StaticRouteAdd(msg))
            .await;
    }

    // ===== lifecycle =====

    // Stops every component in reverse dependency order, bounding each
    // teardown by the grace window.
    pub async fn shutdown(self) {
        info!("shutting down");

        if let Some(engine) = self.bgp {
            engine_shutdown(engine.shutdown_tx, "bgp").await;
        }
        if let Some(engine) = self.isis {
            engine_shutdown(engine.shutdown_tx, "isis").await;
        }
        if let Some(engine) = self.ospf {
            engine_shutdown(engine.shutdown_tx, "ospf").await;
        }

        // The routing component uninstalls the remaining kernel routes.
        let (responder, rx) = oneshot::channel();
        let _ = self
            .routing_tx
            .send(arbor_routing::Command::Shutdown(responder))
            .await;
        if tokio::time::timeout(SHUTDOWN_GRACE, rx).await.is_err() {
            warn!("routing component teardown timed out");
        }
    }
}

// ===== helper functions =====

async fn engine_shutdown(shutdown_tx: ShutdownSender, name: &str) {
    let (responder, rx) = oneshot::channel();
    if shutdown_tx.send(responder).await.is_ok()
        && tokio::time::timeout(SHUTDOWN_GRACE, rx).await.is_err()
    {
        warn!(engine = %name, "engine teardown timed out");
    }
}

async fn query<T, F>(send: F) -> Option<T>
where
    F: FnOnce(Responder<T>),
{
    let (responder, rx) = oneshot::channel();
    send(responder);
    tokio::time::timeout(SHUTDOWN_GRACE, rx).await.ok()?.ok()
}

// Reads the MAC address of an interface from sysfs.
fn read_mac(ifname: &str) -> Option<[u8; 6]> {
    let path = format!("/sys/class/net/{ifname}/address");
    let content = std::fs::read_to_string(path).ok()?;
    let mut mac = [0u8; 6];
    for (i, part) in content.trim().split(':').enumerate() {
        if i >= 6 {
            return None;
        }
        mac[i] = u8::from_str_radix(part, 16).ok()?;
    }
    Some(mac)
}

// Periodically queries each engine's status and logs a one-line summary,
// exercising the observation surface end to end.
fn status_report_task(
    ospf: Option<arbor_ospf::tasks::ProtocolInputChannelsTx>,
    isis: Option<arbor_isis::tasks::ProtocolInputChannelsTx>,
    bgp: Option<arbor_bgp::tasks::ProtocolInputChannelsTx>,
) -> IntervalTask {
    IntervalTask::new(STATUS_INTERVAL, false, false, move || {
        let ospf = ospf.clone();
        let isis = isis.clone();
        let bgp = bgp.clone();
        async move {
            if let Some(ospf) = &ospf
                && let Some(status) = query(|responder| {
                    ospf.command(
                        arbor_ospf::tasks::messages::input::CommandMsg::Status(
                            responder,
                        ),
                    );
                })
                .await
            {
                info!(
                    neighbors = status.neighbors,
                    full = status.neighbors_full,
                    lsdb = status.lsdb_entries,
                    routes = status.routes,
                    "ospf status"
                );
            }
            if let Some(isis) = &isis
                && let Some(status) = query(|responder| {
                    isis.command(
                        arbor_isis::tasks::messages::input::CommandMsg::Status(
                            responder,
                        ),
                    );
                })
                .await
            {
                info!(
                    adjacencies = status.adjacencies,
                    up = status.adjacencies_up,
                    lsdb_l1 = status.lsdb_l1_entries,
                    lsdb_l2 = status.lsdb_l2_entries,
                    routes = status.routes,
                    "isis status"
                );
            }
            if let Some(bgp) = &bgp
                && let Some(status) = query(|responder| {
                    bgp.command(
                        arbor_bgp::tasks::messages::input::CommandMsg::Status(
                            responder,
                        ),
                    );
                })
                .await
            {
                info!(
                    neighbors = status.neighbors,
                    established = status.neighbors_established,
                    rib = status.rib_entries,
                    loc_rib = status.loc_rib_routes,
                    "bgp status"
                );
            }
        }
    })
}
