//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod netlink;
pub mod redistribution;
pub mod rib;

use std::time::Duration;

use arbor_utils::ibus::{IbusChannelsTx, IbusMsg, IbusReceiver};
use arbor_utils::southbound::RouteMsg;
use arbor_utils::task::{IntervalTask, Task};
use arbor_utils::{Receiver, Responder, Sender};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, debug_span};

use crate::redistribution::{Redistribution, RedistributionCfg};
use crate::rib::{Rib, RouteSummary};

// Commands accepted by the routing component.
#[derive(Debug)]
pub enum Command {
    // Observation surface.
    Rib(Responder<Vec<RouteSummary>>),
    // Seed a connected or static route.
    StaticRouteAdd(RouteMsg),
    // Redistribution tick.
    RedistTick,
    // Orderly shutdown: uninstall every route owned by this process.
    Shutdown(Responder<()>),
}

#[derive(Debug)]
pub struct Master {
    pub ibus_tx: IbusChannelsTx,
    pub rib: Rib,
    pub redistribution: Redistribution,
    pub redistribution_cfg: RedistributionCfg,
}

// ===== impl Master =====

impl Master {
    async fn run(
        mut self,
        mut ibus_rx: IbusReceiver,
        mut command_rx: Receiver<Command>,
    ) {
        // The kernel routing table is mutated by this task only.
        let handle = netlink::init();

        loop {
            tokio::select! {
                msg = ibus_rx.recv() => {
                    match msg {
                        Some(IbusMsg::RouteAdd(msg)) => {
                            self.rib.route_add(&handle, msg).await;
                        }
                        Some(IbusMsg::RouteDel(msg)) => {
                            self.rib.route_del(&handle, msg).await;
                        }
                        Some(_) => (),
                        None => break,
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(Command::Rib(responder)) => {
                            let _ = responder.send(self.rib.summaries());
                        }
                        Some(Command::StaticRouteAdd(msg)) => {
                            self.rib.route_add(&handle, msg).await;
                        }
                        Some(Command::RedistTick) => {
                            self.redistribution.cycle(
                                &self.redistribution_cfg,
                                &self.rib,
                                &self.ibus_tx,
                            );
                        }
                        Some(Command::Shutdown(responder)) => {
                            self.rib.uninstall_all(&handle).await;
                            let _ = responder.send(());
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        debug!("routing component stopped");
    }
}

// ===== global functions =====

// Starts the routing component: the merged RIB, the kernel route
// installer and the redistribution fabric.
pub fn start(
    redistribution_cfg: RedistributionCfg,
    ibus_tx: IbusChannelsTx,
    ibus_rx: IbusReceiver,
) -> (Task<()>, Sender<Command>, Option<IntervalTask>) {
    let (command_tx, command_rx) = mpsc::channel(16);

    // Periodic redistribution tick.
    let redist_task = match redistribution_cfg.enabled {
        true => {
            let interval = Duration::from_secs(redistribution_cfg.interval);
            let command_tx = command_tx.clone();
            Some(IntervalTask::new(interval, false, false, move || {
                let command_tx = command_tx.clone();
                async move {
                    let _ = command_tx.send(Command::RedistTick).await;
                }
            }))
        }
        false => None,
    };

    let master = Master {
        ibus_tx,
        rib: Default::default(),
        redistribution: Default::default(),
        redistribution_cfg,
    };
    let task = Task::spawn(
        async move {
            master.run(ibus_rx, command_rx).await;
        }
        .instrument(debug_span!("routing")),
    );

    (task, command_tx, redist_task)
}
