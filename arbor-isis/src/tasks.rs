//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use arbor_utils::socket::{AsyncFd, Socket};
use arbor_utils::task::{IntervalTask, Task, TimeoutTask};
use arbor_utils::{Sender, UnboundedReceiver};
use tracing::Instrument;

use crate::adjacency::Adjacency;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::network;
use crate::packet::{LevelNumber, LevelType, SystemId};
use crate::tasks::messages::input::{
    AdjHoldtimerMsg, CsnpIntervalMsg, HelloIntervalMsg, NetRxPduMsg,
    ProtocolInputMsg, SrmIntervalMsg,
};
use crate::tasks::messages::output::NetTxPduMsg;

//
// IS-IS inter-task message types.
//
pub mod messages {
    pub mod input {
        use arbor_utils::Responder;
        use serde::{Deserialize, Serialize};

        use crate::instance::{
            AdjacencySummary, InstanceStatus, InterfaceSummary, LspSummary,
            MessageStats, RouteSummary,
        };
        use crate::packet::error::DecodeResult;
        use crate::packet::pdu::Pdu;
        use crate::packet::{LevelNumber, LevelType, SystemId};

        #[derive(Debug)]
        pub enum ProtocolInputMsg {
            NetRxPdu(NetRxPduMsg),
            HelloInterval(HelloIntervalMsg),
            CsnpInterval(CsnpIntervalMsg),
            SrmInterval(SrmIntervalMsg),
            AdjHoldtimer(AdjHoldtimerMsg),
            LspOrigEvent(LevelType),
            LsdbAgeTick,
            SpfSchedule(LevelNumber),
            SpfDelayTimer(LevelNumber),
            Command(CommandMsg),
        }

        #[derive(Debug)]
        pub struct NetRxPduMsg {
            pub ifname: String,
            pub src: [u8; 6],
            pub pdu: DecodeResult<Pdu>,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct HelloIntervalMsg {
            pub ifname: String,
            pub level: LevelNumber,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct CsnpIntervalMsg {
            pub ifname: String,
            pub level: LevelNumber,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SrmIntervalMsg {
            pub ifname: String,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct AdjHoldtimerMsg {
            pub ifname: String,
            pub system_id: SystemId,
        }

        // Observation and command surface.
        #[derive(Debug)]
        pub enum CommandMsg {
            Status(Responder<InstanceStatus>),
            Interfaces(Responder<Vec<InterfaceSummary>>),
            Adjacencies(Responder<Vec<AdjacencySummary>>),
            Database(Responder<Vec<LspSummary>>),
            Routes(Responder<Vec<RouteSummary>>),
            Stats(Responder<MessageStats>),
        }
    }

    pub mod output {
        use crate::network::MulticastAddr;
        use crate::packet::pdu::Pdu;

        #[derive(Clone, Debug)]
        pub struct NetTxPduMsg {
            pub pdu: Pdu,
            pub dst: MulticastAddr,
        }
    }
}

// IS-IS inter-task channels.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // PDU Rx event queue (bounded, for backpressure).
    pub net_pdu_rx: Sender<NetRxPduMsg>,
    // Timer and internal event queue.
    pub event: arbor_utils::UnboundedSender<ProtocolInputMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub net_pdu_rx: arbor_utils::Receiver<NetRxPduMsg>,
    pub event: UnboundedReceiver<ProtocolInputMsg>,
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn lsp_orig_event(&self, level_type: LevelType) {
        let _ = self
            .event
            .send(ProtocolInputMsg::LspOrigEvent(level_type));
    }

    pub(crate) fn spf_schedule(&self, level: LevelNumber) {
        let _ = self.event.send(ProtocolInputMsg::SpfSchedule(level));
    }

    pub(crate) fn adj_holdtimer(&self, ifname: String, system_id: SystemId) {
        let _ = self.event.send(ProtocolInputMsg::AdjHoldtimer(
            AdjHoldtimerMsg { ifname, system_id },
        ));
    }

    // Observation/command surface entry point, used by the manager.
    pub fn command(&self, command: messages::input::CommandMsg) {
        let _ = self.event.send(ProtocolInputMsg::Command(command));
    }
}

impl arbor_protocol::MessageReceiver<ProtocolInputMsg>
    for ProtocolInputChannelsRx
{
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.net_pdu_rx.recv() => {
                msg.map(ProtocolInputMsg::NetRxPdu)
            }
            msg = self.event.recv() => msg,
        }
    }
}

// ===== global functions =====

// Hello Tx interval, jittered to prevent synchronization between routers.
pub(crate) fn hello_interval(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
) -> IntervalTask {
    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    IntervalTask::new(
        Duration::from_secs(iface.config.hello_interval as u64),
        true,
        true,
        move || {
            let event = event.clone();
            let ifname = ifname.clone();
            async move {
                let _ = event.send(ProtocolInputMsg::HelloInterval(
                    HelloIntervalMsg { ifname, level },
                ));
            }
        },
    )
}

// Periodic CSNP transmission.
pub(crate) fn csnp_interval(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
) -> IntervalTask {
    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    IntervalTask::new(
        Duration::from_secs(iface.config.csnp_interval as u64),
        false,
        true,
        move || {
            let event = event.clone();
            let ifname = ifname.clone();
            async move {
                let _ = event.send(ProtocolInputMsg::CsnpInterval(
                    CsnpIntervalMsg { ifname, level },
                ));
            }
        },
    )
}

// Periodic scan of the SRM and SSN flag lists.
pub(crate) fn srm_interval(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> IntervalTask {
    const SRM_SCAN_INTERVAL: u64 = 5;

    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    IntervalTask::new(
        Duration::from_secs(SRM_SCAN_INTERVAL),
        false,
        false,
        move || {
            let event = event.clone();
            let ifname = ifname.clone();
            async move {
                let _ = event.send(ProtocolInputMsg::SrmInterval(
                    SrmIntervalMsg { ifname },
                ));
            }
        },
    )
}

// Adjacency holdtime timer.
pub(crate) fn adjacency_holdtimer(
    adj: &Adjacency,
    ifname: &str,
    instance: &InstanceUpView<'_>,
    holdtime: u16,
) -> TimeoutTask {
    let tx = instance.tx.protocol_input.clone();
    let ifname = ifname.to_owned();
    let system_id = adj.system_id;
    TimeoutTask::new(
        Duration::from_secs(holdtime as u64),
        move || async move {
            tx.adj_holdtimer(ifname, system_id);
        },
    )
}

// LSDB aging tick (one second granularity).
pub(crate) fn lsdb_age_tick(
    event: arbor_utils::UnboundedSender<ProtocolInputMsg>,
) -> IntervalTask {
    IntervalTask::new(Duration::from_secs(1), false, false, move || {
        let event = event.clone();
        async move {
            let _ = event.send(ProtocolInputMsg::LsdbAgeTick);
        }
    })
}

// SPF delay timer.
pub(crate) fn spf_delay_timer(
    event: arbor_utils::UnboundedSender<ProtocolInputMsg>,
    level: LevelNumber,
    delay: Duration,
) -> TimeoutTask {
    TimeoutTask::new(delay, move || async move {
        let _ = event.send(ProtocolInputMsg::SpfDelayTimer(level));
    })
}

// Network Tx task.
pub(crate) fn net_tx(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    ifindex: u32,
    mut net_tx_pduc: UnboundedReceiver<NetTxPduMsg>,
) -> Task<()> {
    Task::spawn(
        async move {
            network::write_loop(socket, ifname, ifindex, &mut net_tx_pduc)
                .await;
        }
        .in_current_span(),
    )
}

// Network Rx task.
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    net_pdu_rxp: Sender<NetRxPduMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let ifname = ifname.clone();
        let net_pdu_rxp = net_pdu_rxp.clone();
        async move {
            let _ = network::read_loop(socket, ifname, net_pdu_rxp).await;
        }
        .in_current_span()
    })
}
