//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use arbor_utils::socket::{AsyncFd, Socket};
use arbor_utils::task::{IntervalTask, Task, TimeoutTask};
use arbor_utils::{Sender, UnboundedReceiver};
use tracing::Instrument;

use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::neighbor::{Neighbor, RxmtPacketType};
use crate::network;
use crate::tasks::messages::input::{
    IsmEventMsg, NetRxPacketMsg, NsmEventMsg, ProtocolInputMsg,
    RxmtIntervalMsg,
};
use crate::tasks::messages::output::NetTxPacketMsg;

//
// OSPF inter-task message types.
//
pub mod messages {
    pub mod input {
        use std::net::Ipv4Addr;

        use arbor_utils::Responder;
        use serde::{Deserialize, Serialize};

        use crate::instance::{
            InstanceStatus, InterfaceSummary, MessageStats, NeighborSummary,
            RouteSummary,
        };
        use crate::interface::ism;
        use crate::lsdb::LsaOriginateEvent;
        use crate::neighbor::{RxmtPacketType, nsm};
        use crate::packet::Packet;
        use crate::packet::error::DecodeResult;
        use crate::packet::lsa::LsaHdr;

        #[derive(Debug)]
        pub enum ProtocolInputMsg {
            NetRxPacket(NetRxPacketMsg),
            HelloInterval(HelloIntervalMsg),
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg),
            RxmtInterval(RxmtIntervalMsg),
            LsaOrigEvent(LsaOrigEventMsg),
            LsdbAgeTick,
            // Topology change requesting an SPF run.
            SpfSchedule,
            // SPF delay timer expiry.
            SpfDelayTimer,
            Command(CommandMsg),
        }

        #[derive(Debug)]
        pub struct NetRxPacketMsg {
            pub ifname: String,
            pub src: Ipv4Addr,
            pub dst: Ipv4Addr,
            pub dscp: u8,
            pub packet: DecodeResult<Packet>,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct HelloIntervalMsg {
            pub ifname: String,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct IsmEventMsg {
            pub ifname: String,
            pub event: ism::Event,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct NsmEventMsg {
            pub ifname: String,
            pub router_id: Ipv4Addr,
            pub event: nsm::Event,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct RxmtIntervalMsg {
            pub ifname: String,
            pub router_id: Ipv4Addr,
            pub packet_type: RxmtPacketType,
        }

        #[derive(Clone, Debug)]
        pub struct LsaOrigEventMsg {
            pub event: LsaOriginateEvent,
        }

        // Observation and command surface.
        #[derive(Debug)]
        pub enum CommandMsg {
            Status(Responder<InstanceStatus>),
            Interfaces(Responder<Vec<InterfaceSummary>>),
            Neighbors(Responder<Vec<NeighborSummary>>),
            Lsdb(Responder<Vec<LsaHdr>>),
            Routes(Responder<Vec<RouteSummary>>),
            Stats(Responder<MessageStats>),
        }
    }

    pub mod output {
        use std::net::Ipv4Addr;

        use crate::packet::Packet;

        #[derive(Clone, Debug)]
        pub struct NetTxPacketMsg {
            pub packet: Packet,
            pub dst: Vec<Ipv4Addr>,
        }
    }
}

// OSPF inter-task channels.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Packet Rx event queue (bounded, for backpressure).
    pub net_packet_rx: Sender<NetRxPacketMsg>,
    // Timer and internal event queue.
    pub event: arbor_utils::UnboundedSender<ProtocolInputMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub net_packet_rx: arbor_utils::Receiver<NetRxPacketMsg>,
    pub event: UnboundedReceiver<ProtocolInputMsg>,
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn ism_event(&self, ifname: &str, event: ism::Event) {
        let _ = self.event.send(ProtocolInputMsg::IsmEvent(IsmEventMsg {
            ifname: ifname.to_owned(),
            event,
        }));
    }

    pub(crate) fn nsm_event(
        &self,
        ifname: &str,
        router_id: Ipv4Addr,
        event: crate::neighbor::nsm::Event,
    ) {
        let _ = self.event.send(ProtocolInputMsg::NsmEvent(NsmEventMsg {
            ifname: ifname.to_owned(),
            router_id,
            event,
        }));
    }

    pub(crate) fn lsa_orig_event(
        &self,
        event: crate::lsdb::LsaOriginateEvent,
    ) {
        let _ = self.event.send(ProtocolInputMsg::LsaOrigEvent(
            messages::input::LsaOrigEventMsg { event },
        ));
    }

    pub(crate) fn spf_delay_event(&self) {
        let _ = self.event.send(ProtocolInputMsg::SpfSchedule);
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
            msg = self.net_packet_rx.recv() => {
                msg.map(ProtocolInputMsg::NetRxPacket)
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
                    messages::input::HelloIntervalMsg { ifname },
                ));
            }
        },
    )
}

// Wait timer for the DR election on broadcast/NBMA interfaces.
pub(crate) fn ism_wait_timer(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval as u64),
        move || async move {
            let _ = event.send(ProtocolInputMsg::IsmEvent(IsmEventMsg {
                ifname,
                event: ism::Event::WaitTimer,
            }));
        },
    )
}

// Neighbor inactivity (dead interval) timer.
pub(crate) fn nsm_inactivity_timer(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    let router_id = nbr.router_id;
    TimeoutTask::new(
        Duration::from_secs(iface.config.dead_interval as u64),
        move || async move {
            let _ = event.send(ProtocolInputMsg::NsmEvent(NsmEventMsg {
                ifname,
                router_id,
                event: crate::neighbor::nsm::Event::InactivityTimer,
            }));
        },
    )
}

// Packet retransmission interval (DbDesc, LsRequest or LsUpdate).
pub(crate) fn packet_rxmt_interval(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    packet_type: RxmtPacketType,
) -> IntervalTask {
    let event = instance.tx.protocol_input.event.clone();
    let ifname = iface.name.clone();
    let router_id = nbr.router_id;
    IntervalTask::new(
        Duration::from_secs(iface.config.rxmt_interval as u64),
        false,
        false,
        move || {
            let event = event.clone();
            let ifname = ifname.clone();
            async move {
                let _ = event.send(ProtocolInputMsg::RxmtInterval(
                    RxmtIntervalMsg {
                        ifname,
                        router_id,
                        packet_type,
                    },
                ));
            }
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
    delay: Duration,
) -> TimeoutTask {
    TimeoutTask::new(delay, move || async move {
        let _ = event.send(ProtocolInputMsg::SpfDelayTimer);
    })
}

// Network Tx task.
pub(crate) fn net_tx(
    socket: Arc<AsyncFd<Socket>>,
    ifindex: u32,
    src: Ipv4Addr,
    mut net_tx_packetc: UnboundedReceiver<NetTxPacketMsg>,
) -> Task<()> {
    Task::spawn(
        async move {
            network::write_loop(socket, ifindex, src, &mut net_tx_packetc)
                .await;
        }
        .in_current_span(),
    )
}

// Network Rx task.
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    ifname: String,
    net_packet_rxp: Sender<NetRxPacketMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let ifname = ifname.clone();
        let net_packet_rxp = net_packet_rxp.clone();
        async move {
            let _ = network::read_loop(socket, ifname, net_packet_rxp).await;
        }
        .in_current_span()
    })
}
