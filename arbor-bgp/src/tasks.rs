//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arbor_utils::socket::{TcpListener, TcpStream};
use arbor_utils::task::{IntervalTask, Task, TimeoutTask};
use arbor_utils::{Sender, UnboundedReceiver};
use tracing::Instrument;

use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, fsm};
use crate::network;
use crate::packet::message::{EncodeCxt, Message};
use crate::tasks::messages::input::{NbrTimerMsg, ProtocolInputMsg};

//
// BGP inter-task message types.
//
pub mod messages {
    pub mod input {
        use std::net::IpAddr;

        use arbor_utils::Responder;
        use arbor_utils::socket::{TcpConnInfo, TcpStream};
        use ipnetwork::IpNetwork;
        use serde::{Deserialize, Serialize};

        use crate::instance::{
            InstanceStatus, MessageStats, NeighborSummary, RibEntrySummary,
        };
        use crate::neighbor::fsm;
        use crate::packet::error::DecodeResult;
        use crate::packet::message::Message;

        #[derive(Debug)]
        pub enum ProtocolInputMsg {
            TcpAccept(TcpAcceptMsg),
            TcpConnect(TcpConnectMsg),
            TcpConnFail(IpAddr),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
            Command(CommandMsg),
        }

        #[derive(Debug)]
        pub struct TcpAcceptMsg {
            pub stream: TcpStream,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct TcpConnectMsg {
            pub stream: TcpStream,
            pub conn_info: TcpConnInfo,
        }

        #[derive(Debug)]
        pub struct NbrRxMsg {
            pub nbr_addr: IpAddr,
            pub msg: DecodeResult<Message>,
        }

        #[derive(Clone, Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: IpAddr,
            pub timer: fsm::Timer,
        }

        // Observation and command surface.
        #[derive(Debug)]
        pub enum CommandMsg {
            Status(Responder<InstanceStatus>),
            Neighbors(Responder<Vec<NeighborSummary>>),
            Rib(Responder<Vec<RibEntrySummary>>),
            Stats(Responder<MessageStats>),
            // Originate a local prefix.
            OriginatePrefix(IpNetwork),
            WithdrawPrefix(IpNetwork),
        }
    }
}

// BGP inter-task channels.
#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Session event queue (bounded, for backpressure).
    pub session: Sender<ProtocolInputMsg>,
    // Timer and command queue.
    pub event: arbor_utils::UnboundedSender<ProtocolInputMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub session: arbor_utils::Receiver<ProtocolInputMsg>,
    pub event: UnboundedReceiver<ProtocolInputMsg>,
}

// ===== impl ProtocolInputChannelsTx =====

impl ProtocolInputChannelsTx {
    pub(crate) fn nbr_timer(&self, nbr_addr: IpAddr, timer: fsm::Timer) {
        let _ = self.event.send(ProtocolInputMsg::NbrTimer(NbrTimerMsg {
            nbr_addr,
            timer,
        }));
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
            msg = self.session.recv() => msg,
            msg = self.event.recv() => msg,
        }
    }
}

// ===== global functions =====

// TCP listening task.
pub(crate) fn tcp_listener(
    listener: Arc<TcpListener>,
    session_txp: Sender<ProtocolInputMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let listener = listener.clone();
        let session_txp = session_txp.clone();
        async move {
            let _ = network::listen_loop(listener, session_txp).await;
        }
        .in_current_span()
    })
}

// Outbound TCP connection task.
pub(crate) fn tcp_connect(
    nbr: &Neighbor,
    instance: &InstanceUpView<'_>,
) -> Task<()> {
    let remote_addr = nbr.remote_addr;
    let md5_key = nbr.config.md5_key.clone();
    let session_txp = instance.tx.protocol_input.session.clone();
    Task::spawn(
        async move {
            network::connect(remote_addr, md5_key, session_txp).await;
        }
        .in_current_span(),
    )
}

// Neighbor message Rx task.
pub(crate) fn nbr_rx(
    nbr: &Neighbor,
    read_half: tokio::net::tcp::OwnedReadHalf,
    session_txp: Sender<ProtocolInputMsg>,
) -> Task<()> {
    let nbr_addr = nbr.remote_addr;
    let cxt = nbr.decode_cxt();
    Task::spawn(
        async move {
            let _ =
                network::nbr_read_loop(read_half, nbr_addr, cxt, session_txp)
                    .await;
        }
        .in_current_span(),
    )
}

// Neighbor message Tx task.
pub(crate) fn nbr_tx(
    nbr: &Neighbor,
    write_half: tokio::net::tcp::OwnedWriteHalf,
    mut msg_txc: UnboundedReceiver<Message>,
) -> Task<()> {
    let nbr_addr = nbr.remote_addr;
    let cxt = EncodeCxt {
        four_octet_asns: nbr.four_octet_asns(),
    };
    Task::spawn(
        async move {
            network::nbr_write_loop(write_half, nbr_addr, cxt, &mut msg_txc)
                .await;
        }
        .in_current_span(),
    )
}

// Connect retry timer.
pub(crate) fn connect_retry_timer(
    nbr: &Neighbor,
    instance: &InstanceUpView<'_>,
) -> TimeoutTask {
    let tx = instance.tx.protocol_input.clone();
    let nbr_addr = nbr.remote_addr;
    TimeoutTask::new(
        Duration::from_secs(nbr.config.connect_retry as u64),
        move || async move {
            tx.nbr_timer(nbr_addr, fsm::Timer::ConnectRetry);
        },
    )
}

// Session hold timer.
pub(crate) fn holdtime_timer(
    nbr: &Neighbor,
    instance: &InstanceUpView<'_>,
    holdtime: u16,
) -> TimeoutTask {
    let tx = instance.tx.protocol_input.clone();
    let nbr_addr = nbr.remote_addr;
    TimeoutTask::new(
        Duration::from_secs(holdtime as u64),
        move || async move {
            tx.nbr_timer(nbr_addr, fsm::Timer::Hold);
        },
    )
}

// Periodic KEEPALIVE transmission (one third of the negotiated hold
// time).
pub(crate) fn keepalive_interval(
    nbr: &Neighbor,
    instance: &InstanceUpView<'_>,
    interval: u16,
) -> IntervalTask {
    let tx = instance.tx.protocol_input.clone();
    let nbr_addr = nbr.remote_addr;
    IntervalTask::new(
        Duration::from_secs(interval as u64),
        true,
        true,
        move || {
            let tx = tx.clone();
            async move {
                tx.nbr_timer(nbr_addr, fsm::Timer::Keepalive);
            }
        },
    )
}

// Graceful restart stale timer.
pub(crate) fn gr_stale_timer(
    nbr: &Neighbor,
    instance: &InstanceUpView<'_>,
    restart_time: u16,
) -> TimeoutTask {
    let tx = instance.tx.protocol_input.clone();
    let nbr_addr = nbr.remote_addr;
    TimeoutTask::new(
        Duration::from_secs(restart_time as u64),
        move || async move {
            tx.nbr_timer(nbr_addr, fsm::Timer::GrStale);
        },
    )
}
