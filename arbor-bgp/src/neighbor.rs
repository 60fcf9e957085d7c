//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use arbor_utils::UnboundedSender;
use arbor_utils::socket::TcpConnInfo;
use arbor_utils::task::{IntervalTask, Task, TimeoutTask};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::packet::consts::{
    BGP_VERSION, CeaseSubcode, ErrorCode, FsmErrorSubcode,
};
use crate::packet::error::{DecodeError, OpenMessageError};
use crate::packet::message::{
    Capability, DecodeCxt, KeepaliveMsg, Message, NegotiatedCapability,
    NotificationMsg, OpenMsg,
};
use crate::packet::consts::{AS_TRANS, Afi, Safi};
use crate::tasks;

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;

// BGP neighbor configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborCfg {
    pub remote_as: u32,
    pub passive: bool,
    pub rr_client: bool,
    pub holdtime: u16,
    pub connect_retry: u16,
    pub md5_key: Option<String>,
    pub damping: bool,
    pub graceful_restart: bool,
    pub flowspec: bool,
}

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: IpAddr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub conn_info: Option<TcpConnInfo>,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub capabilities_nego: BTreeSet<NegotiatedCapability>,
    pub notification_sent: Option<NotificationMsg>,
    pub notification_rcvd: Option<NotificationMsg>,
    pub last_established: Option<Instant>,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub msg_txp: Option<UnboundedSender<Message>>,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u64,
    pub msgs_rcvd: u64,
    pub msgs_sent: u64,
    pub updates_rcvd: u64,
    pub updates_sent: u64,
    pub notifications_rcvd: u64,
    pub notifications_sent: u64,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub connect: Option<Task<()>>,
    pub connect_retry: Option<TimeoutTask>,
    pub tcp_rx: Option<Task<()>>,
    pub tcp_tx: Option<Task<()>>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
    pub gr_stale: Option<TimeoutTask>,
}

// Finite State Machine.
pub mod fsm {
    use arbor_utils::socket::{TcpConnInfo, TcpStream};
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{NotificationMsg, OpenMsg};

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart / AutomaticStart
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked / TcpConnectionConfirmed
        Connected(TcpStream, TcpConnInfo),
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr / BGPOpenMsgErr / UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate,
        // ConnectRetryTimer_Expires / HoldTimer_Expires / ...
        Timer(Timer),
    }

    // BGP timers.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        Keepalive,
        GrStale,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub(crate) fn new(
        remote_addr: IpAddr,
        config: NeighborCfg,
        peer_type: PeerType,
    ) -> Neighbor {
        Neighbor {
            remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            conn_info: None,
            identifier: None,
            holdtime_nego: None,
            capabilities_rcvd: Default::default(),
            capabilities_nego: Default::default(),
            notification_sent: None,
            notification_rcvd: None,
            last_established: None,
            statistics: Default::default(),
            tasks: Default::default(),
            msg_txp: None,
        }
    }

    // Injects an event into the neighbor's FSM. Returns the previous
    // state so the caller can react to transitions.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &InstanceUpView<'_>,
        event: fsm::Event,
    ) -> fsm::State {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();
        let old_state = self.state;

        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start => {
                    self.connect_retry_start(instance);
                    if self.config.passive {
                        Some(fsm::State::Active)
                    } else {
                        self.connect(instance);
                        Some(fsm::State::Connect)
                    }
                }
                _ => None,
            },
            // Connect and Active states
            fsm::State::Connect | fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected(stream, conn_info) => {
                    self.connect_retry_stop();
                    self.connection_setup(stream, conn_info, instance);
                    self.open_send(instance);
                    self.holdtime_start(instance, LARGE_HOLDTIME);
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(&error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    if !self.config.passive {
                        self.connect(instance);
                    }
                    self.connect_retry_start(instance);
                    match self.state {
                        fsm::State::Active if !self.config.passive => {
                            Some(fsm::State::Connect)
                        }
                        _ => None,
                    }
                }
                _ => {
                    // FSM error.
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    self.connect_retry_start(instance);
                    Some(fsm::State::Active)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(&error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => {
                    Some(self.open_process(instance, msg))
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                _ => {
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(&error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtime_restart();
                    Some(fsm::State::Established)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Keepalive) => {
                    self.keepalive_send();
                    None
                }
                _ => {
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(msg) => {
                    self.session_close(instance, msg);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdError(error) => {
                    let msg = NotificationMsg::from(&error);
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate => {
                    self.holdtime_restart();
                    None
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let msg = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Keepalive) => {
                    self.keepalive_send();
                    None
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry)
                | fsm::Event::Timer(fsm::Timer::GrStale) => None,
                _ => {
                    let msg = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished,
                    );
                    self.session_close(instance, Some(msg));
                    Some(fsm::State::Idle)
                }
            },
        };

        // Check for FSM state change.
        if let Some(next_state) = next_state
            && next_state != self.state
        {
            Debug::NbrFsmTransition(
                &self.remote_addr,
                &self.state,
                &next_state,
            )
            .log();
            self.state = next_state;

            if next_state == fsm::State::Established {
                self.statistics.established_transitions += 1;
                self.last_established = Some(Instant::now());
            }
        }

        old_state
    }

    // Initiates an outbound TCP connection.
    fn connect(&mut self, instance: &InstanceUpView<'_>) {
        let task = tasks::tcp_connect(self, instance);
        self.tasks.connect = Some(task);
    }

    // Attaches the established TCP connection: splits the stream and
    // spawns the Rx/Tx tasks.
    pub(crate) fn connection_setup(
        &mut self,
        stream: arbor_utils::socket::TcpStream,
        conn_info: TcpConnInfo,
        instance: &InstanceUpView<'_>,
    ) {
        self.conn_info = Some(conn_info);
        let (read_half, write_half) = stream.into_split();

        let (msg_txp, msg_txc) = mpsc::unbounded_channel();
        self.msg_txp = Some(msg_txp);
        self.tasks.tcp_rx = Some(tasks::nbr_rx(
            self,
            read_half,
            instance.tx.protocol_input.session.clone(),
        ));
        self.tasks.tcp_tx = Some(tasks::nbr_tx(self, write_half, msg_txc));
    }

    // Sends our OPEN message.
    pub(crate) fn open_send(&mut self, instance: &InstanceUpView<'_>) {
        let local_as = instance.config.asn;
        let my_as = match u16::try_from(local_as) {
            Ok(my_as) => my_as,
            Err(_) => AS_TRANS,
        };

        let mut capabilities = BTreeSet::new();
        capabilities.insert(Capability::FourOctetAsNumber { asn: local_as });
        capabilities.insert(Capability::MultiProtocol {
            afi: Afi::Ipv4,
            safi: Safi::Unicast,
        });
        capabilities.insert(Capability::MultiProtocol {
            afi: Afi::Ipv6,
            safi: Safi::Unicast,
        });
        if self.config.flowspec {
            capabilities.insert(Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::FlowspecUnicast,
            });
        }
        if self.config.graceful_restart {
            capabilities.insert(Capability::GracefulRestart {
                restart_time: 120,
                restarting: false,
                afi_safis: vec![(Afi::Ipv4, Safi::Unicast)],
            });
        }

        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as,
            holdtime: self.config.holdtime,
            identifier: instance.config.router_id,
            capabilities,
        });
        self.message_send(msg);
    }

    // Processes a received OPEN message (RFC 4271, Section 6.2).
    fn open_process(
        &mut self,
        instance: &InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> fsm::State {
        // Validate the peer's AS number.
        let peer_as = msg.real_as();
        if peer_as != self.config.remote_as {
            Error::NbrBadAs(self.remote_addr, self.config.remote_as, peer_as)
                .log();
            let notif =
                NotificationMsg::from(&DecodeError::OpenMessage(
                    OpenMessageError::BadPeerAs,
                ));
            self.session_close(instance, Some(notif));
            return fsm::State::Idle;
        }

        // The peer's BGP identifier must be non-zero and differ from ours.
        if msg.identifier.is_unspecified()
            || msg.identifier == instance.config.router_id
        {
            Error::NbrBadIdentifier(self.remote_addr, msg.identifier).log();
            let notif =
                NotificationMsg::from(&DecodeError::OpenMessage(
                    OpenMessageError::BadBgpIdentifier,
                ));
            self.session_close(instance, Some(notif));
            return fsm::State::Idle;
        }

        // Capability checks: 4-octet AS number support is required; a
        // peer advertising MP-BGP must include IPv4 unicast.
        let has_four_octet = msg
            .capabilities
            .iter()
            .any(|cap| matches!(cap, Capability::FourOctetAsNumber { .. }));
        let mp_caps = msg
            .capabilities
            .iter()
            .filter(|cap| matches!(cap, Capability::MultiProtocol { .. }))
            .collect::<Vec<_>>();
        let has_mp_ipv4 = mp_caps.is_empty()
            || mp_caps.iter().any(|cap| {
                matches!(
                    cap,
                    Capability::MultiProtocol {
                        afi: Afi::Ipv4,
                        safi: Safi::Unicast,
                    }
                )
            });
        if !has_four_octet || !has_mp_ipv4 {
            Error::NbrCapabilityMissing(self.remote_addr).log();
            let notif =
                NotificationMsg::from(&DecodeError::OpenMessage(
                    OpenMessageError::UnsupportedCapability,
                ));
            self.session_close(instance, Some(notif));
            return fsm::State::Idle;
        }

        self.identifier = Some(msg.identifier);
        self.capabilities_nego = msg
            .capabilities
            .iter()
            .map(|cap| cap.as_negotiated())
            .collect();
        self.capabilities_rcvd = msg.capabilities;

        // Negotiate the hold time down to the lower of the two advertised
        // values. A hold time of zero disables both the keepalive and the
        // hold mechanisms.
        let holdtime = std::cmp::min(msg.holdtime, self.config.holdtime);
        self.holdtime_nego = Some(holdtime);
        if holdtime != 0 {
            self.holdtime_start(instance, holdtime);
            let keepalive = std::cmp::max(holdtime / 3, 1);
            let task = tasks::keepalive_interval(self, instance, keepalive);
            self.tasks.keepalive = Some(task);
        } else {
            self.tasks.holdtime = None;
            self.tasks.keepalive = None;
        }

        self.keepalive_send();
        fsm::State::OpenConfirm
    }

    // Closes the session, optionally sending a NOTIFICATION first.
    //
    // The Adj-RIB-In cleanup is performed by the caller, which has access
    // to the RIB.
    pub(crate) fn session_close(
        &mut self,
        instance: &InstanceUpView<'_>,
        notification: Option<NotificationMsg>,
    ) {
        if let Some(notification) = notification {
            self.statistics.notifications_sent += 1;
            self.message_send(Message::Notification(notification.clone()));
            self.notification_sent = Some(notification);
        }

        // Start the graceful restart stale timer when negotiated so the
        // routes learned from this peer survive the restart window.
        if self.state == fsm::State::Established
            && self.config.graceful_restart
            && self
                .capabilities_nego
                .contains(&NegotiatedCapability::GracefulRestart)
        {
            let restart_time = self
                .capabilities_rcvd
                .iter()
                .find_map(|cap| match cap {
                    Capability::GracefulRestart { restart_time, .. } => {
                        Some(*restart_time)
                    }
                    _ => None,
                })
                .unwrap_or(120);
            let task = tasks::gr_stale_timer(self, instance, restart_time);
            self.tasks.gr_stale = Some(task);
        }

        self.conn_info = None;
        self.identifier = None;
        self.holdtime_nego = None;
        self.msg_txp = None;
        self.tasks.connect = None;
        self.tasks.connect_retry = None;
        self.tasks.tcp_rx = None;
        self.tasks.tcp_tx = None;
        self.tasks.keepalive = None;
        self.tasks.holdtime = None;
    }

    // Enqueues a message for transmission.
    pub(crate) fn message_send(&mut self, msg: Message) {
        if let Some(msg_txp) = &self.msg_txp {
            self.statistics.msgs_sent += 1;
            if matches!(msg, Message::Update(..)) {
                self.statistics.updates_sent += 1;
            }
            let _ = msg_txp.send(msg);
        }
    }

    pub(crate) fn keepalive_send(&mut self) {
        self.message_send(Message::Keepalive(KeepaliveMsg {}));
    }

    fn connect_retry_start(&mut self, instance: &InstanceUpView<'_>) {
        let task = tasks::connect_retry_timer(self, instance);
        self.tasks.connect_retry = Some(task);
    }

    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    fn holdtime_start(&mut self, instance: &InstanceUpView<'_>, holdtime: u16) {
        let task = tasks::holdtime_timer(self, instance, holdtime);
        self.tasks.holdtime = Some(task);
    }

    fn holdtime_restart(&mut self) {
        if let Some(holdtime) = self.tasks.holdtime.as_mut() {
            holdtime.reset(None);
        }
    }

    // Whether 4-octet AS numbers were negotiated for this session. Before
    // the OPEN exchange completes this is assumed, since our own OPEN
    // always advertises the capability.
    pub(crate) fn four_octet_asns(&self) -> bool {
        self.capabilities_nego.is_empty()
            || self
                .capabilities_nego
                .contains(&NegotiatedCapability::FourOctetAsNumber)
    }

    pub(crate) fn decode_cxt(&self) -> DecodeCxt {
        DecodeCxt {
            four_octet_asns: self.four_octet_asns(),
        }
    }

    // Administrative shutdown notification.
    pub(crate) fn shutdown_notification() -> NotificationMsg {
        NotificationMsg::new(
            ErrorCode::Cease,
            CeaseSubcode::AdministrativeShutdown,
        )
    }
}
