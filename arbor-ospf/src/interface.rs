//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use arbor_utils::socket::{AsyncFd, Socket};
use arbor_utils::task::{IntervalTask, Task, TimeoutTask};
use arbor_utils::UnboundedSender;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, nsm};
use crate::network;
use crate::output;
use crate::tasks;
use crate::tasks::messages::output::NetTxPacketMsg;

// Interface network types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    Broadcast,
    PointToPoint,
    PointToMultipoint,
    NonBroadcast,
}

// OSPF interface configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceCfg {
    pub ifindex: u32,
    pub addr: Ipv4Network,
    pub mtu: u16,
    pub if_type: InterfaceType,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub rxmt_interval: u16,
    pub cost: u16,
    pub priority: u8,
    pub source_ip: Option<Ipv4Addr>,
    pub unicast_peer: Option<Ipv4Addr>,
    pub passive: bool,
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    pub ism_state: ism::State,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub net: Option<InterfaceNet>,
    pub tasks: InterfaceTasks,
}

#[derive(Debug)]
pub struct InterfaceNet {
    pub socket: Arc<AsyncFd<Socket>>,
    pub net_tx_packetp: UnboundedSender<NetTxPacketMsg>,
    _net_tx_task: Task<()>,
    _net_rx_task: Task<()>,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<IntervalTask>,
    pub wait_timer: Option<TimeoutTask>,
}

// Interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        InterfaceDown,
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(name: String, config: InterfaceCfg) -> Interface {
        Interface {
            name,
            config,
            state: Default::default(),
        }
    }

    // Starts interface operation: opens the raw socket, joins AllSPFRouters
    // and kicks off the hello task.
    pub(crate) fn start(
        &mut self,
        instance: &InstanceUpView<'_>,
    ) -> Result<(), Error> {
        Debug::InterfaceStart(&self.name).log();

        let net = InterfaceNet::new(self, instance)
            .map_err(|error| Error::InterfaceStartError(self.name.clone(), error))?;
        self.state.net = Some(net);

        self.fsm_dispatch_up(instance);

        if !self.config.passive {
            let task = tasks::hello_interval(self, instance);
            self.state.tasks.hello_interval = Some(task);
        }

        Ok(())
    }

    fn fsm_dispatch_up(&mut self, instance: &InstanceUpView<'_>) {
        // The ISM proper runs through the event channel so neighbor state is
        // available; InterfaceUp is dispatched inline since no neighbors can
        // exist yet.
        instance
            .tx
            .protocol_input
            .ism_event(&self.name, ism::Event::InterfaceUp);
    }

    pub(crate) fn stop(
        &mut self,
        nbrs: &mut BTreeMap<Ipv4Addr, Neighbor>,
        instance: &InstanceUpView<'_>,
    ) {
        Debug::InterfaceStop(&self.name).log();

        self.fsm(nbrs, instance, ism::Event::InterfaceDown);
        self.state = Default::default();
    }

    // Interface state machine.
    pub(crate) fn fsm(
        &mut self,
        nbrs: &mut BTreeMap<Ipv4Addr, Neighbor>,
        instance: &InstanceUpView<'_>,
        event: ism::Event,
    ) {
        Debug::IsmEvent(&self.name, &self.state.ism_state, &event).log();

        let new_state = match (self.state.ism_state, &event) {
            (ism::State::Down, ism::Event::InterfaceUp) => {
                match self.config.if_type {
                    InterfaceType::PointToPoint
                    | InterfaceType::PointToMultipoint => {
                        Some(ism::State::PointToPoint)
                    }
                    InterfaceType::Broadcast | InterfaceType::NonBroadcast => {
                        if self.config.priority == 0 {
                            Some(ism::State::DrOther)
                        } else {
                            let task = tasks::ism_wait_timer(self, instance);
                            self.state.tasks.wait_timer = Some(task);
                            Some(ism::State::Waiting)
                        }
                    }
                }
            }
            (
                ism::State::Waiting,
                ism::Event::WaitTimer | ism::Event::BackupSeen,
            ) => {
                self.state.tasks.wait_timer = None;
                Some(self.dr_election(nbrs, instance))
            }
            (
                ism::State::DrOther | ism::State::Backup | ism::State::Dr,
                ism::Event::NbrChange,
            ) => Some(self.dr_election(nbrs, instance)),
            (_, ism::Event::InterfaceDown) => {
                let mut nbrs_down = std::mem::take(nbrs);
                for nbr in nbrs_down.values_mut() {
                    nbr.fsm(
                        self,
                        instance,
                        &Default::default(),
                        nsm::Event::LinkDown,
                    );
                }
                self.state.dr = None;
                self.state.bdr = None;
                self.state.tasks = Default::default();
                Some(ism::State::Down)
            }
            _ => {
                Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
                return;
            }
        };

        if let Some(new_state) = new_state
            && new_state != self.state.ism_state
        {
            Debug::IsmTransition(
                &self.name,
                &self.state.ism_state,
                &new_state,
            )
            .log();
            self.state.ism_state = new_state;
        }
    }

    // DR election for broadcast and NBMA networks (RFC 2328, Section 9.4).
    fn dr_election(
        &mut self,
        nbrs: &mut BTreeMap<Ipv4Addr, Neighbor>,
        instance: &InstanceUpView<'_>,
    ) -> ism::State {
        let src_addr = self.src_addr();

        // Build the list of election candidates: the local router plus all
        // neighbors in state 2-Way or higher with non-zero priority.
        #[derive(Clone, Copy)]
        struct Candidate {
            addr: Ipv4Addr,
            priority: u8,
            dr: Option<Ipv4Addr>,
            bdr: Option<Ipv4Addr>,
        }
        let mut candidates = vec![];
        if self.config.priority > 0 {
            candidates.push(Candidate {
                addr: src_addr,
                priority: self.config.priority,
                dr: self.state.dr,
                bdr: self.state.bdr,
            });
        }
        for nbr in nbrs
            .values()
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority > 0)
        {
            candidates.push(Candidate {
                addr: nbr.src,
                priority: nbr.priority,
                dr: nbr.dr,
                bdr: nbr.bdr,
            });
        }

        let best =
            |candidates: &[Candidate]| -> Option<Candidate> {
                candidates
                    .iter()
                    .max_by_key(|c| (c.priority, c.addr))
                    .copied()
            };

        // Calculate the new Backup Designated Router.
        let calc_bdr = |candidates: &[Candidate]| -> Option<Ipv4Addr> {
            let eligible = candidates
                .iter()
                .filter(|c| c.dr != Some(c.addr))
                .copied()
                .collect::<Vec<_>>();
            let declared = eligible
                .iter()
                .filter(|c| c.bdr == Some(c.addr))
                .copied()
                .collect::<Vec<_>>();
            match best(&declared) {
                Some(c) => Some(c.addr),
                None => best(&eligible).map(|c| c.addr),
            }
        };

        // Calculate the new Designated Router.
        let calc_dr = |candidates: &[Candidate],
                       bdr: Option<Ipv4Addr>|
         -> Option<Ipv4Addr> {
            let declared = candidates
                .iter()
                .filter(|c| c.dr == Some(c.addr))
                .copied()
                .collect::<Vec<_>>();
            match best(&declared) {
                Some(c) => Some(c.addr),
                None => bdr,
            }
        };

        let mut bdr = calc_bdr(&candidates);
        let mut dr = calc_dr(&candidates, bdr);

        // If the local router is now newly the DR or BDR (or is no longer
        // one), the election is repeated with the updated self-declaration.
        let was_dr_or_bdr = self.state.dr == Some(src_addr)
            || self.state.bdr == Some(src_addr);
        let is_dr_or_bdr = dr == Some(src_addr) || bdr == Some(src_addr);
        if was_dr_or_bdr != is_dr_or_bdr {
            for candidate in candidates
                .iter_mut()
                .filter(|candidate| candidate.addr == src_addr)
            {
                candidate.dr = dr;
                candidate.bdr = bdr;
            }
            bdr = calc_bdr(&candidates);
            dr = calc_dr(&candidates, bdr);
        }

        Debug::IsmDrElection(&self.name, dr, bdr).log();

        // Join or leave the AllDRouters multicast group as needed.
        let old_dr_or_bdr = was_dr_or_bdr;
        let new_dr_or_bdr = dr == Some(src_addr) || bdr == Some(src_addr);
        if let Some(net) = &self.state.net {
            if new_dr_or_bdr && !old_dr_or_bdr {
                if let Err(error) = network::join_multicast(
                    &net.socket,
                    network::ALL_DR_RTRS,
                    self.config.ifindex,
                ) {
                    IoError::MulticastJoinError(network::ALL_DR_RTRS, error)
                        .log();
                }
            } else if !new_dr_or_bdr && old_dr_or_bdr {
                if let Err(error) = network::leave_multicast(
                    &net.socket,
                    network::ALL_DR_RTRS,
                    self.config.ifindex,
                ) {
                    IoError::MulticastLeaveError(network::ALL_DR_RTRS, error)
                        .log();
                }
            }
        }

        let dr_changed = self.state.dr != dr;
        self.state.dr = dr;
        self.state.bdr = bdr;

        // Changes to the set of adjacencies the local router should form are
        // reevaluated by the neighbor FSMs.
        if dr_changed {
            for nbr in nbrs
                .values()
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                instance.tx.protocol_input.nsm_event(
                    &self.name,
                    nbr.router_id,
                    nsm::Event::AdjOk,
                );
            }

            // The network-LSA for this network must be (re)originated or
            // flushed.
            instance.tx.protocol_input.lsa_orig_event(
                crate::lsdb::LsaOriginateEvent::DrChange {
                    ifname: self.name.clone(),
                },
            );
        }

        if dr == Some(src_addr) {
            ism::State::Dr
        } else if bdr == Some(src_addr) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        }
    }

    // Source address used for packets sent on this interface, honouring the
    // per-interface override.
    pub(crate) fn src_addr(&self) -> Ipv4Addr {
        self.config.source_ip.unwrap_or_else(|| self.config.addr.ip())
    }

    pub(crate) fn is_broadcast_or_nbma(&self) -> bool {
        matches!(
            self.config.if_type,
            InterfaceType::Broadcast | InterfaceType::NonBroadcast
        )
    }

    pub(crate) fn is_dr(&self) -> bool {
        self.state.ism_state == ism::State::Dr
    }

    // Whether a full adjacency should be established with this neighbor.
    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        match self.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::NonBroadcast => true,
            InterfaceType::Broadcast => {
                let src_addr = self.src_addr();
                self.state.dr == Some(src_addr)
                    || self.state.bdr == Some(src_addr)
                    || self.state.dr == Some(nbr.src)
                    || self.state.bdr == Some(nbr.src)
            }
        }
    }

    // Enqueues a packet for transmission on this interface.
    pub(crate) fn enqueue_packet(&self, msg: NetTxPacketMsg) {
        if let Some(net) = &self.state.net {
            let _ = net.net_tx_packetp.send(msg);
        }
    }

    pub(crate) fn send_hello(
        &self,
        nbrs: &BTreeMap<Ipv4Addr, Neighbor>,
        instance: &InstanceUpView<'_>,
    ) {
        output::send_hello(self, nbrs, instance);
    }
}

// ===== impl InterfaceNet =====

impl InterfaceNet {
    fn new(
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) -> Result<InterfaceNet, IoError> {
        // Create the raw socket and join the AllSPFRouters group.
        let socket = network::socket(&iface.name)
            .map_err(IoError::SocketError)
            .and_then(|socket| {
                AsyncFd::new(socket).map_err(IoError::SocketError)
            })
            .map(Arc::new)?;
        network::join_multicast(
            &socket,
            network::ALL_SPF_RTRS,
            iface.config.ifindex,
        )
        .map_err(|error| {
            IoError::MulticastJoinError(network::ALL_SPF_RTRS, error)
        })?;

        // Start network Tx/Rx tasks.
        let (net_tx_packetp, net_tx_packetc) = mpsc::unbounded_channel();
        let net_tx_task = tasks::net_tx(
            socket.clone(),
            iface.config.ifindex,
            iface.src_addr(),
            net_tx_packetc,
        );
        let net_rx_task = tasks::net_rx(
            socket.clone(),
            iface.name.clone(),
            instance.tx.protocol_input.net_packet_rx.clone(),
        );

        Ok(InterfaceNet {
            socket,
            net_tx_packetp,
            _net_tx_task: net_tx_task,
            _net_rx_task: net_rx_task,
        })
    }
}
