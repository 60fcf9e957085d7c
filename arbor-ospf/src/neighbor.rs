//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use arbor_utils::task::{IntervalTask, TimeoutTask};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{Lsdb, LsaOriginateEvent};
use crate::neighbor::nsm::{Event, State};
use crate::output;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDesc, DbDescFlags};
use crate::tasks;

// Maximum number of LSAs queued for retransmission to a single neighbor.
// On overflow the adjacency is torn down, which is safer than unbounded
// memory growth during partitions.
pub const RXMT_QUEUE_MAX: usize = 1024;

#[derive(Debug)]
pub struct Neighbor {
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub priority: u8,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub state: State,

    // Master/slave role negotiated in ExStart (true when we are the master).
    pub master: bool,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<DbDesc>,

    pub last_full: Option<Instant>,
    pub event_count: u32,

    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

#[derive(Debug)]
pub struct LastDbDesc {
    pub options: crate::packet::Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSA headers enqueued for transmission in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that need to be requested from this neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub rxmt_dbdesc: Option<IntervalTask>,
    pub rxmt_lsreq: Option<IntervalTask>,
    pub rxmt_lsupd: Option<IntervalTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        Start,
        HelloRcvd,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch,
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(router_id: Ipv4Addr, src: Ipv4Addr) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        // The DD sequence number is initialized to a random value.
        let dd_seq_no = rand::rng().next_u32();

        Neighbor {
            router_id,
            src,
            priority: 0,
            dr: None,
            bdr: None,
            state: State::Down,
            master: false,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            last_full: None,
            event_count: 0,
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface,
        instance: &InstanceUpView<'_>,
        lsdb: &Lsdb,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (self.state, &event) {
            // NSM (state, event) -> (Action, new state)
            (State::Down, Event::Start) => {
                // NBMA neighbor: start sending hellos at the poll interval.
                self.inactivity_timer_reset(iface, instance);
                Some(State::Attempt)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Attempt | State::Down, Event::HelloRcvd) => {
                self.inactivity_timer_reset(iface, instance);
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Init
                | State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::HelloRcvd,
            ) => {
                self.inactivity_timer_reset(iface, instance);
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::TwoWayRcvd)
            | (State::TwoWay, Event::AdjOk) => {
                if iface.need_adjacency(self) {
                    self.dd_seq_no += 1;
                    self.dd_flags.insert(
                        DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
                    );
                    self.master = true;
                    output::send_dbdesc(self, iface, instance);
                    self.rxmt_dbdesc_start(iface, instance);
                    Some(State::ExStart)
                } else {
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::ExStart, Event::NegotiationDone) => {
                // List the contents of the entire LSDB in the summary list.
                for (lsa_key, lse) in lsdb.iter() {
                    if lse.data.hdr.is_maxage() {
                        self.lists.ls_rxmt.insert(*lsa_key, lse.data.clone());
                        self.rxmt_lsupd_start_check(iface, instance);
                    } else {
                        self.lists.db_summary.insert(*lsa_key, lse.data.hdr);
                    }
                }

                self.dd_flags.remove(DbDescFlags::I);
                Some(State::Exchange)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Exchange, Event::ExchangeDone) => {
                self.rxmt_dbdesc_stop();
                if self.lists.ls_request.is_empty() {
                    Some(State::Full)
                } else {
                    // Wait for outstanding LS Requests to be responded.
                    output::send_lsreq(self, iface, instance);
                    self.rxmt_lsreq_start(iface, instance);
                    Some(State::Loading)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::Loading, Event::LoadingDone) => {
                self.rxmt_lsreq_stop();
                Some(State::Full)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::AdjOk,
            ) => {
                if iface.need_adjacency(self) {
                    None
                } else {
                    self.reset_adjacency();
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Exchange | State::Loading | State::Full,
                Event::SeqNoMismatch | Event::BadLsReq,
            ) => {
                self.reset_adjacency();
                self.dd_seq_no += 1;
                self.dd_flags
                    .insert(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS);
                self.master = true;
                output::send_dbdesc(self, iface, instance);
                self.rxmt_dbdesc_start(iface, instance);
                Some(State::ExStart)
            }
            // NSM (state, event) -> (Action, new state)
            (_, Event::Kill | Event::LinkDown | Event::InactivityTimer) => {
                self.reset_adjacency();
                self.tasks.inactivity_timer = None;
                Some(State::Down)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::OneWayRcvd,
            ) => {
                self.reset_adjacency();
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::TwoWayRcvd,
            )
            | (State::Init, Event::OneWayRcvd) => {
                // No action required.
                None
            }
            // Catch-all wildcard.
            _ => {
                Error::NsmUnexpectedEvent(self.router_id, self.state, event)
                    .log();
                return;
            }
        };

        // Check for FSM state change.
        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.fsm_state_change(iface, instance, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        iface: &mut Interface,
        instance: &InstanceUpView<'_>,
        new_state: State,
    ) {
        // Check for bidirectional communication change on broadcast/NBMA
        // networks, which may affect the DR election.
        if (new_state >= State::TwoWay) != (self.state >= State::TwoWay)
            && iface.is_broadcast_or_nbma()
        {
            instance.tx.protocol_input.ism_event(
                &iface.name,
                crate::interface::ism::Event::NbrChange,
            );
        }

        // Check if the neighbor changed to/from the FULL state. The local
        // Router-LSA must be regenerated to reflect the new set of fully
        // adjacent neighbors.
        if new_state == State::Full || self.state == State::Full {
            instance.tx.protocol_input.lsa_orig_event(
                LsaOriginateEvent::NeighborToFromFull {
                    ifname: iface.name.clone(),
                },
            );
        }
        if new_state == State::Full {
            self.last_full = Some(Instant::now());
        }

        // Effectively transition to the new FSM state.
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;
        self.event_count += 1;
    }

    pub(crate) fn loading_done_check(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        // Check if all pending LSA requests were received.
        if self.lists.ls_request.is_empty() {
            if self.state == State::Loading {
                // Database loading has completed.
                instance.tx.protocol_input.nsm_event(
                    &iface.name,
                    self.router_id,
                    Event::LoadingDone,
                );
            }
        } else if self.state == State::Loading {
            // Request the next batch of LSAs.
            output::send_lsreq(self, iface, instance);
        }
    }

    fn reset_adjacency(&mut self) {
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks.rxmt_dbdesc = None;
        self.tasks.rxmt_lsreq = None;
        self.tasks.rxmt_lsupd = None;
    }

    pub(crate) fn dbdesc_is_dup(&self, dbdesc: &DbDesc) -> bool {
        if let Some(last_rcvd_dbdesc) = &self.last_rcvd_dbdesc
            && last_rcvd_dbdesc.options == dbdesc.options
            && last_rcvd_dbdesc.dd_flags == dbdesc.dd_flags
            && last_rcvd_dbdesc.dd_seq_no == dbdesc.dd_seq_no
        {
            return true;
        }

        false
    }

    pub(crate) fn inactivity_timer_start(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        let task = tasks::nsm_inactivity_timer(self, iface, instance);
        self.tasks.inactivity_timer = Some(task);
    }

    fn inactivity_timer_reset(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        if let Some(inactivity_timer) = self.tasks.inactivity_timer.as_mut() {
            inactivity_timer.reset(None);
        } else {
            self.inactivity_timer_start(iface, instance);
        }
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        if self.tasks.rxmt_dbdesc.is_none() {
            let task = tasks::packet_rxmt_interval(
                self,
                iface,
                instance,
                RxmtPacketType::DbDesc,
            );
            self.tasks.rxmt_dbdesc = Some(task);
        }
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        if self.tasks.rxmt_lsreq.is_none() {
            let task = tasks::packet_rxmt_interval(
                self,
                iface,
                instance,
                RxmtPacketType::LsRequest,
            );
            self.tasks.rxmt_lsreq = Some(task);
        }
    }

    fn rxmt_lsreq_stop(&mut self) {
        self.tasks.rxmt_lsreq = None;
    }

    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            let task = tasks::packet_rxmt_interval(
                self,
                iface,
                instance,
                RxmtPacketType::LsUpdate,
            );
            self.tasks.rxmt_lsupd = Some(task);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_some() {
            self.tasks.rxmt_lsupd = None;
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}
