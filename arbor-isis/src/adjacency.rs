//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use arbor_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::packet::{AreaAddr, LanId, LevelType, SystemId};
use crate::tasks;

#[derive(Debug)]
pub struct Adjacency {
    pub snpa: [u8; 6],
    pub system_id: SystemId,
    pub level_capability: LevelType,
    pub level_usage: LevelType,
    pub state: AdjacencyState,
    pub priority: Option<u8>,
    pub lan_id: Option<LanId>,
    pub area_addrs: BTreeSet<AreaAddr>,
    pub neighbors: BTreeSet<[u8; 6]>,
    pub ipv4_addrs: BTreeSet<Ipv4Addr>,
    pub holdtime: u16,
    pub last_uptime: Option<Instant>,
    pub holdtimer: Option<TimeoutTask>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AdjacencyState {
    Down,
    Initializing,
    Up,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AdjacencyEvent {
    HelloOneWayRcvd,
    HelloTwoWayRcvd,
    HoldtimeExpired,
    LinkDown,
    Kill,
}

// ===== impl Adjacency =====

impl Adjacency {
    // Creates new adjacency.
    pub(crate) fn new(
        snpa: [u8; 6],
        system_id: SystemId,
        level_capability: LevelType,
        level_usage: LevelType,
    ) -> Adjacency {
        let adj = Adjacency {
            snpa,
            system_id,
            level_capability,
            level_usage,
            state: AdjacencyState::Down,
            priority: None,
            lan_id: None,
            area_addrs: Default::default(),
            neighbors: Default::default(),
            ipv4_addrs: Default::default(),
            holdtime: 0,
            last_uptime: None,
            holdtimer: None,
        };
        Debug::AdjacencyCreate(&adj).log();
        adj
    }

    // Transitions the adjacency state if different from the current one.
    //
    // Any transition to or from Up schedules reorigination of the local
    // LSPs so the topology reflects the new set of adjacencies.
    pub(crate) fn state_change(
        &mut self,
        instance: &InstanceUpView<'_>,
        event: AdjacencyEvent,
        new_state: AdjacencyState,
    ) {
        if self.state == new_state {
            return;
        }

        Debug::AdjacencyStateChange(self, new_state, event).log();

        if new_state == AdjacencyState::Up {
            self.last_uptime = Some(Instant::now());
        }

        self.state = new_state;

        // Schedule LSP reorigination for the levels this adjacency spans.
        instance
            .tx
            .protocol_input
            .lsp_orig_event(self.level_usage);
    }

    // Starts or resets the holdtime timer.
    pub(crate) fn holdtimer_reset(
        &mut self,
        ifname: &str,
        instance: &InstanceUpView<'_>,
        holdtime: u16,
    ) {
        self.holdtime = holdtime;
        if let Some(holdtimer) = self.holdtimer.as_mut() {
            holdtimer.reset(None);
        } else {
            let task = tasks::adjacency_holdtimer(
                self, ifname, instance, holdtime,
            );
            self.holdtimer = Some(task);
        }
    }
}

impl Drop for Adjacency {
    fn drop(&mut self) {
        Debug::AdjacencyDelete(self).log();
    }
}
