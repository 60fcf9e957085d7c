//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::message::Message;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceStart,
    InstanceStop,
    // Neighbors
    NbrFsmEvent(&'a IpAddr, &'a fsm::Event),
    NbrFsmTransition(&'a IpAddr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a IpAddr, &'a Message),
    NbrMsgTx(&'a IpAddr, &'a Message),
    // Best-path selection
    BestPathFound(ipnetwork::IpNetwork, &'a IpAddr),
    BestPathRemoved(ipnetwork::IpNetwork),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Logs the message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::NbrFsmEvent(addr, event) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    });
                });
            }
            Debug::NbrFsmTransition(addr, old_state, new_state) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::NbrMsgRx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(?msg, "{}", self);
                    });
                });
            }
            Debug::NbrMsgTx(addr, msg) => {
                debug_span!("neighbor", %addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(?msg, "{}", self);
                    });
                });
            }
            Debug::BestPathFound(prefix, addr) => {
                debug!(%prefix, nexthop = %addr, "{}", self);
            }
            Debug::BestPathRemoved(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::NbrMsgRx(..) | Debug::NbrMsgTx(..) => {
                write!(f, "message")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathRemoved(..) => {
                write!(f, "best path removed")
            }
        }
    }
}
