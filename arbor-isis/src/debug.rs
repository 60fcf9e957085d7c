//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::adjacency::{Adjacency, AdjacencyEvent, AdjacencyState};
use crate::packet::pdu::Pdu;
use crate::packet::{LanId, LevelNumber, LspId};

// IS-IS debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceStart,
    InstanceStop,
    // Interfaces
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    // Adjacencies
    AdjacencyCreate(&'a Adjacency),
    AdjacencyDelete(&'a Adjacency),
    AdjacencyStateChange(&'a Adjacency, AdjacencyState, AdjacencyEvent),
    DisChange(&'a str, LevelNumber, Option<LanId>),
    // Network
    PduRx(&'a str, &'a Pdu),
    PduTx(&'a str, &'a Pdu),
    // LSDB maintenance
    LspInstall(LevelNumber, &'a LspId, u32),
    LspOriginate(LevelNumber, &'a LspId, u32),
    LspRefresh(LevelNumber, &'a LspId, u32),
    LspPurge(LevelNumber, &'a LspId),
    // SPF
    SpfStart(LevelNumber),
    SpfFinish(LevelNumber, u32),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Logs the message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::InterfaceStart(name) | Debug::InterfaceStop(name) => {
                debug!(%name, "{}", self);
            }
            Debug::AdjacencyCreate(adj) | Debug::AdjacencyDelete(adj) => {
                debug!(system_id = %adj.system_id, "{}", self);
            }
            Debug::AdjacencyStateChange(adj, new_state, event) => {
                debug_span!("adjacency", system_id = %adj.system_id)
                    .in_scope(|| {
                        debug!(?new_state, ?event, "{}", self);
                    });
            }
            Debug::DisChange(name, level, dis) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?level, ?dis, "{}", self);
                });
            }
            Debug::PduRx(ifname, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%ifname, ?pdu, "{}", self);
                    });
                });
            }
            Debug::PduTx(ifname, pdu) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(%ifname, ?pdu, "{}", self);
                    });
                });
            }
            Debug::LspInstall(level, lsp_id, seqno)
            | Debug::LspOriginate(level, lsp_id, seqno)
            | Debug::LspRefresh(level, lsp_id, seqno) => {
                debug!(?level, %lsp_id, %seqno, "{}", self);
            }
            Debug::LspPurge(level, lsp_id) => {
                debug!(?level, %lsp_id, "{}", self);
            }
            Debug::SpfStart(level) => {
                debug!(?level, "{}", self);
            }
            Debug::SpfFinish(level, run_duration_us) => {
                debug!(?level, %run_duration_us, "{}", self);
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
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::AdjacencyCreate(..) => {
                write!(f, "adjacency created")
            }
            Debug::AdjacencyDelete(..) => {
                write!(f, "adjacency deleted")
            }
            Debug::AdjacencyStateChange(..) => {
                write!(f, "adjacency state change")
            }
            Debug::DisChange(..) => {
                write!(f, "DIS change")
            }
            Debug::PduRx(..) | Debug::PduTx(..) => {
                write!(f, "PDU")
            }
            Debug::LspInstall(..) => {
                write!(f, "installing LSP")
            }
            Debug::LspOriginate(..) => {
                write!(f, "originating LSP")
            }
            Debug::LspRefresh(..) => {
                write!(f, "refreshing LSP")
            }
            Debug::LspPurge(..) => {
                write!(f, "purging LSP")
            }
            Debug::SpfStart(..) => {
                write!(f, "starting SPF calculation")
            }
            Debug::SpfFinish(..) => {
                write!(f, "finished SPF calculation")
            }
        }
    }
}
