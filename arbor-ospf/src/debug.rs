//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{debug, debug_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::lsa::LsaHdr;

// OSPF debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceStart,
    InstanceStop,
    // Interfaces
    InterfaceStart(&'a str),
    InterfaceStop(&'a str),
    IsmEvent(&'a str, &'a ism::State, &'a ism::Event),
    IsmTransition(&'a str, &'a ism::State, &'a ism::State),
    IsmDrElection(&'a str, Option<Ipv4Addr>, Option<Ipv4Addr>),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a str, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaFlush(&'a LsaHdr),
    LsaRefresh(&'a LsaHdr),
    // SPF
    SpfStart,
    SpfFinish(u32),
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
            Debug::IsmEvent(name, state, event) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    });
                });
            }
            Debug::IsmTransition(name, old_state, new_state) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::IsmDrElection(name, dr, bdr) => {
                debug_span!("interface", %name).in_scope(|| {
                    debug!(?dr, ?bdr, "{}", self);
                });
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                debug!(%router_id, "{}", self);
            }
            Debug::NsmEvent(router_id, state, event) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    });
                });
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    });
                });
            }
            Debug::PacketRx(ifname, src, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(%ifname, %src, ?packet, "{}", self);
                    });
                });
            }
            Debug::PacketTx(ifindex, dst, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(%ifindex, %dst, ?packet, "{}", self);
                    });
                });
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaFlush(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr) => {
                debug!(
                    lsa_type = ?lsa_hdr.lsa_type,
                    lsa_id = %lsa_hdr.lsa_id,
                    adv_rtr = %lsa_hdr.adv_rtr,
                    seq_no = %lsa_hdr.seq_no,
                    "{}", self
                );
            }
            Debug::SpfStart => {
                debug!("{}", self);
            }
            Debug::SpfFinish(run_duration_us) => {
                debug!(%run_duration_us, "{}", self);
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
            Debug::IsmEvent(..) => {
                write!(f, "event")
            }
            Debug::IsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::IsmDrElection(..) => {
                write!(f, "DR election")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::SpfStart => {
                write!(f, "starting SPF calculation")
            }
            Debug::SpfFinish(..) => {
                write!(f, "finished SPF calculation")
            }
        }
    }
}
