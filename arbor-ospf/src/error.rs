//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{error, warn, warn_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;

// OSPF errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Packet input
    InterfaceNotFound(String),
    InvalidSrcAddr(Ipv4Addr),
    DuplicateRouterId(Ipv4Addr, Ipv4Addr),
    PacketDecodeError(DecodeError),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    // SPF
    SpfNexthopCalcError(Ipv4Addr),
    // Other
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    InterfaceStartError(String, IoError),
}

// OSPF I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(Ipv4Addr, std::io::Error),
    MulticastLeaveError(Ipv4Addr, std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    SendError(std::io::Error),
}

// OSPF interface configuration errors.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    MtuMismatch(u16),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::InterfaceNotFound(ifname) => {
                warn!(%ifname, "{}", self);
            }
            Error::InvalidSrcAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::DuplicateRouterId(router_id, source) => {
                warn!(%router_id, %source, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(%error, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::InterfaceCfgError(iface, source, _, error) => {
                warn_span!("interface", name = %iface, %source).in_scope(
                    || {
                        warn!("{}", error);
                    },
                )
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, "{}", self);
                })
            }
            Error::SpfNexthopCalcError(router_id) => {
                warn!(%router_id, "{}", self);
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn!(?state, ?event, "{}", self);
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn!(%router_id, ?state, ?event, "{}", self);
            }
            Error::InterfaceStartError(ifname, error) => {
                error!(%ifname, error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::InterfaceNotFound(..) => {
                write!(f, "interface not found")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::DuplicateRouterId(..) => {
                write!(f, "packet advertising our own router-id")
            }
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::InterfaceCfgError(..) => {
                write!(f, "interface configuration error")
            }
            Error::DbDescReject(..) => {
                write!(f, "database description packet rejected")
            }
            Error::SpfNexthopCalcError(..) => {
                write!(f, "failed to calculate nexthop address")
            }
            Error::IsmUnexpectedEvent(..) => {
                write!(f, "unexpected event in the interface state machine")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event in the neighbor state machine")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(%error, "{}", self);
            }
            IoError::MulticastJoinError(addr, error)
            | IoError::MulticastLeaveError(addr, error) => {
                warn!(?addr, %error, "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(%error, "{}", self);
            }
            IoError::RecvMissingSourceAddr => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw IP socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::MulticastLeaveError(..) => {
                write!(f, "failed to leave multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(f, "missing source address from received packet")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::MulticastLeaveError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl InterfaceCfgError =====

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(expected, received) => {
                write!(f, "area-id mismatch (expected {expected}, received {received})")
            }
            InterfaceCfgError::HelloMaskMismatch(expected, received) => {
                write!(f, "network mask mismatch (expected {expected}, received {received})")
            }
            InterfaceCfgError::HelloIntervalMismatch(expected, received) => {
                write!(f, "hello-interval mismatch (expected {expected}, received {received})")
            }
            InterfaceCfgError::DeadIntervalMismatch(expected, received) => {
                write!(f, "dead-interval mismatch (expected {expected}, received {received})")
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                write!(f, "MTU mismatch (received {mtu})")
            }
        }
    }
}

// ===== helper functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    match error.source() {
        Some(source) => format!("{} ({})", error, with_source(source)),
        None => error.to_string(),
    }
}
