//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{error, warn};

use crate::packet::SystemId;
use crate::packet::error::DecodeError;

// IS-IS errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Packet input
    InterfaceNotFound(String),
    PduDecodeError(DecodeError),
    AdjacencyReject(SystemId, AdjacencyRejectError),
    OwnSystemId(SystemId),
    // Other
    CircuitTypeMismatch,
    InterfaceStartError(String, IoError),
}

// IS-IS I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    SendError(std::io::Error),
}

// Reasons to reject the formation of an adjacency.
#[derive(Debug)]
pub enum AdjacencyRejectError {
    InvalidHelloType,
    CircuitTypeMismatch,
    MaxAreaAddrsMismatch(u8),
    AreaMismatch,
    WrongSystem,
    DuplicateSystemId,
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
            Error::PduDecodeError(error) => {
                warn!(%error, "{}", self);
            }
            Error::AdjacencyReject(system_id, reason) => {
                warn!(%system_id, ?reason, "{}", self);
            }
            Error::OwnSystemId(system_id) => {
                warn!(%system_id, "{}", self);
            }
            Error::CircuitTypeMismatch => {
                warn!("{}", self);
            }
            Error::InterfaceStartError(ifname, error) => {
                error!(%ifname, %error, "{}", self);
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
            Error::PduDecodeError(..) => {
                write!(f, "failed to decode PDU")
            }
            Error::AdjacencyReject(..) => {
                write!(f, "adjacency rejected")
            }
            Error::OwnSystemId(..) => {
                write!(f, "PDU carrying our own system-id")
            }
            Error::CircuitTypeMismatch => {
                write!(f, "hello PDU not matching the circuit type")
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
            Error::PduDecodeError(error) => Some(error),
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
            IoError::SocketError(error)
            | IoError::MulticastJoinError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => {
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
                write!(f, "failed to create raw packet socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive PDU")
            }
            IoError::RecvMissingSourceAddr => {
                write!(f, "missing source address from received PDU")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send PDU")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}
