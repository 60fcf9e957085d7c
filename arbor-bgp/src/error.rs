//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{error, warn, warn_span};

use crate::packet::error::DecodeError;

// BGP errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    NbrNotFound(IpAddr),
    // Message input
    NbrRxError(IpAddr, DecodeError),
    NbrBadAs(IpAddr, u32, u32),
    NbrBadIdentifier(IpAddr, std::net::Ipv4Addr),
    NbrCapabilityMissing(IpAddr),
    // Other
    InstanceStartError(Box<Error>),
}

// BGP I/O errors.
#[derive(Debug)]
pub enum IoError {
    ListenError(std::io::Error),
    AcceptError(std::io::Error),
    ConnectError(std::io::Error),
    RecvError(std::io::Error),
    SendError(std::io::Error),
    TcpInfoError(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::NbrNotFound(addr) => {
                warn!(%addr, "{}", self);
            }
            Error::NbrRxError(addr, error) => {
                warn_span!("neighbor", %addr).in_scope(|| {
                    warn!(%error, "{}", self);
                });
            }
            Error::NbrBadAs(addr, expected, received) => {
                warn_span!("neighbor", %addr).in_scope(|| {
                    warn!(%expected, %received, "{}", self);
                });
            }
            Error::NbrBadIdentifier(addr, identifier) => {
                warn_span!("neighbor", %addr).in_scope(|| {
                    warn!(%identifier, "{}", self);
                });
            }
            Error::NbrCapabilityMissing(addr) => {
                warn_span!("neighbor", %addr).in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::InstanceStartError(error) => {
                error!(error = %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::NbrNotFound(..) => {
                write!(f, "neighbor not found")
            }
            Error::NbrRxError(..) => {
                write!(f, "failed to decode message")
            }
            Error::NbrBadAs(..) => {
                write!(f, "unexpected peer AS number")
            }
            Error::NbrBadIdentifier(..) => {
                write!(f, "invalid BGP identifier")
            }
            Error::NbrCapabilityMissing(..) => {
                write!(f, "mandatory capability not advertised")
            }
            Error::InstanceStartError(..) => {
                write!(f, "failed to start instance")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::NbrRxError(_, error) => Some(error),
            Error::InstanceStartError(error) => Some(error),
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
            IoError::ListenError(error)
            | IoError::AcceptError(error)
            | IoError::ConnectError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error)
            | IoError::TcpInfoError(error) => {
                warn!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::ListenError(..) => {
                write!(f, "failed to bind listening socket")
            }
            IoError::AcceptError(..) => {
                write!(f, "failed to accept connection")
            }
            IoError::ConnectError(..) => {
                write!(f, "failed to establish connection")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive message")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send message")
            }
            IoError::TcpInfoError(..) => {
                write!(f, "failed to fetch address information")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::ListenError(error)
            | IoError::AcceptError(error)
            | IoError::ConnectError(error)
            | IoError::RecvError(error)
            | IoError::SendError(error)
            | IoError::TcpInfoError(error) => Some(error),
        }
    }
}
