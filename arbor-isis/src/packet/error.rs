//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// IS-IS PDU decoding errors.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    IncompletePdu,
    InvalidIrpdDiscriminator(u8),
    InvalidVersion(u8),
    InvalidIdLength(u8),
    UnknownPduType(u8),
    InvalidPduLength(u16),
    InvalidTlvLength(u8),
    InvalidLspChecksum,
    InvalidAreaAddrLength(u8),
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePdu => {
                write!(f, "incomplete PDU")
            }
            DecodeError::InvalidIrpdDiscriminator(discriminator) => {
                write!(f, "invalid IRPD discriminator: {discriminator}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid version: {version}")
            }
            DecodeError::InvalidIdLength(id_len) => {
                write!(f, "invalid ID length: {id_len}")
            }
            DecodeError::UnknownPduType(pdu_type) => {
                write!(f, "unknown PDU type: {pdu_type}")
            }
            DecodeError::InvalidPduLength(pdu_len) => {
                write!(f, "invalid PDU length: {pdu_len}")
            }
            DecodeError::InvalidTlvLength(tlv_len) => {
                write!(f, "invalid TLV length: {tlv_len}")
            }
            DecodeError::InvalidLspChecksum => {
                write!(f, "invalid LSP checksum")
            }
            DecodeError::InvalidAreaAddrLength(addr_len) => {
                write!(f, "invalid area address length: {addr_len}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompletePdu
    }
}
