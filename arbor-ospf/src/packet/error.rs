//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// OSPF message decoding errors.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidIpHdrLength(u16),
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidLength(u16),
    InvalidRouterId(Ipv4Addr),
    InvalidChecksum,
    UnsupportedAuthType(u16),
    InvalidLsaLength(u16),
    UnknownLsaType(u8),
    UnknownRouterLinkType(u8),
    InvalidLsaChecksum,
    InvalidLsaAge(u16),
    InvalidLsaSeqNo(u32),
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "incomplete packet")
            }
            DecodeError::InvalidIpHdrLength(len) => {
                write!(f, "invalid IP header length: {len}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid version: {version}")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {pkt_type}")
            }
            DecodeError::InvalidLength(len) => {
                write!(f, "invalid length: {len}")
            }
            DecodeError::InvalidRouterId(router_id) => {
                write!(f, "invalid router-id: {router_id}")
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::UnsupportedAuthType(au_type) => {
                write!(f, "unsupported authentication type: {au_type}")
            }
            DecodeError::InvalidLsaLength(len) => {
                write!(f, "invalid LSA length: {len}")
            }
            DecodeError::UnknownLsaType(lsa_type) => {
                write!(f, "unknown LSA type: {lsa_type}")
            }
            DecodeError::UnknownRouterLinkType(link_type) => {
                write!(f, "unknown router link type: {link_type}")
            }
            DecodeError::InvalidLsaChecksum => {
                write!(f, "invalid LSA checksum")
            }
            DecodeError::InvalidLsaAge(age) => {
                write!(f, "invalid LSA age: {age}")
            }
            DecodeError::InvalidLsaSeqNo(seq_no) => {
                write!(f, "invalid LSA sequence number: {seq_no}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompletePacket
    }
}
