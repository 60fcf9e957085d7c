//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

pub const IDRP_DISCRIMINATOR: u8 = 0x83;
pub const VERSION_PROTO_EXT: u8 = 1;
pub const VERSION: u8 = 1;
pub const SYSTEM_ID_LEN: u8 = 6;

// NLPID values advertised in the Protocols Supported TLV.
pub const NLPID_IPV4: u8 = 0xcc;
pub const NLPID_IPV6: u8 = 0x8e;

// IS-IS PDU types.
//
// IANA registry:
// https://www.iana.org/assignments/isis-pdu/isis-pdu.xhtml#pdu
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PduType {
    HelloLanL1 = 15,
    HelloLanL2 = 16,
    HelloP2P = 17,
    LspL1 = 18,
    LspL2 = 20,
    CsnpL1 = 24,
    CsnpL2 = 25,
    PsnpL1 = 26,
    PsnpL2 = 27,
}

// IS-IS top-level TLV types.
//
// IANA registry:
// https://www.iana.org/assignments/isis-tlv-codepoints/isis-tlv-codepoints.xhtml#tlv-codepoints
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum TlvType {
    AreaAddresses = 1,
    IsReach = 2,
    Neighbors = 6,
    Padding = 8,
    LspEntries = 9,
    ExtIsReach = 22,
    Ipv4InternalReach = 128,
    ProtocolsSupported = 129,
    Ipv4ExternalReach = 130,
    Ipv4Addresses = 132,
    ExtIpv4Reach = 135,
    DynamicHostname = 137,
    P2pAdjState = 240,
}

// LSP flags field.
//
// The IS-type bits are kept separate from the flags proper.
pub const LSP_FLAG_PARTITION: u8 = 0x80;
pub const LSP_FLAG_ATT: u8 = 0x08;
pub const LSP_FLAG_OVERLOAD: u8 = 0x04;
pub const LSP_IS_TYPE_MASK: u8 = 0x03;
