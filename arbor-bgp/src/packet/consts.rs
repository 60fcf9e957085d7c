//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

// BGP version number.
pub const BGP_VERSION: u8 = 4;

// AS_TRANS, used in the OPEN message by 4-byte AS speakers (RFC 6793).
pub const AS_TRANS: u16 = 23456;

// BGP message types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-1
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    RouteRefresh = 5,
}

// BGP OPEN optional parameter types.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
pub enum OpenParamType {
    Capabilities = 2,
}

// BGP capability codes.
//
// IANA registry:
// https://www.iana.org/assignments/capability-codes/capability-codes.xhtml
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CapabilityCode {
    MultiProtocol = 1,
    RouteRefresh = 2,
    GracefulRestart = 64,
    FourOctetAsNumber = 65,
}

// Address Family Identifiers.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Subsequent Address Family Identifiers.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Safi {
    Unicast = 1,
    FlowspecUnicast = 133,
}

// BGP path attribute types.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-2
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AttrType {
    Origin = 1,
    AsPath = 2,
    Nexthop = 3,
    Med = 4,
    LocalPref = 5,
    AtomicAggregate = 6,
    Aggregator = 7,
    Communities = 8,
    OriginatorId = 9,
    ClusterList = 10,
    MpReachNlri = 14,
    MpUnreachNlri = 15,
    As4Path = 17,
    As4Aggregator = 18,
}

// ORIGIN attribute values, ordered by preference.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

// BGP error codes (NOTIFICATION message).
//
// IANA registry:
// https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-3
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ErrorCode {
    MessageHeaderError = 1,
    OpenMessageError = 2,
    UpdateMessageError = 3,
    HoldTimerExpired = 4,
    FiniteStateMachineError = 5,
    Cease = 6,
}

// Message header error subcodes.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MessageHeaderErrorSubcode {
    ConnectionNotSynchronized = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

// OPEN message error subcodes.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum OpenMessageErrorSubcode {
    UnsupportedVersionNumber = 1,
    BadPeerAs = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptParam = 4,
    UnacceptableHoldTime = 6,
    UnsupportedCapability = 7,
}

// UPDATE message error subcodes.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UpdateMessageErrorSubcode {
    MalformedAttributeList = 1,
    UnrecognizedWellKnownAttribute = 2,
    MissingWellKnownAttribute = 3,
    AttributeFlagsError = 4,
    AttributeLengthError = 5,
    InvalidOriginAttribute = 6,
    InvalidNexthopAttribute = 8,
    OptionalAttributeError = 9,
    InvalidNetworkField = 10,
    MalformedAsPath = 11,
}

// FSM error subcodes.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum FsmErrorSubcode {
    UnexpectedMessageInOpenSent = 1,
    UnexpectedMessageInOpenConfirm = 2,
    UnexpectedMessageInEstablished = 3,
}

// Cease subcodes.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CeaseSubcode {
    MaximumNumberOfPrefixesReached = 1,
    AdministrativeShutdown = 2,
    PeerDeconfigured = 3,
    AdministrativeReset = 4,
    ConnectionRejected = 5,
    OtherConfigurationChange = 6,
    ConnectionCollisionResolution = 7,
    OutOfResources = 8,
}

// Well-known communities.
//
// IANA registry:
// https://www.iana.org/assignments/bgp-well-known-communities/bgp-well-known-communities.xhtml
pub const COMM_NO_EXPORT: u32 = 0xffff_ff01;
pub const COMM_NO_ADVERTISE: u32 = 0xffff_ff02;

// ===== conversions to raw codes =====

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        code as u8
    }
}

impl From<MessageHeaderErrorSubcode> for u8 {
    fn from(subcode: MessageHeaderErrorSubcode) -> u8 {
        subcode as u8
    }
}

impl From<OpenMessageErrorSubcode> for u8 {
    fn from(subcode: OpenMessageErrorSubcode) -> u8 {
        subcode as u8
    }
}

impl From<UpdateMessageErrorSubcode> for u8 {
    fn from(subcode: UpdateMessageErrorSubcode) -> u8 {
        subcode as u8
    }
}

impl From<FsmErrorSubcode> for u8 {
    fn from(subcode: FsmErrorSubcode) -> u8 {
        subcode as u8
    }
}

impl From<CeaseSubcode> for u8 {
    fn from(subcode: CeaseSubcode) -> u8 {
        subcode as u8
    }
}
