//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use arbor_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::packet::attribute::{
    Attrs, decode_ipv4_prefix, decode_ipv6_prefix, encode_ipv4_prefix,
    encode_ipv6_prefix,
};
use crate::packet::consts::{
    Afi, BGP_VERSION, CapabilityCode, MessageType, OpenParamType, Safi,
};
use crate::packet::error::{
    DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    UpdateMessageError,
};
use ipnetwork::{Ipv4Network, Ipv6Network};

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(UpdateMsg),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
}

//
// OPEN Message.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

//
// Capabilities Optional Parameter.
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol {
        afi: Afi,
        safi: Safi,
    },
    FourOctetAsNumber {
        asn: u32,
    },
    RouteRefresh,
    GracefulRestart {
        restart_time: u16,
        restarting: bool,
        afi_safis: Vec<(Afi, Safi)>,
    },
}

// A stripped down version of `Capability`, containing only data that is
// relevant in terms of capability negotiation.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum NegotiatedCapability {
    MultiProtocol { afi: Afi, safi: Safi },
    FourOctetAsNumber,
    RouteRefresh,
    GracefulRestart,
}

//
// UPDATE Message.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[skip_serializing_none]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    pub reach: Option<ReachNlri>,
    pub unreach: Option<UnreachNlri>,
    pub mp_reach: Option<MpReachNlri>,
    pub mp_unreach: Option<MpUnreachNlri>,
    pub attrs: Option<Attrs>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ReachNlri {
    pub prefixes: Vec<Ipv4Network>,
    pub nexthop: Ipv4Addr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UnreachNlri {
    pub prefixes: Vec<Ipv4Network>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MpReachNlri {
    Ipv6Unicast {
        prefixes: Vec<Ipv6Network>,
        nexthop: Ipv6Addr,
        ll_nexthop: Option<Ipv6Addr>,
    },
    // Traffic-filter rules, carried opaquely.
    FlowspecIpv4 {
        rules: Vec<FlowspecRule>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MpUnreachNlri {
    Ipv6Unicast { prefixes: Vec<Ipv6Network> },
    FlowspecIpv4 { rules: Vec<FlowspecRule> },
}

// A single FlowSpec NLRI, kept as raw match components since no local
// filtering policy is attached to them.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FlowspecRule {
    pub raw: Bytes,
}

//
// NOTIFICATION Message.
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a
// length of 19 octets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

//
// ROUTE-REFRESH Message.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub afi: u16,
    pub safi: u8,
}

// BGP message encoding context.
#[derive(Clone, Debug)]
pub struct EncodeCxt {
    pub four_octet_asns: bool,
}

// BGP message decoding context.
#[derive(Clone, Debug)]
pub struct DecodeCxt {
    pub four_octet_asns: bool,
}

// ===== impl Message =====

impl Message {
    pub const MIN_LEN: u16 = 19;
    pub const MAX_LEN: u16 = 4096;
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self, cxt: &EncodeCxt) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf, cxt),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
                Message::RouteRefresh(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Decodes buffer into a BGP message.
    pub fn decode(data: &[u8], cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Parse and validate marker.
        let marker = buf.try_get_u128()?;
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.try_get_u16()?;
        if msg_len < Self::MIN_LEN
            || msg_len > Self::MAX_LEN
            || msg_len as usize != data.len()
        {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse message type.
        let msg_type = buf.try_get_u8()?;
        let Some(msg_type) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        match msg_type {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf, cxt)?;
                Ok(Message::Update(msg))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => Ok(Message::Keepalive(KeepaliveMsg {})),
            MessageType::RouteRefresh => {
                let msg = RouteRefreshMsg::decode(&mut buf)?;
                Ok(Message::RouteRefresh(msg))
            }
        }
    }

    // Parses the given buffer to determine if it contains a complete BGP
    // message, and returns the length of the message if successful.
    pub fn get_message_len(data: &[u8]) -> Option<usize> {
        if data.len() < Self::MIN_LEN as usize {
            return None;
        }

        let msg_len = u16::from_be_bytes([data[16], data[17]]);
        if msg_len < Self::MIN_LEN || msg_len as usize > data.len() {
            return None;
        }

        Some(msg_len as usize)
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    const MIN_LEN: u16 = 29;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Capabilities, one optional parameter each.
        let opt_param_len_pos = buf.len();
        buf.put_u8(0);
        for capability in &self.capabilities {
            buf.put_u8(OpenParamType::Capabilities as u8);

            // The "Parm. Length" field will be initialized later.
            let param_len_pos = buf.len();
            buf.put_u8(0);

            // Encode individual capability.
            capability.encode(buf);

            // Rewrite the "Parm. Length" field.
            let param_len = buf.len() - param_len_pos - 1;
            buf[param_len_pos] = param_len as u8;
        }

        // Rewrite the "Opt Parm Len" field.
        let opt_param_len = buf.len() - opt_param_len_pos - 1;
        buf[opt_param_len_pos] = opt_param_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // Parse and validate BGP version.
        let version = buf.try_get_u8()?;
        if version != BGP_VERSION {
            return Err(OpenMessageError::UnsupportedVersion(version).into());
        }

        // Parse and validate ASN.
        let my_as = buf.try_get_u16()?;
        if my_as == 0 {
            return Err(OpenMessageError::BadPeerAs.into());
        }

        // Parse and validate hold time.
        let holdtime = buf.try_get_u16()?;
        if holdtime == 1 || holdtime == 2 {
            return Err(OpenMessageError::UnacceptableHoldTime.into());
        }

        // Parse and validate BGP identifier.
        let identifier = buf.try_get_ipv4()?;
        if identifier.is_unspecified()
            || identifier.is_multicast()
            || identifier.is_broadcast()
        {
            return Err(OpenMessageError::BadBgpIdentifier.into());
        }

        // Parse and validate optional parameters.
        let mut capabilities = BTreeSet::new();
        let opt_param_len = buf.try_get_u8()?;
        if opt_param_len as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut buf_opts = buf.copy_to_bytes(opt_param_len as usize);
        while buf_opts.remaining() > 0 {
            if buf_opts.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = buf_opts.try_get_u8()?;
            let param_len = buf_opts.try_get_u8()?;
            if param_len as usize > buf_opts.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut buf_param_value =
                buf_opts.copy_to_bytes(param_len as usize);

            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    while buf_param_value.remaining() > 0 {
                        if let Some(cap) =
                            Capability::decode(&mut buf_param_value)?
                        {
                            capabilities.insert(cap);
                        }
                    }
                }
                None => {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            my_as,
            holdtime,
            identifier,
            capabilities,
        })
    }

    // Returns the real (4-octet aware) AS number of the peer.
    pub fn real_as(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|cap| match cap {
                Capability::FourOctetAsNumber { asn } => Some(*asn),
                _ => None,
            })
            .unwrap_or(self.my_as as u32)
    }
}

// ===== impl Capability =====

impl Capability {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                buf.put_u8(CapabilityCode::MultiProtocol as u8);
                buf.put_u8(4);
                buf.put_u16(*afi as u16);
                buf.put_u8(0);
                buf.put_u8(*safi as u8);
            }
            Capability::FourOctetAsNumber { asn } => {
                buf.put_u8(CapabilityCode::FourOctetAsNumber as u8);
                buf.put_u8(4);
                buf.put_u32(*asn);
            }
            Capability::RouteRefresh => {
                buf.put_u8(CapabilityCode::RouteRefresh as u8);
                buf.put_u8(0);
            }
            Capability::GracefulRestart {
                restart_time,
                restarting,
                afi_safis,
            } => {
                buf.put_u8(CapabilityCode::GracefulRestart as u8);
                buf.put_u8(2 + afi_safis.len() as u8 * 4);
                let mut flags_time = restart_time & 0x0fff;
                if *restarting {
                    flags_time |= 0x8000;
                }
                buf.put_u16(flags_time);
                for (afi, safi) in afi_safis {
                    buf.put_u16(*afi as u16);
                    buf.put_u8(*safi as u8);
                    // Forwarding state preserved.
                    buf.put_u8(0x80);
                }
            }
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Option<Self>> {
        if buf.remaining() < 2 {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let code = buf.try_get_u8()?;
        let length = buf.try_get_u8()?;
        if length as usize > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut value = buf.copy_to_bytes(length as usize);

        let cap = match CapabilityCode::from_u8(code) {
            Some(CapabilityCode::MultiProtocol) => {
                let afi = value.try_get_u16()?;
                let _reserved = value.try_get_u8()?;
                let safi = value.try_get_u8()?;
                let (Some(afi), Some(safi)) =
                    (Afi::from_u16(afi), Safi::from_u8(safi))
                else {
                    // Unsupported AFI/SAFI pairs are ignored.
                    return Ok(None);
                };
                Some(Capability::MultiProtocol { afi, safi })
            }
            Some(CapabilityCode::FourOctetAsNumber) => {
                let asn = value.try_get_u32()?;
                Some(Capability::FourOctetAsNumber { asn })
            }
            Some(CapabilityCode::RouteRefresh) => Some(Capability::RouteRefresh),
            Some(CapabilityCode::GracefulRestart) => {
                let flags_time = value.try_get_u16()?;
                let restarting = flags_time & 0x8000 != 0;
                let restart_time = flags_time & 0x0fff;
                let mut afi_safis = vec![];
                while value.remaining() >= 4 {
                    let afi = value.try_get_u16()?;
                    let safi = value.try_get_u8()?;
                    let _flags = value.try_get_u8()?;
                    if let (Some(afi), Some(safi)) =
                        (Afi::from_u16(afi), Safi::from_u8(safi))
                    {
                        afi_safis.push((afi, safi));
                    }
                }
                Some(Capability::GracefulRestart {
                    restart_time,
                    restarting,
                    afi_safis,
                })
            }
            None => None,
        };

        Ok(cap)
    }

    // Returns the negotiation-relevant form of this capability.
    pub fn as_negotiated(&self) -> NegotiatedCapability {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                NegotiatedCapability::MultiProtocol {
                    afi: *afi,
                    safi: *safi,
                }
            }
            Capability::FourOctetAsNumber { .. } => {
                NegotiatedCapability::FourOctetAsNumber
            }
            Capability::RouteRefresh => NegotiatedCapability::RouteRefresh,
            Capability::GracefulRestart { .. } => {
                NegotiatedCapability::GracefulRestart
            }
        }
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    const MIN_LEN: u16 = 23;

    fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(MessageType::Update as u8);

        // Withdrawn routes.
        let withdrawn_len_pos = buf.len();
        buf.put_u16(0);
        if let Some(unreach) = &self.unreach {
            for prefix in &unreach.prefixes {
                encode_ipv4_prefix(buf, prefix);
            }
            let withdrawn_len = (buf.len() - withdrawn_len_pos - 2) as u16;
            buf[withdrawn_len_pos..withdrawn_len_pos + 2]
                .copy_from_slice(&withdrawn_len.to_be_bytes());
        }

        // Path attributes.
        let attrs_len_pos = buf.len();
        buf.put_u16(0);
        match &self.attrs {
            Some(attrs) => {
                attrs.encode(buf, cxt, &self.mp_reach, &self.mp_unreach);
            }
            None => {
                // A message carrying only withdrawals still needs the
                // MP_UNREACH_NLRI attribute.
                if let Some(mp_unreach) = &self.mp_unreach {
                    crate::packet::attribute::encode_mp_unreach(
                        buf, mp_unreach,
                    );
                }
            }
        }
        let attrs_len = (buf.len() - attrs_len_pos - 2) as u16;
        buf[attrs_len_pos..attrs_len_pos + 2]
            .copy_from_slice(&attrs_len.to_be_bytes());

        // NLRI.
        if let Some(reach) = &self.reach {
            for prefix in &reach.prefixes {
                encode_ipv4_prefix(buf, prefix);
            }
        }
    }

    fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> DecodeResult<Self> {
        // Withdrawn routes.
        let withdrawn_len = buf.try_get_u16()?;
        if withdrawn_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let mut unreach = None;
        if withdrawn_len > 0 {
            let mut buf_withdrawn =
                buf.copy_to_bytes(withdrawn_len as usize);
            let mut prefixes = vec![];
            while buf_withdrawn.remaining() > 0 {
                prefixes.push(decode_ipv4_prefix(&mut buf_withdrawn)?);
            }
            unreach = Some(UnreachNlri { prefixes });
        }

        // Path attributes.
        let attrs_len = buf.try_get_u16()?;
        if attrs_len as usize > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let mut attrs = None;
        let mut mp_reach = None;
        let mut mp_unreach = None;
        if attrs_len > 0 {
            let mut buf_attrs = buf.copy_to_bytes(attrs_len as usize);
            attrs = Attrs::decode(
                &mut buf_attrs,
                cxt,
                &mut mp_reach,
                &mut mp_unreach,
            )?;
        }

        // NLRI.
        let mut reach = None;
        if buf.remaining() > 0 {
            let mut prefixes = vec![];
            while buf.remaining() > 0 {
                prefixes.push(decode_ipv4_prefix(buf)?);
            }

            // NEXT_HOP is mandatory when the message carries IPv4 NLRIs.
            let nexthop = attrs
                .as_ref()
                .and_then(|attrs| attrs.base.nexthop)
                .ok_or(UpdateMessageError::MissingWellKnownAttribute(
                    crate::packet::consts::AttrType::Nexthop as u8,
                ))?;
            reach = Some(ReachNlri { prefixes, nexthop });
        }

        Ok(UpdateMsg {
            reach,
            unreach,
            mp_reach,
            mp_unreach,
            attrs,
        })
    }

    // An UPDATE with no routes at all is an End-of-RIB marker.
    pub fn is_end_of_rib(&self) -> bool {
        self.reach.is_none()
            && self.unreach.is_none()
            && self.mp_reach.is_none()
            && self.mp_unreach.is_none()
    }
}

// ===== impl MpReachNlri =====

impl MpReachNlri {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.try_get_u16()?;
        let safi = buf.try_get_u8()?;
        let (Some(afi), Some(safi)) = (Afi::from_u16(afi), Safi::from_u8(safi))
        else {
            return Err(UpdateMessageError::OptionalAttributeError.into());
        };

        let nh_len = buf.try_get_u8()?;
        if nh_len as usize > buf.remaining() {
            return Err(UpdateMessageError::OptionalAttributeError.into());
        }
        let mut buf_nh = buf.copy_to_bytes(nh_len as usize);
        let _reserved = buf.try_get_u8()?;

        match (afi, safi) {
            (Afi::Ipv6, Safi::Unicast) => {
                if nh_len != 16 && nh_len != 32 {
                    return Err(
                        UpdateMessageError::InvalidNexthopAttribute.into()
                    );
                }
                let nexthop = buf_nh.try_get_ipv6()?;
                let ll_nexthop = match nh_len {
                    32 => Some(buf_nh.try_get_ipv6()?),
                    _ => None,
                };
                let mut prefixes = vec![];
                while buf.remaining() > 0 {
                    prefixes.push(decode_ipv6_prefix(buf)?);
                }
                Ok(MpReachNlri::Ipv6Unicast {
                    prefixes,
                    nexthop,
                    ll_nexthop,
                })
            }
            (Afi::Ipv4, Safi::FlowspecUnicast) => {
                let rules = FlowspecRule::decode_list(buf)?;
                Ok(MpReachNlri::FlowspecIpv4 { rules })
            }
            _ => Err(UpdateMessageError::OptionalAttributeError.into()),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            MpReachNlri::Ipv6Unicast {
                prefixes,
                nexthop,
                ll_nexthop,
            } => {
                buf.put_u16(Afi::Ipv6 as u16);
                buf.put_u8(Safi::Unicast as u8);
                match ll_nexthop {
                    Some(ll_nexthop) => {
                        buf.put_u8(32);
                        buf.put_ipv6(nexthop);
                        buf.put_ipv6(ll_nexthop);
                    }
                    None => {
                        buf.put_u8(16);
                        buf.put_ipv6(nexthop);
                    }
                }
                buf.put_u8(0);
                for prefix in prefixes {
                    encode_ipv6_prefix(buf, prefix);
                }
            }
            MpReachNlri::FlowspecIpv4 { rules } => {
                buf.put_u16(Afi::Ipv4 as u16);
                buf.put_u8(Safi::FlowspecUnicast as u8);
                buf.put_u8(0);
                buf.put_u8(0);
                for rule in rules {
                    rule.encode(buf);
                }
            }
        }
    }
}

// ===== impl MpUnreachNlri =====

impl MpUnreachNlri {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.try_get_u16()?;
        let safi = buf.try_get_u8()?;
        let (Some(afi), Some(safi)) = (Afi::from_u16(afi), Safi::from_u8(safi))
        else {
            return Err(UpdateMessageError::OptionalAttributeError.into());
        };

        match (afi, safi) {
            (Afi::Ipv6, Safi::Unicast) => {
                let mut prefixes = vec![];
                while buf.remaining() > 0 {
                    prefixes.push(decode_ipv6_prefix(buf)?);
                }
                Ok(MpUnreachNlri::Ipv6Unicast { prefixes })
            }
            (Afi::Ipv4, Safi::FlowspecUnicast) => {
                let rules = FlowspecRule::decode_list(buf)?;
                Ok(MpUnreachNlri::FlowspecIpv4 { rules })
            }
            _ => Err(UpdateMessageError::OptionalAttributeError.into()),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            MpUnreachNlri::Ipv6Unicast { prefixes } => {
                buf.put_u16(Afi::Ipv6 as u16);
                buf.put_u8(Safi::Unicast as u8);
                for prefix in prefixes {
                    encode_ipv6_prefix(buf, prefix);
                }
            }
            MpUnreachNlri::FlowspecIpv4 { rules } => {
                buf.put_u16(Afi::Ipv4 as u16);
                buf.put_u8(Safi::FlowspecUnicast as u8);
                for rule in rules {
                    rule.encode(buf);
                }
            }
        }
    }
}

// ===== impl FlowspecRule =====

impl FlowspecRule {
    fn decode_list(buf: &mut Bytes) -> DecodeResult<Vec<FlowspecRule>> {
        let mut rules = vec![];
        while buf.remaining() > 0 {
            // NLRI length: one byte below 240, two bytes otherwise.
            let first = buf.try_get_u8()?;
            let length = if first < 0xf0 {
                first as usize
            } else {
                let second = buf.try_get_u8()?;
                (((first as usize) & 0x0f) << 8) | second as usize
            };
            if length > buf.remaining() {
                return Err(UpdateMessageError::InvalidNetworkField.into());
            }
            let raw = buf.copy_to_bytes(length);
            rules.push(FlowspecRule { raw });
        }
        Ok(rules)
    }

    fn encode(&self, buf: &mut BytesMut) {
        let length = self.raw.len();
        if length < 0xf0 {
            buf.put_u8(length as u8);
        } else {
            buf.put_u8(0xf0 | ((length >> 8) as u8 & 0x0f));
            buf.put_u8(length as u8);
        }
        buf.put_slice(&self.raw);
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let error_code = buf.try_get_u8()?;
        let error_subcode = buf.try_get_u8()?;
        let data = buf.to_vec();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data,
        })
    }

    pub fn new(
        error_code: impl Into<u8>,
        error_subcode: impl Into<u8>,
    ) -> NotificationMsg {
        NotificationMsg {
            error_code: error_code.into(),
            error_subcode: error_subcode.into(),
            data: vec![],
        }
    }
}

impl From<&DecodeError> for NotificationMsg {
    fn from(error: &DecodeError) -> NotificationMsg {
        let (error_code, error_subcode) = error.code_subcode();
        NotificationMsg {
            error_code,
            error_subcode,
            data: vec![],
        }
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }
}

// ===== impl RouteRefreshMsg =====

impl RouteRefreshMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::RouteRefresh as u8);
        buf.put_u16(self.afi);
        buf.put_u8(0);
        buf.put_u8(self.safi);
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.try_get_u16()?;
        let _reserved = buf.try_get_u8()?;
        let safi = buf.try_get_u8()?;

        Ok(RouteRefreshMsg { afi, safi })
    }
}
