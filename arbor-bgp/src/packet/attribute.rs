//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, VecDeque};
use std::net::{Ipv4Addr, Ipv6Addr};

use arbor_utils::bytes::{BytesExt, BytesMutExt};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::{Ipv4Network, Ipv6Network};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{Afi, AttrType, Origin, Safi};
use crate::packet::error::{DecodeResult, UpdateMessageError};
use crate::packet::message::{DecodeCxt, EncodeCxt, MpReachNlri, MpUnreachNlri};

// BGP path attribute flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXT_LENGTH = 0x10;
    }
}

// Decoded path attributes.
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub base: BaseAttrs,
    pub comm: Option<BTreeSet<u32>>,
    pub unknown: Vec<UnknownAttr>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct BaseAttrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub nexthop: Option<Ipv4Addr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub atomic_aggregate: bool,
    pub aggregator: Option<Aggregator>,
    pub originator_id: Option<Ipv4Addr>,
    pub cluster_list: Option<Vec<Ipv4Addr>>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u32,
    pub addr: Ipv4Addr,
}

//
// AS_PATH attribute: an ordered list of AS_SET and AS_SEQUENCE segments.
//
#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsSegmentType,
    pub members: VecDeque<u32>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AsSegmentType {
    Set = 1,
    Sequence = 2,
}

// Unrecognized optional transitive attribute, preserved for propagation.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub value: Bytes,
}

// ===== impl Attrs =====

impl Attrs {
    // Decodes the path attributes of an UPDATE message. The MP_REACH and
    // MP_UNREACH attributes are extracted separately since they carry
    // NLRIs rather than path properties.
    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
        mp_reach: &mut Option<MpReachNlri>,
        mp_unreach: &mut Option<MpUnreachNlri>,
    ) -> DecodeResult<Option<Self>> {
        let mut origin = None;
        let mut as_path = None;
        let mut nexthop = None;
        let mut med = None;
        let mut local_pref = None;
        let mut atomic_aggregate = false;
        let mut aggregator = None;
        let mut originator_id = None;
        let mut cluster_list = None;
        let mut comm = None;
        let mut unknown = vec![];

        while buf.remaining() > 0 {
            if buf.remaining() < 3 {
                return Err(UpdateMessageError::MalformedAttributeList.into());
            }
            let flags = AttrFlags::from_bits_truncate(buf.try_get_u8()?);
            let attr_type_raw = buf.try_get_u8()?;
            let attr_len = match flags.contains(AttrFlags::EXT_LENGTH) {
                true => buf.try_get_u16()?,
                false => buf.try_get_u8()? as u16,
            };
            if attr_len as usize > buf.remaining() {
                return Err(
                    UpdateMessageError::AttributeLengthError(attr_type_raw)
                        .into(),
                );
            }
            let mut value = buf.copy_to_bytes(attr_len as usize);

            let Some(attr_type) = AttrType::from_u8(attr_type_raw) else {
                // Unrecognized attributes: optional transitive ones are
                // kept for propagation, optional non-transitive ones are
                // ignored, anything else is a protocol error.
                if !flags.contains(AttrFlags::OPTIONAL) {
                    return Err(
                        UpdateMessageError::UnrecognizedWellKnownAttribute(
                            attr_type_raw,
                        )
                        .into(),
                    );
                }
                if flags.contains(AttrFlags::TRANSITIVE) {
                    unknown.push(UnknownAttr {
                        attr_type: attr_type_raw,
                        flags,
                        value,
                    });
                }
                continue;
            };

            // Validate attribute flags: well-known attributes must be
            // transitive and non-optional.
            let well_known = matches!(
                attr_type,
                AttrType::Origin
                    | AttrType::AsPath
                    | AttrType::Nexthop
                    | AttrType::LocalPref
                    | AttrType::AtomicAggregate
            );
            if well_known
                && (flags.contains(AttrFlags::OPTIONAL)
                    || !flags.contains(AttrFlags::TRANSITIVE))
            {
                return Err(UpdateMessageError::AttributeFlagsError(
                    attr_type_raw,
                )
                .into());
            }

            match attr_type {
                AttrType::Origin => {
                    if value.len() != 1 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    let value = value.try_get_u8()?;
                    origin =
                        Some(Origin::from_u8(value).ok_or(
                            UpdateMessageError::InvalidOriginAttribute(value),
                        )?);
                }
                AttrType::AsPath => {
                    as_path =
                        Some(AsPath::decode(&mut value, cxt.four_octet_asns)?);
                }
                AttrType::Nexthop => {
                    if value.len() != 4 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    let addr = value.try_get_ipv4()?;
                    if addr.is_unspecified() || addr.is_multicast() {
                        return Err(
                            UpdateMessageError::InvalidNexthopAttribute.into()
                        );
                    }
                    nexthop = Some(addr);
                }
                AttrType::Med => {
                    if value.len() != 4 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    med = Some(value.try_get_u32()?);
                }
                AttrType::LocalPref => {
                    if value.len() != 4 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    local_pref = Some(value.try_get_u32()?);
                }
                AttrType::AtomicAggregate => {
                    atomic_aggregate = true;
                }
                AttrType::Aggregator => {
                    let asn = match cxt.four_octet_asns {
                        true => value.try_get_u32()?,
                        false => value.try_get_u16()? as u32,
                    };
                    let addr = value.try_get_ipv4()?;
                    aggregator = Some(Aggregator { asn, addr });
                }
                AttrType::Communities => {
                    if value.len() % 4 != 0 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    let mut list = BTreeSet::new();
                    while value.remaining() >= 4 {
                        list.insert(value.try_get_u32()?);
                    }
                    comm = Some(list);
                }
                AttrType::OriginatorId => {
                    if value.len() != 4 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    originator_id = Some(value.try_get_ipv4()?);
                }
                AttrType::ClusterList => {
                    if value.len() % 4 != 0 {
                        return Err(UpdateMessageError::AttributeLengthError(
                            attr_type_raw,
                        )
                        .into());
                    }
                    let mut list = vec![];
                    while value.remaining() >= 4 {
                        list.push(value.try_get_ipv4()?);
                    }
                    cluster_list = Some(list);
                }
                AttrType::MpReachNlri => {
                    *mp_reach = Some(MpReachNlri::decode(&mut value)?);
                }
                AttrType::MpUnreachNlri => {
                    *mp_unreach = Some(MpUnreachNlri::decode(&mut value)?);
                }
                AttrType::As4Path | AttrType::As4Aggregator => {
                    // Only relevant when 4-octet ASNs were not negotiated;
                    // preserved as unknown attributes.
                    unknown.push(UnknownAttr {
                        attr_type: attr_type_raw,
                        flags,
                        value,
                    });
                }
            }
        }

        // Check for missing mandatory attributes. NEXT_HOP is mandatory
        // only when the message carries IPv4 NLRIs, which the caller
        // checks. A message carrying only withdrawals has no mandatory
        // attributes at all.
        let (origin, as_path) = match (origin, as_path) {
            (Some(origin), Some(as_path)) => (origin, as_path),
            (None, None) => return Ok(None),
            (None, _) => {
                return Err(UpdateMessageError::MissingWellKnownAttribute(
                    AttrType::Origin as u8,
                )
                .into());
            }
            (_, None) => {
                return Err(UpdateMessageError::MissingWellKnownAttribute(
                    AttrType::AsPath as u8,
                )
                .into());
            }
        };

        Ok(Some(Attrs {
            base: BaseAttrs {
                origin,
                as_path,
                nexthop,
                med,
                local_pref,
                atomic_aggregate,
                aggregator,
                originator_id,
                cluster_list,
            },
            comm,
            unknown,
        }))
    }

    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        cxt: &EncodeCxt,
        mp_reach: &Option<MpReachNlri>,
        mp_unreach: &Option<MpUnreachNlri>,
    ) {
        // ORIGIN.
        attr_encode(buf, AttrFlags::TRANSITIVE, AttrType::Origin, |buf| {
            buf.put_u8(self.base.origin as u8);
        });

        // AS_PATH.
        attr_encode(buf, AttrFlags::TRANSITIVE, AttrType::AsPath, |buf| {
            self.base.as_path.encode(buf, cxt.four_octet_asns);
        });

        // NEXT_HOP.
        if let Some(nexthop) = &self.base.nexthop {
            attr_encode(buf, AttrFlags::TRANSITIVE, AttrType::Nexthop, |buf| {
                buf.put_ipv4(nexthop);
            });
        }

        // MULTI_EXIT_DISC.
        if let Some(med) = self.base.med {
            attr_encode(buf, AttrFlags::OPTIONAL, AttrType::Med, |buf| {
                buf.put_u32(med);
            });
        }

        // LOCAL_PREF.
        if let Some(local_pref) = self.base.local_pref {
            attr_encode(
                buf,
                AttrFlags::TRANSITIVE,
                AttrType::LocalPref,
                |buf| {
                    buf.put_u32(local_pref);
                },
            );
        }

        // ATOMIC_AGGREGATE.
        if self.base.atomic_aggregate {
            attr_encode(
                buf,
                AttrFlags::TRANSITIVE,
                AttrType::AtomicAggregate,
                |_buf| {},
            );
        }

        // AGGREGATOR.
        if let Some(aggregator) = &self.base.aggregator {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Aggregator,
                |buf| {
                    match cxt.four_octet_asns {
                        true => buf.put_u32(aggregator.asn),
                        false => buf.put_u16(aggregator.asn as u16),
                    }
                    buf.put_ipv4(&aggregator.addr);
                },
            );
        }

        // COMMUNITIES.
        if let Some(comm) = &self.comm {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Communities,
                |buf| {
                    for community in comm {
                        buf.put_u32(*community);
                    }
                },
            );
        }

        // ORIGINATOR_ID.
        if let Some(originator_id) = &self.base.originator_id {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL,
                AttrType::OriginatorId,
                |buf| {
                    buf.put_ipv4(originator_id);
                },
            );
        }

        // CLUSTER_LIST.
        if let Some(cluster_list) = &self.base.cluster_list {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL,
                AttrType::ClusterList,
                |buf| {
                    for cluster_id in cluster_list {
                        buf.put_ipv4(cluster_id);
                    }
                },
            );
        }

        // MP_REACH_NLRI.
        if let Some(mp_reach) = mp_reach {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL,
                AttrType::MpReachNlri,
                |buf| {
                    mp_reach.encode(buf);
                },
            );
        }

        // MP_UNREACH_NLRI.
        if let Some(mp_unreach) = mp_unreach {
            attr_encode(
                buf,
                AttrFlags::OPTIONAL,
                AttrType::MpUnreachNlri,
                |buf| {
                    mp_unreach.encode(buf);
                },
            );
        }

        // Unknown transitive attributes, with the partial bit set.
        for attr in &self.unknown {
            let flags = attr.flags | AttrFlags::PARTIAL;
            let flags = flags - AttrFlags::EXT_LENGTH;
            attr_encode_raw(buf, flags, attr.attr_type, &attr.value);
        }
    }
}

impl Default for BaseAttrs {
    fn default() -> BaseAttrs {
        BaseAttrs {
            origin: Origin::Igp,
            as_path: Default::default(),
            nexthop: None,
            med: None,
            local_pref: None,
            atomic_aggregate: false,
            aggregator: None,
            originator_id: None,
            cluster_list: None,
        }
    }
}

// ===== impl AsPath =====

impl AsPath {
    fn decode(buf: &mut Bytes, four_octet: bool) -> DecodeResult<Self> {
        let mut segments = VecDeque::new();
        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                return Err(UpdateMessageError::MalformedAsPath.into());
            }
            let seg_type = buf.try_get_u8()?;
            let seg_type = match seg_type {
                1 => AsSegmentType::Set,
                2 => AsSegmentType::Sequence,
                _ => return Err(UpdateMessageError::MalformedAsPath.into()),
            };
            let member_count = buf.try_get_u8()?;
            let member_size = if four_octet { 4 } else { 2 };
            if buf.remaining() < member_count as usize * member_size {
                return Err(UpdateMessageError::MalformedAsPath.into());
            }
            let mut members = VecDeque::new();
            for _ in 0..member_count {
                let member = match four_octet {
                    true => buf.try_get_u32()?,
                    false => buf.try_get_u16()? as u32,
                };
                members.push_back(member);
            }
            segments.push_back(AsPathSegment { seg_type, members });
        }

        Ok(AsPath { segments })
    }

    fn encode(&self, buf: &mut BytesMut, four_octet: bool) {
        for segment in &self.segments {
            buf.put_u8(segment.seg_type as u8);
            buf.put_u8(segment.members.len() as u8);
            for member in &segment.members {
                match four_octet {
                    true => buf.put_u32(*member),
                    false => buf.put_u16(*member as u16),
                }
            }
        }
    }

    // AS path length used by the decision process: an AS_SET counts as a
    // single hop.
    pub fn path_length(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsSegmentType::Sequence => segment.members.len(),
                AsSegmentType::Set => 1,
            })
            .sum()
    }

    // First (most recent) ASN in the path.
    pub fn first(&self) -> Option<u32> {
        self.segments
            .front()
            .and_then(|segment| segment.members.front())
            .copied()
    }

    pub fn contains(&self, asn: u32) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.members.contains(&asn))
    }

    // Prepends the given ASN, used when advertising to an eBGP peer.
    pub fn prepend(&mut self, asn: u32) {
        match self.segments.front_mut() {
            Some(segment)
                if segment.seg_type == AsSegmentType::Sequence
                    && segment.members.len() < 255 =>
            {
                segment.members.push_front(asn);
            }
            _ => {
                self.segments.push_front(AsPathSegment {
                    seg_type: AsSegmentType::Sequence,
                    members: [asn].into(),
                });
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| segment.members.iter().copied())
    }
}

impl From<&[u32]> for AsPath {
    fn from(asns: &[u32]) -> AsPath {
        let mut as_path = AsPath::default();
        if !asns.is_empty() {
            as_path.segments.push_back(AsPathSegment {
                seg_type: AsSegmentType::Sequence,
                members: asns.iter().copied().collect(),
            });
        }
        as_path
    }
}

// ===== NLRI encoding helpers =====

pub(crate) fn decode_ipv4_prefix(
    buf: &mut Bytes,
) -> DecodeResult<Ipv4Network> {
    let plen = buf.try_get_u8()?;
    if plen > 32 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let plen_octets = plen.div_ceil(8) as usize;
    let mut octets = [0u8; 4];
    if plen_octets > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    buf.try_copy_to_slice(&mut octets[..plen_octets])?;
    Ipv4Network::new(Ipv4Addr::from(octets), plen)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

pub(crate) fn encode_ipv4_prefix(buf: &mut BytesMut, prefix: &Ipv4Network) {
    let plen = prefix.prefix();
    buf.put_u8(plen);
    let plen_octets = plen.div_ceil(8) as usize;
    buf.put_slice(&prefix.ip().octets()[..plen_octets]);
}

pub(crate) fn decode_ipv6_prefix(
    buf: &mut Bytes,
) -> DecodeResult<Ipv6Network> {
    let plen = buf.try_get_u8()?;
    if plen > 128 {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    let plen_octets = plen.div_ceil(8) as usize;
    let mut octets = [0u8; 16];
    if plen_octets > buf.remaining() {
        return Err(UpdateMessageError::InvalidNetworkField.into());
    }
    buf.try_copy_to_slice(&mut octets[..plen_octets])?;
    Ipv6Network::new(Ipv6Addr::from(octets), plen)
        .map_err(|_| UpdateMessageError::InvalidNetworkField.into())
}

pub(crate) fn encode_ipv6_prefix(buf: &mut BytesMut, prefix: &Ipv6Network) {
    let plen = prefix.prefix();
    buf.put_u8(plen);
    let plen_octets = plen.div_ceil(8) as usize;
    buf.put_slice(&prefix.ip().octets()[..plen_octets]);
}

// ===== helper functions =====

fn attr_encode<F>(
    buf: &mut BytesMut,
    flags: AttrFlags,
    attr_type: AttrType,
    encode_value: F,
) where
    F: FnOnce(&mut BytesMut),
{
    // The attribute value is encoded first so the extended-length flag
    // can be set only when actually needed.
    let mut value = BytesMut::new();
    encode_value(&mut value);

    let mut flags = flags;
    if value.len() > 255 {
        flags.insert(AttrFlags::EXT_LENGTH);
    }
    buf.put_u8(flags.bits());
    buf.put_u8(attr_type as u8);
    match flags.contains(AttrFlags::EXT_LENGTH) {
        true => buf.put_u16(value.len() as u16),
        false => buf.put_u8(value.len() as u8),
    }
    buf.put_slice(&value);
}

// Encodes an MP_UNREACH_NLRI attribute on its own, used by UPDATE
// messages that carry only withdrawals.
pub(crate) fn encode_mp_unreach(buf: &mut BytesMut, mp_unreach: &MpUnreachNlri) {
    attr_encode(buf, AttrFlags::OPTIONAL, AttrType::MpUnreachNlri, |buf| {
        mp_unreach.encode(buf);
    });
}

fn attr_encode_raw(
    buf: &mut BytesMut,
    flags: AttrFlags,
    attr_type: u8,
    value: &Bytes,
) {
    buf.put_u8(flags.bits());
    buf.put_u8(attr_type);
    buf.put_u8(value.len() as u8);
    buf.put_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_path_length_and_prepend() {
        let mut as_path = AsPath::from([65002u32, 65099].as_slice());
        assert_eq!(as_path.path_length(), 2);
        assert_eq!(as_path.first(), Some(65002));

        as_path.prepend(65001);
        assert_eq!(as_path.path_length(), 3);
        assert_eq!(as_path.first(), Some(65001));
        assert!(as_path.contains(65099));
        assert!(!as_path.contains(65000));

        // An AS_SET counts as a single hop.
        let mut as_path = AsPath::default();
        as_path.segments.push_back(AsPathSegment {
            seg_type: AsSegmentType::Set,
            members: [65010u32, 65011].into(),
        });
        assert_eq!(as_path.path_length(), 1);
    }
}
