//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::net::Ipv4Addr;
use std::time::Instant;

use arbor_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult};

// LSA age constants.
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_REFRESH_TIME: u16 = 1800;

// LSA sequence number constants.
pub const LSA_INIT_SEQ_NO: u32 = 0x8000_0001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fff_ffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x8000_0000;

// OSPFv2 LSA type.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-5
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaType {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
}

// LSA database key.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

//
// LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// OSPFv2 LSA.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    pub hdr: LsaHdr,
    pub body: LsaBody,
    // Raw bytes of the full LSA, kept for retransmission and checksum
    // stability.
    pub raw: Bytes,
    // Time the LSA was installed or received, used to derive the effective
    // age without rewriting the raw data every second.
    #[serde(skip)]
    pub base_time: Option<Instant>,
}

// LSA body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
}

//
// Router-LSA.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: u8,
    pub links: Vec<LsaRouterLink>,
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    TransitNetwork = 2,
    StubNetwork = 3,
    VirtualLink = 4,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

//
// Network-LSA.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: Vec<Ipv4Addr>,
}

//
// Summary-LSA (types 3 and 4).
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

//
// AS-external-LSA.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    // E-bit: type 2 external metric when set.
    pub e_bit: bool,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub route_tag: u32,
}

// The installation time is not part of the LSA identity.
impl PartialEq for Lsa {
    fn eq(&self, other: &Lsa) -> bool {
        self.hdr == other.hdr
            && self.body == other.body
            && self.raw == other.raw
    }
}

impl Eq for Lsa {}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let age = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let lsa_type = buf.try_get_u8()?;
        let Some(lsa_type) = LsaType::from_u8(lsa_type) else {
            return Err(DecodeError::UnknownLsaType(lsa_type));
        };
        let lsa_id = buf.try_get_ipv4()?;
        let adv_rtr = buf.try_get_ipv4()?;
        let seq_no = buf.try_get_u32()?;
        let cksum = buf.try_get_u16()?;
        let length = buf.try_get_u16()?;

        Ok(LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type as u8);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey {
            lsa_type: self.lsa_type,
            adv_rtr: self.adv_rtr,
            lsa_id: self.lsa_id,
        }
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl Lsa =====

impl Lsa {
    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Lsa {
        let hdr = LsaHdr {
            age,
            options,
            lsa_type: body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
            // Initialized by `encode`.
            cksum: 0,
            length: 0,
        };

        let mut lsa = Lsa {
            hdr,
            body,
            raw: Default::default(),
            base_time: Some(Instant::now()),
        };
        lsa.encode();
        lsa
    }

    // Returns the current LSA age.
    pub fn age(&self) -> u16 {
        match self.base_time {
            Some(base_time) => {
                let elapsed = u16::try_from(base_time.elapsed().as_secs())
                    .unwrap_or(u16::MAX);
                std::cmp::min(self.hdr.age.saturating_add(elapsed), LSA_MAX_AGE)
            }
            None => self.hdr.age,
        }
    }

    // Updates the LSA age.
    pub(crate) fn set_age(&mut self, age: u16) {
        self.hdr.age = age;

        // Update raw data.
        let mut raw = BytesMut::from(self.raw.as_ref());
        raw[0..2].copy_from_slice(&age.to_be_bytes());
        self.raw = raw.freeze();

        self.base_time = Some(Instant::now());
    }

    // Sets the LSA age to MaxAge, flushing it from the routing domain once
    // flooded.
    pub(crate) fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    pub fn is_maxage(&self) -> bool {
        self.age() == LSA_MAX_AGE
    }

    // Decodes a single LSA from a bytes buffer.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let buf_orig = buf.clone();
        if buf.remaining() < LsaHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength(buf.len() as u16));
        }
        let hdr = LsaHdr::decode(buf)?;
        let lsa_len = hdr.length;
        if lsa_len < LsaHdr::LENGTH {
            return Err(DecodeError::InvalidLsaLength(lsa_len));
        }
        let lsa_body_len = lsa_len - LsaHdr::LENGTH;

        // Decode LSA body.
        if buf.remaining() < lsa_body_len as usize {
            return Err(DecodeError::InvalidLsaLength(lsa_len));
        }
        let mut buf_lsa = buf.copy_to_bytes(lsa_body_len as usize);
        let body = LsaBody::decode(hdr.lsa_type, &mut buf_lsa)?;

        Ok(Lsa {
            hdr,
            body,
            raw: buf_orig.slice(0..lsa_len as usize),
            base_time: Some(Instant::now()),
        })
    }

    // Encodes LSA into its raw representation, computing the length and
    // Fletcher checksum fields.
    pub(crate) fn encode(&mut self) {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            // Rewrite LSA length.
            let lsa_len = buf.len() as u16;
            buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
            self.hdr.length = lsa_len;

            // Compute LSA checksum.
            let cksum = Self::checksum(&buf[2..(lsa_len as usize)]);
            buf[16..18].copy_from_slice(&cksum);
            self.hdr.cksum = u16::from_be_bytes(cksum);

            // Store LSA raw data.
            self.raw = buf.clone().freeze();
        });
    }

    // Validates a received LSA before installation.
    pub(crate) fn validate(&self) -> DecodeResult<()> {
        if self.hdr.age > LSA_MAX_AGE {
            return Err(DecodeError::InvalidLsaAge(self.hdr.age));
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(DecodeError::InvalidLsaSeqNo(self.hdr.seq_no));
        }
        if !self.is_checksum_valid() {
            return Err(DecodeError::InvalidLsaChecksum);
        }

        Ok(())
    }

    // ISO 8473 Fletcher checksum with checkbytes, computed over the LSA
    // contents excluding the age field.
    fn checksum(data: &[u8]) -> [u8; 2] {
        let checksum = fletcher::calc_fletcher16(data);
        let mut checkbyte0 = (checksum & 0x00FF) as i32;
        let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

        // Adjust checksum value using scaling factor.
        let sop = data.len() as u16 - 15;
        let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
        if x <= 0 {
            x += 255;
        }
        checkbyte1 = 510 - checkbyte0 - x;
        if checkbyte1 > 255 {
            checkbyte1 -= 255;
        }
        checkbyte0 = x;
        [checkbyte0 as u8, checkbyte1 as u8]
    }

    // Checks if the checksum is valid.
    pub(crate) fn is_checksum_valid(&self) -> bool {
        // Skip the Age field.
        fletcher::calc_fletcher16(&self.raw[2..(self.hdr.length as usize)])
            == 0
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaType::Router,
            LsaBody::Network(_) => LsaType::Network,
            LsaBody::SummaryNetwork(_) => LsaType::SummaryNetwork,
            LsaBody::SummaryRouter(_) => LsaType::SummaryRouter,
            LsaBody::AsExternal(_) => LsaType::AsExternal,
        }
    }

    fn decode(lsa_type: LsaType, buf: &mut Bytes) -> DecodeResult<Self> {
        let lsa = match lsa_type {
            LsaType::Router => LsaBody::Router(LsaRouter::decode(buf)?),
            LsaType::Network => LsaBody::Network(LsaNetwork::decode(buf)?),
            LsaType::SummaryNetwork => {
                LsaBody::SummaryNetwork(LsaSummary::decode(buf)?)
            }
            LsaType::SummaryRouter => {
                LsaBody::SummaryRouter(LsaSummary::decode(buf)?)
            }
            LsaType::AsExternal => {
                LsaBody::AsExternal(LsaAsExternal::decode(buf)?)
            }
        };

        Ok(lsa)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(lsa) => lsa.encode(buf),
            LsaBody::Network(lsa) => lsa.encode(buf),
            LsaBody::SummaryNetwork(lsa) => lsa.encode(buf),
            LsaBody::SummaryRouter(lsa) => lsa.encode(buf),
            LsaBody::AsExternal(lsa) => lsa.encode(buf),
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let _reserved = buf.try_get_u8()?;
        let link_count = buf.try_get_u16()?;
        let mut links = vec![];
        for _ in 0..link_count {
            let link_id = buf.try_get_ipv4()?;
            let link_data = buf.try_get_ipv4()?;
            let link_type = buf.try_get_u8()?;
            let Some(link_type) = LsaRouterLinkType::from_u8(link_type) else {
                return Err(DecodeError::UnknownRouterLinkType(link_type));
            };
            // TOS metrics are obsolete and skipped.
            let tos_count = buf.try_get_u8()?;
            let metric = buf.try_get_u16()?;
            buf.advance(std::cmp::min(
                tos_count as usize * 4,
                buf.remaining(),
            ));
            links.push(LsaRouterLink {
                link_type,
                link_id,
                link_data,
                metric,
            });
        }

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            buf.put_ipv4(&link.link_id);
            buf.put_ipv4(&link.link_data);
            buf.put_u8(link.link_type as u8);
            buf.put_u8(0);
            buf.put_u16(link.metric);
        }
    }
}

// ===== impl LsaNetwork =====

impl LsaNetwork {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let mut attached_rtrs = vec![];
        while buf.remaining() >= 4 {
            attached_rtrs.push(buf.try_get_ipv4()?);
        }

        Ok(LsaNetwork {
            mask,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaSummary =====

impl LsaSummary {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let metric = buf.try_get_u32()? & 0x00ff_ffff;

        Ok(LsaSummary { mask, metric })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u32(self.metric & 0x00ff_ffff);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.try_get_ipv4()?;
        let metric = buf.try_get_u32()?;
        let e_bit = metric & 0x8000_0000 != 0;
        let metric = metric & 0x00ff_ffff;
        let fwd_addr = buf.try_get_opt_ipv4()?;
        let route_tag = buf.try_get_u32()?;

        Ok(LsaAsExternal {
            mask,
            e_bit,
            metric,
            fwd_addr,
            route_tag,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        let mut metric = self.metric & 0x00ff_ffff;
        if self.e_bit {
            metric |= 0x8000_0000;
        }
        buf.put_u32(metric);
        buf.put_ipv4(&self.fwd_addr.unwrap_or(Ipv4Addr::UNSPECIFIED));
        buf.put_u32(self.route_tag);
    }
}

// ===== global functions =====

// Compares which of two LSA instances is more recent, implementing the
// freshness rules of RFC 2328, Section 13.1. Every install path must go
// through this total order.
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(age: u16, seq_no: u32, cksum: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaType::Router,
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: LsaHdr::LENGTH,
        }
    }

    #[test]
    fn freshness_ordering() {
        // Higher sequence number wins, even across the signed wrap point.
        let a = hdr(1, LSA_INIT_SEQ_NO + 1, 0x1111);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0x2222);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        let c = hdr(1, LSA_MAX_SEQ_NO, 0);
        assert_eq!(lsa_compare(&b, &c), Ordering::Less);

        // Same sequence number: higher checksum wins.
        let a = hdr(1, LSA_INIT_SEQ_NO, 0x2222);
        let b = hdr(1, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // Same sequence number and checksum: MaxAge wins.
        let a = hdr(LSA_MAX_AGE, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);

        // Ages within MaxAgeDiff are considered the same instance.
        let a = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(500, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);

        // Otherwise the lower age is more recent.
        let a = hdr(10, LSA_INIT_SEQ_NO, 0x1111);
        let b = hdr(1500, LSA_INIT_SEQ_NO, 0x1111);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn lsa_checksum_roundtrip() {
        let lsa = Lsa::new(
            1,
            Options::E,
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(1, 1, 1, 1),
            LSA_INIT_SEQ_NO,
            LsaBody::Router(LsaRouter {
                flags: 0,
                links: vec![LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: Ipv4Addr::new(10, 0, 0, 0),
                    link_data: Ipv4Addr::new(255, 255, 255, 252),
                    metric: 10,
                }],
            }),
        );
        assert_ne!(lsa.hdr.cksum, 0);
        assert!(lsa.is_checksum_valid());

        // Decode the raw representation back into an equal LSA.
        let mut buf = lsa.raw.clone();
        let decoded = Lsa::decode(&mut buf).unwrap();
        assert_eq!(lsa.hdr, decoded.hdr);
        assert_eq!(lsa.body, decoded.body);
        assert_eq!(lsa.raw, decoded.raw);
    }
}
