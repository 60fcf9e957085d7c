//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Instant;

use arbor_utils::bytes::TLS_BUF;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv4Network;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{
    IDRP_DISCRIMINATOR, NLPID_IPV4, PduType, SYSTEM_ID_LEN, TlvType, VERSION,
    VERSION_PROTO_EXT,
};
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::tlv::{
    AreaAddressesTlv, ExtIpv4Reach, ExtIpv4ReachTlv, ExtIsReach,
    ExtIsReachTlv, Ipv4AddressesTlv, Ipv4Reach, Ipv4ReachTlv, IsReach,
    IsReachTlv, LspEntriesTlv, LspEntry, NeighborsTlv, P2pAdjStateTlv,
    PaddingTlv, ProtocolsSupportedTlv, UnknownTlv,
};
use crate::packet::{AreaAddr, LanId, LevelNumber, LevelType, LspId, SystemId};

// Maximum PDU size, bounded by the common Ethernet MTU.
pub const MAX_PDU_SIZE: usize = 1492;

// LSP remaining lifetime constants, in seconds.
pub const LSP_MAX_LIFETIME: u16 = 1200;
pub const LSP_REFRESH_TIME: u16 = 900;
pub const LSP_ZERO_AGE_LIFETIME: u16 = 60;

// Common header length.
pub const HDR_LEN: u8 = 8;

bitflags! {
    // LSP flags field (the IS-type bits are modeled separately).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LspFlags: u8 {
        const P = 0x80;
        const ATT = 0x08;
        const OL = 0x04;
        const IS_TYPE2 = 0x02;
        const IS_TYPE1 = 0x01;
    }
}

//
// IS-IS common PDU header.
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hdr {
    pub pdu_type: PduType,
}

// IS-IS PDU.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Pdu {
    Hello(Hello),
    Lsp(Lsp),
    Snp(Snp),
}

//
// IS-IS Hello PDU (LAN and point-to-point variants).
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: Hdr,
    pub circuit_type: LevelType,
    pub source: SystemId,
    pub holdtime: u16,
    pub variant: HelloVariant,
    pub tlvs: HelloTlvs,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum HelloVariant {
    Lan { priority: u8, lan_id: LanId },
    P2P { local_circuit_id: u8 },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HelloTlvs {
    pub protocols_supported: Option<ProtocolsSupportedTlv>,
    pub area_addrs: AreaAddressesTlv,
    pub neighbors: NeighborsTlv,
    pub ipv4_addrs: Ipv4AddressesTlv,
    pub p2p_adj_state: Option<P2pAdjStateTlv>,
    pub unknown: Vec<UnknownTlv>,
}

//
// IS-IS Link State PDU.
//
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Lsp {
    pub hdr: Hdr,
    pub rem_lifetime: u16,
    pub lsp_id: LspId,
    pub seqno: u32,
    pub cksum: u16,
    pub flags: LspFlags,
    pub tlvs: LspTlvs,
    // Raw bytes of the full PDU, kept so relayed LSPs preserve unknown
    // TLVs and their checksum.
    pub raw: Bytes,
    // Time the LSP was installed or received, used to derive the effective
    // remaining lifetime.
    #[serde(skip)]
    pub base_time: Option<Instant>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LspTlvs {
    pub protocols_supported: Option<ProtocolsSupportedTlv>,
    pub area_addrs: AreaAddressesTlv,
    pub ipv4_addrs: Ipv4AddressesTlv,
    pub is_reach: IsReachTlv,
    pub ext_is_reach: ExtIsReachTlv,
    pub ipv4_internal_reach: Ipv4ReachTlv,
    pub ipv4_external_reach: Ipv4ReachTlv,
    pub ext_ipv4_reach: ExtIpv4ReachTlv,
    pub unknown: Vec<UnknownTlv>,
}

//
// IS-IS Sequence Numbers PDU (CSNP and PSNP).
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Snp {
    pub hdr: Hdr,
    pub source: LanId,
    // Present on CSNPs only.
    pub summary: Option<(LspId, LspId)>,
    pub tlvs: SnpTlvs,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SnpTlvs {
    pub lsp_entries: LspEntriesTlv,
    pub unknown: Vec<UnknownTlv>,
}

// ===== impl Hdr =====

impl Hdr {
    fn fixed_header_length(pdu_type: PduType) -> u8 {
        HDR_LEN
            + match pdu_type {
                PduType::HelloLanL1 | PduType::HelloLanL2 => 19,
                PduType::HelloP2P => 12,
                PduType::LspL1 | PduType::LspL2 => 19,
                PduType::CsnpL1 | PduType::CsnpL2 => 25,
                PduType::PsnpL1 | PduType::PsnpL2 => 9,
            }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let idrp = buf.try_get_u8()?;
        if idrp != IDRP_DISCRIMINATOR {
            return Err(DecodeError::InvalidIrpdDiscriminator(idrp));
        }
        let len_indicator = buf.try_get_u8()?;
        let version_proto_ext = buf.try_get_u8()?;
        if version_proto_ext != VERSION_PROTO_EXT {
            return Err(DecodeError::InvalidVersion(version_proto_ext));
        }
        let id_len = buf.try_get_u8()?;
        if id_len != 0 && id_len != SYSTEM_ID_LEN {
            return Err(DecodeError::InvalidIdLength(id_len));
        }
        let pdu_type = buf.try_get_u8()?;
        let Some(pdu_type) = PduType::from_u8(pdu_type) else {
            return Err(DecodeError::UnknownPduType(pdu_type));
        };
        if len_indicator != Self::fixed_header_length(pdu_type) {
            return Err(DecodeError::InvalidPduLength(len_indicator as u16));
        }
        let version = buf.try_get_u8()?;
        if version != VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let _reserved = buf.try_get_u8()?;
        let _max_area_addrs = buf.try_get_u8()?;

        Ok(Hdr { pdu_type })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(IDRP_DISCRIMINATOR);
        buf.put_u8(Self::fixed_header_length(self.pdu_type));
        buf.put_u8(VERSION_PROTO_EXT);
        buf.put_u8(0);
        buf.put_u8(self.pdu_type as u8);
        buf.put_u8(VERSION);
        buf.put_u8(0);
        buf.put_u8(0);
    }
}

// ===== impl Pdu =====

impl Pdu {
    // Decodes an IS-IS PDU from a bytes buffer.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        let hdr = Hdr::decode(&mut buf)?;

        match hdr.pdu_type {
            PduType::HelloLanL1 | PduType::HelloLanL2 | PduType::HelloP2P => {
                Hello::decode(hdr, &mut buf).map(Pdu::Hello)
            }
            PduType::LspL1 | PduType::LspL2 => {
                Lsp::decode(hdr, data, &mut buf).map(Pdu::Lsp)
            }
            PduType::CsnpL1
            | PduType::CsnpL2
            | PduType::PsnpL1
            | PduType::PsnpL2 => Snp::decode(hdr, &mut buf).map(Pdu::Snp),
        }
    }

    // Encodes an IS-IS PDU into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        match self {
            Pdu::Hello(hello) => hello.encode(),
            Pdu::Lsp(lsp) => lsp.raw.clone(),
            Pdu::Snp(snp) => snp.encode(),
        }
    }

    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::Hello(hello) => hello.hdr.pdu_type,
            Pdu::Lsp(lsp) => lsp.hdr.pdu_type,
            Pdu::Snp(snp) => snp.hdr.pdu_type,
        }
    }
}

// ===== impl Hello =====

impl Hello {
    pub fn new(
        pdu_type: PduType,
        circuit_type: LevelType,
        source: SystemId,
        holdtime: u16,
        variant: HelloVariant,
        tlvs: HelloTlvs,
    ) -> Hello {
        Hello {
            hdr: Hdr { pdu_type },
            circuit_type,
            source,
            holdtime,
            variant,
            tlvs,
        }
    }

    fn decode(hdr: Hdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let total_len = buf.remaining() + HDR_LEN as usize;
        let circuit_type = match buf.try_get_u8()? & 0x03 {
            1 => LevelType::L1,
            2 => LevelType::L2,
            3 => LevelType::All,
            circuit_type => {
                return Err(DecodeError::InvalidPduLength(circuit_type as u16));
            }
        };
        let source = SystemId::decode(buf)?;
        let holdtime = buf.try_get_u16()?;
        let pdu_len = buf.try_get_u16()?;
        if pdu_len as usize != total_len {
            return Err(DecodeError::InvalidPduLength(pdu_len));
        }

        let variant = match hdr.pdu_type {
            PduType::HelloLanL1 | PduType::HelloLanL2 => {
                let priority = buf.try_get_u8()? & 0x7f;
                let lan_id = LanId::decode(buf)?;
                HelloVariant::Lan { priority, lan_id }
            }
            PduType::HelloP2P => {
                let local_circuit_id = buf.try_get_u8()?;
                HelloVariant::P2P { local_circuit_id }
            }
            _ => unreachable!(),
        };

        // Decode TLVs.
        let mut tlvs = HelloTlvs::default();
        while buf.remaining() >= 2 {
            let tlv_type = buf.try_get_u8()?;
            let tlv_len = buf.try_get_u8()?;
            if tlv_len as usize > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len));
            }
            match TlvType::from_u8(tlv_type) {
                Some(TlvType::AreaAddresses) => {
                    let tlv = AreaAddressesTlv::decode(tlv_len, buf)?;
                    tlvs.area_addrs.list.extend(tlv.list);
                }
                Some(TlvType::Neighbors) => {
                    let tlv = NeighborsTlv::decode(tlv_len, buf)?;
                    tlvs.neighbors.list.extend(tlv.list);
                }
                Some(TlvType::Padding) => {
                    let _ = PaddingTlv::decode(tlv_len, buf)?;
                }
                Some(TlvType::ProtocolsSupported) => {
                    let tlv = ProtocolsSupportedTlv::decode(tlv_len, buf)?;
                    tlvs.protocols_supported = Some(tlv);
                }
                Some(TlvType::Ipv4Addresses) => {
                    let tlv = Ipv4AddressesTlv::decode(tlv_len, buf)?;
                    tlvs.ipv4_addrs.list.extend(tlv.list);
                }
                Some(TlvType::P2pAdjState) => {
                    let tlv = P2pAdjStateTlv::decode(tlv_len, buf)?;
                    tlvs.p2p_adj_state = Some(tlv);
                }
                _ => {
                    let tlv = UnknownTlv::decode(tlv_type, tlv_len, buf)?;
                    tlvs.unknown.push(tlv);
                }
            }
        }

        Ok(Hello {
            hdr,
            circuit_type,
            source,
            holdtime,
            variant,
            tlvs,
        })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            let circuit_type = match self.circuit_type {
                LevelType::L1 => 1,
                LevelType::L2 => 2,
                LevelType::All => 3,
            };
            buf.put_u8(circuit_type);
            self.source.encode(&mut buf);
            buf.put_u16(self.holdtime);
            // The PDU length will be rewritten later.
            let len_pos = buf.len();
            buf.put_u16(0);
            match self.variant {
                HelloVariant::Lan { priority, lan_id } => {
                    buf.put_u8(priority & 0x7f);
                    lan_id.encode(&mut buf);
                }
                HelloVariant::P2P { local_circuit_id } => {
                    buf.put_u8(local_circuit_id);
                }
            }

            // Encode TLVs.
            if let Some(tlv) = &self.tlvs.protocols_supported {
                tlv.encode(&mut buf);
            }
            if !self.tlvs.area_addrs.list.is_empty() {
                self.tlvs.area_addrs.encode(&mut buf);
            }
            if !self.tlvs.neighbors.list.is_empty() {
                self.tlvs.neighbors.encode(&mut buf);
            }
            if !self.tlvs.ipv4_addrs.list.is_empty() {
                self.tlvs.ipv4_addrs.encode(&mut buf);
            }
            if let Some(tlv) = &self.tlvs.p2p_adj_state {
                tlv.encode(&mut buf);
            }
            for tlv in &self.tlvs.unknown {
                tlv.encode(&mut buf);
            }

            // Rewrite the PDU length.
            let pdu_len = buf.len() as u16;
            buf[len_pos..len_pos + 2].copy_from_slice(&pdu_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Level this hello applies to, derived from the PDU type.
    pub fn level(&self) -> LevelType {
        match self.hdr.pdu_type {
            PduType::HelloLanL1 => LevelType::L1,
            PduType::HelloLanL2 => LevelType::L2,
            PduType::HelloP2P => self.circuit_type,
            _ => unreachable!(),
        }
    }
}

// ===== impl Lsp =====

impl Lsp {
    // Offsets within the raw PDU.
    const REM_LIFETIME_RANGE: std::ops::Range<usize> = 10..12;
    const CKSUM_RANGE: std::ops::Range<usize> = 24..26;
    // Offset of the checksummed region (LSP ID onwards).
    const CKSUM_REGION_START: usize = 12;

    pub fn new(
        level: LevelNumber,
        rem_lifetime: u16,
        lsp_id: LspId,
        seqno: u32,
        flags: LspFlags,
        tlvs: LspTlvs,
    ) -> Lsp {
        let pdu_type = match level {
            LevelNumber::L1 => PduType::LspL1,
            LevelNumber::L2 => PduType::LspL2,
        };
        let mut lsp = Lsp {
            hdr: Hdr { pdu_type },
            rem_lifetime,
            lsp_id,
            seqno,
            cksum: 0,
            flags,
            tlvs,
            raw: Default::default(),
            base_time: Some(Instant::now()),
        };
        lsp.encode();
        lsp
    }

    fn decode(hdr: Hdr, data: &[u8], buf: &mut Bytes) -> DecodeResult<Self> {
        let pdu_len = buf.try_get_u16()?;
        if pdu_len as usize != data.len() {
            return Err(DecodeError::InvalidPduLength(pdu_len));
        }
        let rem_lifetime = buf.try_get_u16()?;
        let lsp_id = LspId::decode(buf)?;
        let seqno = buf.try_get_u32()?;
        let cksum = buf.try_get_u16()?;
        let flags = LspFlags::from_bits_truncate(buf.try_get_u8()?);

        // Verify the LSP checksum. The remaining lifetime lies outside the
        // checksummed region, so relayed LSPs stay valid as they age.
        if cksum != 0 {
            let region = &data[Self::CKSUM_REGION_START..];
            if fletcher::calc_fletcher16(region) != 0 {
                return Err(DecodeError::InvalidLspChecksum);
            }
        }

        // Decode TLVs.
        let mut tlvs = LspTlvs::default();
        while buf.remaining() >= 2 {
            let tlv_type = buf.try_get_u8()?;
            let tlv_len = buf.try_get_u8()?;
            if tlv_len as usize > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len));
            }
            match TlvType::from_u8(tlv_type) {
                Some(TlvType::AreaAddresses) => {
                    let tlv = AreaAddressesTlv::decode(tlv_len, buf)?;
                    tlvs.area_addrs.list.extend(tlv.list);
                }
                Some(TlvType::ProtocolsSupported) => {
                    let tlv = ProtocolsSupportedTlv::decode(tlv_len, buf)?;
                    tlvs.protocols_supported = Some(tlv);
                }
                Some(TlvType::Ipv4Addresses) => {
                    let tlv = Ipv4AddressesTlv::decode(tlv_len, buf)?;
                    tlvs.ipv4_addrs.list.extend(tlv.list);
                }
                Some(TlvType::IsReach) => {
                    let tlv = IsReachTlv::decode(tlv_len, buf)?;
                    tlvs.is_reach.list.extend(tlv.list);
                }
                Some(TlvType::ExtIsReach) => {
                    let tlv = ExtIsReachTlv::decode(tlv_len, buf)?;
                    tlvs.ext_is_reach.list.extend(tlv.list);
                }
                Some(TlvType::Ipv4InternalReach) => {
                    let tlv = Ipv4ReachTlv::decode(tlv_len, buf)?;
                    tlvs.ipv4_internal_reach.list.extend(tlv.list);
                }
                Some(TlvType::Ipv4ExternalReach) => {
                    let tlv = Ipv4ReachTlv::decode(tlv_len, buf)?;
                    tlvs.ipv4_external_reach.list.extend(tlv.list);
                }
                Some(TlvType::ExtIpv4Reach) => {
                    let tlv = ExtIpv4ReachTlv::decode(tlv_len, buf)?;
                    tlvs.ext_ipv4_reach.list.extend(tlv.list);
                }
                _ => {
                    let tlv = UnknownTlv::decode(tlv_type, tlv_len, buf)?;
                    tlvs.unknown.push(tlv);
                }
            }
        }

        Ok(Lsp {
            hdr,
            rem_lifetime,
            lsp_id,
            seqno,
            cksum,
            flags,
            tlvs,
            raw: Bytes::copy_from_slice(data),
            base_time: Some(Instant::now()),
        })
    }

    // Encodes the LSP into its raw representation, computing the PDU
    // length and Fletcher checksum fields.
    pub fn encode(&mut self) {
        let raw = TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            // The PDU length will be rewritten later.
            buf.put_u16(0);
            buf.put_u16(self.rem_lifetime);
            self.lsp_id.encode(&mut buf);
            buf.put_u32(self.seqno);
            // The checksum will be computed later.
            buf.put_u16(0);
            buf.put_u8(self.flags.bits());

            // Encode TLVs.
            if let Some(tlv) = &self.tlvs.protocols_supported {
                tlv.encode(&mut buf);
            }
            if !self.tlvs.area_addrs.list.is_empty() {
                self.tlvs.area_addrs.encode(&mut buf);
            }
            if !self.tlvs.ipv4_addrs.list.is_empty() {
                self.tlvs.ipv4_addrs.encode(&mut buf);
            }
            if !self.tlvs.is_reach.list.is_empty() {
                self.tlvs.is_reach.encode(&mut buf);
            }
            if !self.tlvs.ext_is_reach.list.is_empty() {
                self.tlvs.ext_is_reach.encode(&mut buf);
            }
            if !self.tlvs.ipv4_internal_reach.list.is_empty() {
                self.tlvs
                    .ipv4_internal_reach
                    .encode(&mut buf, TlvType::Ipv4InternalReach);
            }
            if !self.tlvs.ipv4_external_reach.list.is_empty() {
                self.tlvs
                    .ipv4_external_reach
                    .encode(&mut buf, TlvType::Ipv4ExternalReach);
            }
            if !self.tlvs.ext_ipv4_reach.list.is_empty() {
                self.tlvs.ext_ipv4_reach.encode(&mut buf);
            }
            for tlv in &self.tlvs.unknown {
                tlv.encode(&mut buf);
            }

            // Rewrite the PDU length.
            let pdu_len = buf.len() as u16;
            buf[8..10].copy_from_slice(&pdu_len.to_be_bytes());

            // Compute the checksum over the region from the LSP ID to the
            // end of the PDU.
            let cksum = checksum(&buf[Self::CKSUM_REGION_START..], 12);
            buf[Self::CKSUM_RANGE].copy_from_slice(&cksum);
            self.cksum = u16::from_be_bytes(cksum);

            buf.clone().freeze()
        });
        self.raw = raw;
    }

    // Returns the current remaining lifetime, counting down from the value
    // carried in the raw PDU.
    pub fn rem_lifetime(&self) -> u16 {
        match self.base_time {
            Some(base_time) => {
                let elapsed = u16::try_from(base_time.elapsed().as_secs())
                    .unwrap_or(u16::MAX);
                self.rem_lifetime.saturating_sub(elapsed)
            }
            None => self.rem_lifetime,
        }
    }

    // Updates the remaining lifetime.
    pub fn set_rem_lifetime(&mut self, rem_lifetime: u16) {
        self.rem_lifetime = rem_lifetime;

        // Update raw data.
        let mut raw = BytesMut::from(self.raw.as_ref());
        raw[Self::REM_LIFETIME_RANGE]
            .copy_from_slice(&rem_lifetime.to_be_bytes());
        self.raw = raw.freeze();

        self.base_time = Some(Instant::now());
    }

    pub fn level(&self) -> LevelNumber {
        match self.hdr.pdu_type {
            PduType::LspL1 => LevelNumber::L1,
            PduType::LspL2 => LevelNumber::L2,
            _ => unreachable!(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.rem_lifetime() == 0
    }
}

// The installation time and raw framing are not part of the LSP identity.
impl PartialEq for Lsp {
    fn eq(&self, other: &Lsp) -> bool {
        self.hdr == other.hdr
            && self.rem_lifetime == other.rem_lifetime
            && self.lsp_id == other.lsp_id
            && self.seqno == other.seqno
            && self.cksum == other.cksum
            && self.flags == other.flags
            && self.tlvs == other.tlvs
    }
}

impl Eq for Lsp {}

// ===== impl LspTlvs =====

impl LspTlvs {
    pub fn new(
        area_addrs: impl IntoIterator<Item = AreaAddr>,
        ipv4_addrs: impl IntoIterator<Item = Ipv4Addr>,
        is_reach: impl IntoIterator<Item = IsReach>,
        ext_is_reach: impl IntoIterator<Item = ExtIsReach>,
        ipv4_internal_reach: impl IntoIterator<Item = Ipv4Reach>,
        ipv4_external_reach: impl IntoIterator<Item = Ipv4Reach>,
        ext_ipv4_reach: impl IntoIterator<Item = ExtIpv4Reach>,
    ) -> LspTlvs {
        LspTlvs {
            protocols_supported: Some(ProtocolsSupportedTlv {
                list: vec![NLPID_IPV4],
            }),
            area_addrs: AreaAddressesTlv {
                list: area_addrs.into_iter().collect(),
            },
            ipv4_addrs: Ipv4AddressesTlv {
                list: ipv4_addrs.into_iter().collect(),
            },
            is_reach: IsReachTlv {
                list: is_reach.into_iter().collect(),
            },
            ext_is_reach: ExtIsReachTlv {
                list: ext_is_reach.into_iter().collect(),
            },
            ipv4_internal_reach: Ipv4ReachTlv {
                list: ipv4_internal_reach.into_iter().collect(),
            },
            ipv4_external_reach: Ipv4ReachTlv {
                list: ipv4_external_reach.into_iter().collect(),
            },
            ext_ipv4_reach: ExtIpv4ReachTlv {
                list: ext_ipv4_reach.into_iter().collect(),
            },
            unknown: vec![],
        }
    }
}

// ===== impl Snp =====

impl Snp {
    pub fn new(
        level: LevelNumber,
        csnp: bool,
        source: LanId,
        summary: Option<(LspId, LspId)>,
        tlvs: SnpTlvs,
    ) -> Snp {
        let pdu_type = match (csnp, level) {
            (true, LevelNumber::L1) => PduType::CsnpL1,
            (true, LevelNumber::L2) => PduType::CsnpL2,
            (false, LevelNumber::L1) => PduType::PsnpL1,
            (false, LevelNumber::L2) => PduType::PsnpL2,
        };
        Snp {
            hdr: Hdr { pdu_type },
            source,
            summary,
            tlvs,
        }
    }

    pub fn is_csnp(&self) -> bool {
        matches!(self.hdr.pdu_type, PduType::CsnpL1 | PduType::CsnpL2)
    }

    fn decode(hdr: Hdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let total_len = buf.remaining() + HDR_LEN as usize;
        let pdu_len = buf.try_get_u16()?;
        if pdu_len as usize != total_len {
            return Err(DecodeError::InvalidPduLength(pdu_len));
        }
        let source = LanId::decode(buf)?;
        let summary = match hdr.pdu_type {
            PduType::CsnpL1 | PduType::CsnpL2 => {
                let start = LspId::decode(buf)?;
                let end = LspId::decode(buf)?;
                Some((start, end))
            }
            _ => None,
        };

        // Decode TLVs.
        let mut tlvs = SnpTlvs::default();
        while buf.remaining() >= 2 {
            let tlv_type = buf.try_get_u8()?;
            let tlv_len = buf.try_get_u8()?;
            if tlv_len as usize > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len));
            }
            match TlvType::from_u8(tlv_type) {
                Some(TlvType::LspEntries) => {
                    let tlv = LspEntriesTlv::decode(tlv_len, buf)?;
                    tlvs.lsp_entries.list.extend(tlv.list);
                }
                _ => {
                    let tlv = UnknownTlv::decode(tlv_type, tlv_len, buf)?;
                    tlvs.unknown.push(tlv);
                }
            }
        }

        Ok(Snp {
            hdr,
            source,
            summary,
            tlvs,
        })
    }

    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            // The PDU length will be rewritten later.
            let len_pos = buf.len();
            buf.put_u16(0);
            self.source.encode(&mut buf);
            if let Some((start, end)) = &self.summary {
                start.encode(&mut buf);
                end.encode(&mut buf);
            }

            // Encode TLVs.
            if !self.tlvs.lsp_entries.list.is_empty() {
                self.tlvs.lsp_entries.encode(&mut buf);
            }
            for tlv in &self.tlvs.unknown {
                tlv.encode(&mut buf);
            }

            // Rewrite the PDU length.
            let pdu_len = buf.len() as u16;
            buf[len_pos..len_pos + 2].copy_from_slice(&pdu_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    pub fn level(&self) -> LevelNumber {
        match self.hdr.pdu_type {
            PduType::CsnpL1 | PduType::PsnpL1 => LevelNumber::L1,
            PduType::CsnpL2 | PduType::PsnpL2 => LevelNumber::L2,
            _ => unreachable!(),
        }
    }
}

// ===== impl LspEntry for Lsp =====

impl From<&Lsp> for LspEntry {
    fn from(lsp: &Lsp) -> LspEntry {
        LspEntry {
            rem_lifetime: lsp.rem_lifetime(),
            lsp_id: lsp.lsp_id,
            seqno: lsp.seqno,
            cksum: lsp.cksum,
        }
    }
}

// ===== helper functions =====

// ISO 8473 Fletcher checksum with checkbytes.
fn checksum(data: &[u8], checksum_pos: usize) -> [u8; 2] {
    let checksum = fletcher::calc_fletcher16(data);
    let mut checkbyte0 = (checksum & 0x00FF) as i32;
    let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

    // Adjust checksum value using scaling factor.
    let sop = (data.len() - checksum_pos - 1) as u16;
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
