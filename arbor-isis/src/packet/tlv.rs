//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use arbor_utils::bytes::{BytesExt, BytesMutExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::packet::consts::TlvType;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{AreaAddr, LanId, LspId, SystemId};

// TLV header size (type + length).
pub const TLV_HDR_SIZE: usize = 2;
// Maximum TLV value length.
pub const TLV_MAX_LEN: usize = 255;

//
// Area Addresses TLV.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AreaAddressesTlv {
    pub list: Vec<AreaAddr>,
}

//
// IS Neighbors TLV (LAN hellos only): the SNPAs this system has heard
// hellos from, used for the three-way handshake on broadcast links.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborsTlv {
    pub list: Vec<[u8; 6]>,
}

//
// Padding TLV.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PaddingTlv {
    pub length: u8,
}

//
// Protocols Supported TLV.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ProtocolsSupportedTlv {
    pub list: Vec<u8>,
}

//
// IPv4 Interface Addresses TLV.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ipv4AddressesTlv {
    pub list: Vec<Ipv4Addr>,
}

//
// LSP Entries TLV, shared by CSNPs and PSNPs.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LspEntriesTlv {
    pub list: Vec<LspEntry>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LspEntry {
    pub rem_lifetime: u16,
    pub lsp_id: LspId,
    pub seqno: u32,
    pub cksum: u16,
}

//
// IS Reachability TLV (narrow metrics).
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IsReachTlv {
    pub list: Vec<IsReach>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IsReach {
    pub metric: u8,
    pub neighbor: LanId,
}

//
// Extended IS Reachability TLV (wide metrics).
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ExtIsReachTlv {
    pub list: Vec<ExtIsReach>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ExtIsReach {
    pub neighbor: LanId,
    pub metric: u32,
}

//
// IP Internal/External Reachability TLV (narrow metrics).
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ipv4ReachTlv {
    pub list: Vec<Ipv4Reach>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ipv4Reach {
    pub metric: u8,
    pub prefix: Ipv4Network,
}

//
// Extended IP Reachability TLV (wide metrics).
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ExtIpv4ReachTlv {
    pub list: Vec<ExtIpv4Reach>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ExtIpv4Reach {
    pub metric: u32,
    pub up_down: bool,
    pub prefix: Ipv4Network,
}

//
// Point-to-Point Three-Way Adjacency TLV (RFC 5303).
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct P2pAdjStateTlv {
    pub state: P2pAdjState,
    pub neighbor_system_id: Option<SystemId>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum P2pAdjState {
    Up = 0,
    Initializing = 1,
    Down = 2,
}

//
// Unknown TLV, preserved byte-for-byte so re-encoding an LSP does not
// disturb its checksum.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UnknownTlv {
    pub tlv_type: u8,
    pub length: u8,
    pub value: Bytes,
}

// ===== helper functions =====

pub(crate) fn tlv_encode_start(
    buf: &mut BytesMut,
    tlv_type: TlvType,
) -> usize {
    buf.put_u8(tlv_type as u8);
    // The TLV length will be rewritten later.
    buf.put_u8(0);
    buf.len()
}

pub(crate) fn tlv_encode_end(buf: &mut BytesMut, len_pos: usize) {
    let tlv_len = buf.len() - len_pos;
    debug_assert!(tlv_len <= TLV_MAX_LEN);
    buf[len_pos - 1] = tlv_len as u8;
}

// ===== impl AreaAddressesTlv =====

impl AreaAddressesTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut list = vec![];
        let end = buf.remaining().saturating_sub(tlv_len as usize);
        while buf.remaining() > end {
            let addr_len = buf.try_get_u8()?;
            list.push(AreaAddr::decode(addr_len, buf)?);
        }
        Ok(AreaAddressesTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::AreaAddresses);
        for area_addr in &self.list {
            area_addr.encode(buf);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl NeighborsTlv =====

impl NeighborsTlv {
    const MAC_ADDR_LEN: usize = 6;

    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        if tlv_len as usize % Self::MAC_ADDR_LEN != 0 {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        let mut list = vec![];
        for _ in 0..(tlv_len as usize / Self::MAC_ADDR_LEN) {
            let mut addr = [0; 6];
            buf.try_copy_to_slice(&mut addr)?;
            list.push(addr);
        }
        Ok(NeighborsTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::Neighbors);
        for addr in &self.list {
            buf.put_slice(addr);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl PaddingTlv =====

impl PaddingTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        // The padding content is ignored.
        buf.advance(tlv_len as usize);
        Ok(PaddingTlv { length: tlv_len })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::Padding);
        buf.put_bytes(0, self.length as usize);
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl ProtocolsSupportedTlv =====

impl ProtocolsSupportedTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut list = vec![];
        for _ in 0..tlv_len {
            list.push(buf.try_get_u8()?);
        }
        Ok(ProtocolsSupportedTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::ProtocolsSupported);
        for nlpid in &self.list {
            buf.put_u8(*nlpid);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl Ipv4AddressesTlv =====

impl Ipv4AddressesTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        if tlv_len % 4 != 0 {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        let mut list = vec![];
        for _ in 0..(tlv_len / 4) {
            list.push(buf.try_get_ipv4()?);
        }
        Ok(Ipv4AddressesTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::Ipv4Addresses);
        for addr in &self.list {
            buf.put_ipv4(addr);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl LspEntriesTlv =====

impl LspEntriesTlv {
    pub const ENTRY_SIZE: usize = 16;
    pub const MAX_ENTRIES: usize = TLV_MAX_LEN / Self::ENTRY_SIZE;

    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        if tlv_len as usize % Self::ENTRY_SIZE != 0 {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        let mut list = vec![];
        for _ in 0..(tlv_len as usize / Self::ENTRY_SIZE) {
            let rem_lifetime = buf.try_get_u16()?;
            let lsp_id = LspId::decode(buf)?;
            let seqno = buf.try_get_u32()?;
            let cksum = buf.try_get_u16()?;
            list.push(LspEntry {
                rem_lifetime,
                lsp_id,
                seqno,
                cksum,
            });
        }
        Ok(LspEntriesTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::LspEntries);
        for entry in &self.list {
            buf.put_u16(entry.rem_lifetime);
            entry.lsp_id.encode(buf);
            buf.put_u32(entry.seqno);
            buf.put_u16(entry.cksum);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl IsReachTlv =====

impl IsReachTlv {
    const ENTRY_SIZE: usize = 11;

    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        if (tlv_len as usize).saturating_sub(1) % Self::ENTRY_SIZE != 0 {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        // Virtual flag, not used.
        let _ = buf.try_get_u8()?;
        let mut list = vec![];
        for _ in 0..((tlv_len as usize - 1) / Self::ENTRY_SIZE) {
            let metric = buf.try_get_u8()? & 0x3f;
            // Delay, expense and error metrics are not supported.
            let _ = buf.try_get_u8()?;
            let _ = buf.try_get_u8()?;
            let _ = buf.try_get_u8()?;
            let neighbor = LanId::decode(buf)?;
            list.push(IsReach { metric, neighbor });
        }
        Ok(IsReachTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        const METRIC_UNSUPPORTED: u8 = 0x80;

        let len_pos = tlv_encode_start(buf, TlvType::IsReach);
        buf.put_u8(0);
        for entry in &self.list {
            buf.put_u8(entry.metric & 0x3f);
            buf.put_u8(METRIC_UNSUPPORTED);
            buf.put_u8(METRIC_UNSUPPORTED);
            buf.put_u8(METRIC_UNSUPPORTED);
            entry.neighbor.encode(buf);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl ExtIsReachTlv =====

impl ExtIsReachTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut list = vec![];
        let end = buf.remaining().saturating_sub(tlv_len as usize);
        while buf.remaining() > end {
            let neighbor = LanId::decode(buf)?;
            let metric = buf.try_get_u24()?;
            // Sub-TLVs are not supported and skipped.
            let subtlvs_len = buf.try_get_u8()?;
            if subtlvs_len as usize > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len));
            }
            buf.advance(subtlvs_len as usize);
            list.push(ExtIsReach { neighbor, metric });
        }
        Ok(ExtIsReachTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::ExtIsReach);
        for entry in &self.list {
            entry.neighbor.encode(buf);
            buf.put_u24(entry.metric);
            // No sub-TLVs.
            buf.put_u8(0);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl Ipv4ReachTlv =====

impl Ipv4ReachTlv {
    const ENTRY_SIZE: usize = 12;

    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        if tlv_len as usize % Self::ENTRY_SIZE != 0 {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        let mut list = vec![];
        for _ in 0..(tlv_len as usize / Self::ENTRY_SIZE) {
            let metric = buf.try_get_u8()? & 0x3f;
            let _ = buf.try_get_u8()?;
            let _ = buf.try_get_u8()?;
            let _ = buf.try_get_u8()?;
            let addr = buf.try_get_ipv4()?;
            let mask = buf.try_get_ipv4()?;
            let Some(prefix) = prefix_from_mask(addr, mask) else {
                continue;
            };
            list.push(Ipv4Reach { metric, prefix });
        }
        Ok(Ipv4ReachTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, tlv_type: TlvType) {
        const METRIC_UNSUPPORTED: u8 = 0x80;

        let len_pos = tlv_encode_start(buf, tlv_type);
        for entry in &self.list {
            buf.put_u8(entry.metric & 0x3f);
            buf.put_u8(METRIC_UNSUPPORTED);
            buf.put_u8(METRIC_UNSUPPORTED);
            buf.put_u8(METRIC_UNSUPPORTED);
            buf.put_ipv4(&entry.prefix.ip());
            buf.put_ipv4(&entry.prefix.mask());
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl ExtIpv4ReachTlv =====

impl ExtIpv4ReachTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut list = vec![];
        let end = buf.remaining().saturating_sub(tlv_len as usize);
        while buf.remaining() > end {
            let metric = buf.try_get_u32()?;
            let control = buf.try_get_u8()?;
            let up_down = control & 0x80 != 0;
            let subtlvs = control & 0x40 != 0;
            let plen = control & 0x3f;
            let mut octets = [0u8; 4];
            let plen_octets = plen.div_ceil(8) as usize;
            if plen > 32 || plen_octets > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len));
            }
            buf.try_copy_to_slice(&mut octets[..plen_octets])?;
            if subtlvs {
                let subtlvs_len = buf.try_get_u8()?;
                if subtlvs_len as usize > buf.remaining() {
                    return Err(DecodeError::InvalidTlvLength(tlv_len));
                }
                buf.advance(subtlvs_len as usize);
            }
            let Ok(prefix) = Ipv4Network::new(Ipv4Addr::from(octets), plen)
            else {
                continue;
            };
            list.push(ExtIpv4Reach {
                metric,
                up_down,
                prefix,
            });
        }
        Ok(ExtIpv4ReachTlv { list })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::ExtIpv4Reach);
        for entry in &self.list {
            buf.put_u32(entry.metric);
            let plen = entry.prefix.prefix();
            let mut control = plen & 0x3f;
            if entry.up_down {
                control |= 0x80;
            }
            buf.put_u8(control);
            let plen_octets = plen.div_ceil(8) as usize;
            buf.put_slice(&entry.prefix.ip().octets()[..plen_octets]);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl P2pAdjStateTlv =====

impl P2pAdjStateTlv {
    pub(crate) fn decode(tlv_len: u8, buf: &mut Bytes) -> DecodeResult<Self> {
        let state = match buf.try_get_u8()? {
            0 => P2pAdjState::Up,
            1 => P2pAdjState::Initializing,
            2 => P2pAdjState::Down,
            _ => return Err(DecodeError::InvalidTlvLength(tlv_len)),
        };
        let mut neighbor_system_id = None;
        if tlv_len >= 11 {
            // Extended local circuit ID, not used.
            let _ = buf.try_get_u32()?;
            neighbor_system_id = Some(SystemId::decode(buf)?);
            // Neighbor extended local circuit ID, if present.
            if tlv_len >= 15 {
                let _ = buf.try_get_u32()?;
            }
        } else if tlv_len >= 5 {
            let _ = buf.try_get_u32()?;
        }
        Ok(P2pAdjStateTlv {
            state,
            neighbor_system_id,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let len_pos = tlv_encode_start(buf, TlvType::P2pAdjState);
        buf.put_u8(self.state as u8);
        // Extended local circuit ID.
        buf.put_u32(0);
        if let Some(system_id) = &self.neighbor_system_id {
            system_id.encode(buf);
        }
        tlv_encode_end(buf, len_pos);
    }
}

// ===== impl UnknownTlv =====

impl UnknownTlv {
    pub(crate) fn decode(
        tlv_type: u8,
        tlv_len: u8,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        if tlv_len as usize > buf.remaining() {
            return Err(DecodeError::InvalidTlvLength(tlv_len));
        }
        let value = buf.copy_to_bytes(tlv_len as usize);
        Ok(UnknownTlv {
            tlv_type,
            length: tlv_len,
            value,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tlv_type);
        buf.put_u8(self.length);
        buf.put_slice(&self.value);
    }
}

// ===== helper functions =====

fn prefix_from_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Option<Ipv4Network> {
    use arbor_utils::ip::Ipv4AddrExt;

    let plen = mask.mask_to_plen()?;
    Ipv4Network::new(addr, plen).ok()
}
