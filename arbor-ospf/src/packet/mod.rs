//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use arbor_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use arbor_utils::ip::Ipv4AddrExt;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};

// OSPF version number implemented by this codec.
pub const OSPF_VERSION: u8 = 2;

// OSPF packet type.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-3
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 1,
    DbDesc = 2,
    LsRequest = 3,
    LsUpdate = 4,
    LsAck = 5,
}

// OSPFv2 Options field.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const E = 0x02;
    }
}

// Database Description packet flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        const MS = 0x01;
        const M = 0x02;
        const I = 0x04;
    }
}

// OSPFv2 authentication type.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthType {
    Null = 0x00,
    Simple = 0x01,
    Cryptographic = 0x02,
}

//
// OSPFv2 packet header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Version #   |     Type      |         Packet length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Router ID                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Area ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |             AuType            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

//
// OSPFv2 Hello packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Network Mask                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         HelloInterval         |    Options    |    Rtr Pri    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     RouterDeadInterval                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Designated Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Backup Designated Router                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Neighbor                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

//
// OSPFv2 Database Description packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Interface MTU         |    Options    |0|0|0|0|0|I|M|MS
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     DD sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      An LSA Header ...                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

//
// OSPFv2 Link State Request packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          LS type                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Link State ID                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey>,
}

//
// OSPFv2 Link State Update packet.
//
// Encoding format (packet body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            # LSAs                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            LSAs ...                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

//
// OSPFv2 Link State Acknowledgment packet.
//
// The packet body is a sequence of LSA headers.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// OSPFv2 packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(Hello),
    DbDesc(DbDesc),
    LsRequest(LsRequest),
    LsUpdate(LsUpdate),
    LsAck(LsAck),
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const LENGTH: u16 = 24;
    const CKSUM_RANGE: std::ops::Range<usize> = 12..14;
    const AUTH_RANGE: std::ops::Range<usize> = 16..24;

    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16)> {
        // Parse version.
        let version = buf.try_get_u8()?;
        if version != OSPF_VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        // Parse packet type.
        let pkt_type = buf.try_get_u8()?;
        let Some(pkt_type) = PacketType::from_u8(pkt_type) else {
            return Err(DecodeError::UnknownPacketType(pkt_type));
        };

        // Parse and validate message length.
        let pkt_len = buf.try_get_u16()?;
        let min_pkt_len = Self::LENGTH
            + match pkt_type {
                PacketType::Hello => Hello::BASE_LENGTH,
                PacketType::DbDesc => DbDesc::BASE_LENGTH,
                PacketType::LsRequest => 0,
                PacketType::LsUpdate => LsUpdate::BASE_LENGTH,
                PacketType::LsAck => 0,
            };
        if pkt_len < min_pkt_len {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Parse Router-ID.
        let router_id = buf.try_get_ipv4()?;
        if !router_id.is_usable() {
            return Err(DecodeError::InvalidRouterId(router_id));
        }

        // Parse Area ID.
        let area_id = buf.try_get_ipv4()?;

        // Parse checksum (already verified).
        let _cksum = buf.try_get_u16()?;

        // Parse authentication type. Cryptographic authentication of routing
        // messages is not implemented, so only null authentication is
        // accepted.
        let au_type = buf.try_get_u16()?;
        match AuthType::from_u16(au_type) {
            Some(AuthType::Null) => {
                let _ = buf.try_get_u64()?;
            }
            _ => {
                return Err(DecodeError::UnsupportedAuthType(au_type));
            }
        }

        Ok((
            PacketHdr {
                pkt_type,
                router_id,
                area_id,
            },
            pkt_len,
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(OSPF_VERSION);
        buf.put_u8(self.pkt_type as u8);
        // The length will be rewritten later.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        // The checksum will be computed later.
        buf.put_u16(0);
        // Null authentication.
        buf.put_u16(AuthType::Null as u16);
        buf.put_u64(0);
    }

    fn update_cksum(buf: &mut BytesMut) {
        // With null authentication the authentication field is zeroed,
        // contributing nothing to the one's complement sum.
        let mut cksum = Checksum::new();
        cksum.add_bytes(buf);
        buf[Self::CKSUM_RANGE].copy_from_slice(&cksum.checksum());
    }

    fn verify_cksum(data: &[u8]) -> DecodeResult<()> {
        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[0..Self::AUTH_RANGE.start]);
        cksum.add_bytes(&data[Self::AUTH_RANGE.end..]);
        if cksum.checksum() != [0; 2] {
            return Err(DecodeError::InvalidChecksum);
        }

        Ok(())
    }
}

// ===== impl Hello =====

impl Hello {
    pub const BASE_LENGTH: u16 = 20;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.network_mask);
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.priority);
        buf.put_u32(self.dead_interval);
        buf.put_ipv4(&self.dr.unwrap_or(Ipv4Addr::UNSPECIFIED));
        buf.put_ipv4(&self.bdr.unwrap_or(Ipv4Addr::UNSPECIFIED));
        for nbr in &self.neighbors {
            buf.put_ipv4(nbr);
        }
    }

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let network_mask = buf.try_get_ipv4()?;
        let hello_interval = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let priority = buf.try_get_u8()?;
        let dead_interval = buf.try_get_u32()?;
        let dr = buf.try_get_opt_ipv4()?;
        let bdr = buf.try_get_opt_ipv4()?;
        let mut neighbors = BTreeSet::new();
        while buf.remaining() >= 4 {
            neighbors.insert(buf.try_get_ipv4()?);
        }
        if buf.remaining() != 0 {
            return Err(DecodeError::InvalidLength(buf.remaining() as u16));
        }

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }
}

// ===== impl DbDesc =====

impl DbDesc {
    pub const BASE_LENGTH: u16 = 8;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.dd_flags.bits());
        buf.put_u32(self.dd_seq_no);
        for lsa_hdr in &self.lsa_hdrs {
            lsa_hdr.encode(buf);
        }
    }

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mtu = buf.try_get_u16()?;
        let options = Options::from_bits_truncate(buf.try_get_u8()?);
        let dd_flags = DbDescFlags::from_bits_truncate(buf.try_get_u8()?);
        let dd_seq_no = buf.try_get_u32()?;
        let mut lsa_hdrs = vec![];
        while buf.remaining() >= LsaHdr::LENGTH as usize {
            lsa_hdrs.push(LsaHdr::decode(buf)?);
        }
        if buf.remaining() != 0 {
            return Err(DecodeError::InvalidLength(buf.remaining() as u16));
        }

        Ok(DbDesc {
            hdr,
            mtu,
            options,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }
}

// ===== impl LsRequest =====

impl LsRequest {
    const ENTRY_LENGTH: u16 = 12;

    fn encode(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u32(entry.lsa_type as u32);
            buf.put_ipv4(&entry.lsa_id);
            buf.put_ipv4(&entry.adv_rtr);
        }
    }

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut entries = vec![];
        while buf.remaining() >= Self::ENTRY_LENGTH as usize {
            let lsa_type = buf.try_get_u32()? as u8;
            let Some(lsa_type) = lsa::LsaType::from_u8(lsa_type) else {
                return Err(DecodeError::UnknownLsaType(lsa_type));
            };
            let lsa_id = buf.try_get_ipv4()?;
            let adv_rtr = buf.try_get_ipv4()?;
            entries.push(LsaKey {
                lsa_type,
                adv_rtr,
                lsa_id,
            });
        }
        if buf.remaining() != 0 {
            return Err(DecodeError::InvalidLength(buf.remaining() as u16));
        }

        Ok(LsRequest { hdr, entries })
    }
}

// ===== impl LsUpdate =====

impl LsUpdate {
    pub const BASE_LENGTH: u16 = 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.lsas.len() as u32);
        for lsa in &self.lsas {
            buf.put_slice(&lsa.raw);
        }
    }

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let lsa_count = buf.try_get_u32()?;
        let mut lsas = vec![];
        for _ in 0..lsa_count {
            lsas.push(Lsa::decode(buf)?);
        }

        Ok(LsUpdate { hdr, lsas })
    }
}

// ===== impl LsAck =====

impl LsAck {
    fn encode(&self, buf: &mut BytesMut) {
        for lsa_hdr in &self.lsa_hdrs {
            lsa_hdr.encode(buf);
        }
    }

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mut lsa_hdrs = vec![];
        while buf.remaining() >= LsaHdr::LENGTH as usize {
            lsa_hdrs.push(LsaHdr::decode(buf)?);
        }
        if buf.remaining() != 0 {
            return Err(DecodeError::InvalidLength(buf.remaining() as u16));
        }

        Ok(LsAck { hdr, lsa_hdrs })
    }
}

// ===== impl Packet =====

impl Packet {
    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(pkt) => &pkt.hdr,
            Packet::DbDesc(pkt) => &pkt.hdr,
            Packet::LsRequest(pkt) => &pkt.hdr,
            Packet::LsUpdate(pkt) => &pkt.hdr,
            Packet::LsAck(pkt) => &pkt.hdr,
        }
    }

    // Encodes OSPF packet into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr().encode(&mut buf);
            match self {
                Packet::Hello(pkt) => pkt.encode(&mut buf),
                Packet::DbDesc(pkt) => pkt.encode(&mut buf),
                Packet::LsRequest(pkt) => pkt.encode(&mut buf),
                Packet::LsUpdate(pkt) => pkt.encode(&mut buf),
                Packet::LsAck(pkt) => pkt.encode(&mut buf),
            }

            // Rewrite packet length.
            let pkt_len = buf.len() as u16;
            buf[2..4].copy_from_slice(&pkt_len.to_be_bytes());

            // Compute packet checksum.
            PacketHdr::update_cksum(&mut buf);

            buf.clone().freeze()
        })
    }

    // Decodes OSPF packet from a bytes buffer.
    //
    // Bytes past the length declared in the packet header (e.g. link-layer
    // padding) are ignored.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Decode the packet header.
        let (hdr, pkt_len) = PacketHdr::decode(&mut buf)?;
        if (pkt_len as usize) > data.len() {
            return Err(DecodeError::InvalidLength(pkt_len));
        }

        // Verify the packet checksum.
        PacketHdr::verify_cksum(&data[0..pkt_len as usize])?;

        // Decode the packet body. The body length must match the length
        // declared in the header exactly.
        let mut buf =
            buf.slice(0..(pkt_len - PacketHdr::LENGTH) as usize);
        match hdr.pkt_type {
            PacketType::Hello => {
                Hello::decode(hdr, &mut buf).map(Packet::Hello)
            }
            PacketType::DbDesc => {
                DbDesc::decode(hdr, &mut buf).map(Packet::DbDesc)
            }
            PacketType::LsRequest => {
                LsRequest::decode(hdr, &mut buf).map(Packet::LsRequest)
            }
            PacketType::LsUpdate => {
                LsUpdate::decode(hdr, &mut buf).map(Packet::LsUpdate)
            }
            PacketType::LsAck => {
                LsAck::decode(hdr, &mut buf).map(Packet::LsAck)
            }
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Hello => write!(f, "Hello"),
            PacketType::DbDesc => write!(f, "Database Description"),
            PacketType::LsRequest => write!(f, "Link State Request"),
            PacketType::LsUpdate => write!(f, "Link State Update"),
            PacketType::LsAck => write!(f, "Link State Ack"),
        }
    }
}
