//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use arbor_ospf::packet::error::DecodeError;
use arbor_ospf::packet::lsa::{
    LSA_INIT_SEQ_NO, Lsa, LsaAsExternal, LsaBody, LsaKey, LsaRouter,
    LsaRouterLink, LsaRouterLinkType, LsaType,
};
use arbor_ospf::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketHdr, PacketType,
};
use const_addrs::{ip4, net4};
use maplit::btreeset;

use super::{test_decode_packet, test_encode_packet};

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0xf5, 0x98, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0xfc, 0x00, 0x0a, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x02, 0x02, 0x02, 0x02,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: ip4!("1.1.1.1"),
                area_id: ip4!("0.0.0.0"),
            },
            network_mask: ip4!("255.255.255.252"),
            hello_interval: 10,
            options: Options::E,
            priority: 1,
            dead_interval: 40,
            dr: None,
            bdr: None,
            neighbors: btreeset![ip4!("2.2.2.2")],
        }),
    )
});

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref packet) = *HELLO1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref packet) = *HELLO1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_decode_hello1_bad_checksum() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[13] ^= 0xff;
    assert_eq!(
        Packet::decode(&bytes),
        Err(DecodeError::InvalidChecksum),
    );
}

#[test]
fn test_decode_hello1_truncated() {
    let (ref bytes, _) = *HELLO1;
    assert!(Packet::decode(&bytes[..20]).is_err());
}

#[test]
fn test_decode_bad_version() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[0] = 3;
    assert_eq!(Packet::decode(&bytes), Err(DecodeError::InvalidVersion(3)));
}

//
// Round-trip tests for the remaining packet types.
//

fn test_roundtrip(packet: Packet) {
    let bytes = packet.encode();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(packet, decoded);

    // Re-encoding a decoded packet preserves the original bytes.
    let reencoded = decoded.encode();
    assert_eq!(bytes, reencoded);
}

fn packet_hdr(pkt_type: PacketType) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: ip4!("1.1.1.1"),
        area_id: ip4!("0.0.0.0"),
    }
}

fn router_lsa() -> Lsa {
    Lsa::new(
        1,
        Options::E,
        ip4!("1.1.1.1"),
        ip4!("1.1.1.1"),
        LSA_INIT_SEQ_NO,
        LsaBody::Router(LsaRouter {
            flags: 0,
            links: vec![
                LsaRouterLink {
                    link_type: LsaRouterLinkType::PointToPoint,
                    link_id: ip4!("2.2.2.2"),
                    link_data: ip4!("10.0.0.1"),
                    metric: 1,
                },
                LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: ip4!("10.0.0.0"),
                    link_data: ip4!("255.255.255.252"),
                    metric: 1,
                },
            ],
        }),
    )
}

#[test]
fn test_dbdesc_roundtrip() {
    let lsa = router_lsa();
    test_roundtrip(Packet::DbDesc(DbDesc {
        hdr: packet_hdr(PacketType::DbDesc),
        mtu: 1500,
        options: Options::E,
        dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
        dd_seq_no: 0x12345678,
        lsa_hdrs: vec![lsa.hdr],
    }));
}

#[test]
fn test_lsrequest_roundtrip() {
    test_roundtrip(Packet::LsRequest(LsRequest {
        hdr: packet_hdr(PacketType::LsRequest),
        entries: vec![
            LsaKey {
                lsa_type: LsaType::Router,
                adv_rtr: ip4!("2.2.2.2"),
                lsa_id: ip4!("2.2.2.2"),
            },
            LsaKey {
                lsa_type: LsaType::AsExternal,
                adv_rtr: ip4!("2.2.2.2"),
                lsa_id: ip4!("192.168.1.0"),
            },
        ],
    }));
}

#[test]
fn test_lsupdate_roundtrip() {
    let external = Lsa::new(
        1,
        Options::E,
        ip4!("192.168.1.0"),
        ip4!("2.2.2.2"),
        LSA_INIT_SEQ_NO,
        LsaBody::AsExternal(LsaAsExternal {
            mask: net4!("192.168.1.0/24").mask(),
            e_bit: true,
            metric: 150,
            fwd_addr: Some(ip4!("10.0.0.2")),
            route_tag: 0,
        }),
    );
    test_roundtrip(Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate),
        lsas: vec![router_lsa(), external],
    }));
}

#[test]
fn test_lsack_roundtrip() {
    test_roundtrip(Packet::LsAck(LsAck {
        hdr: packet_hdr(PacketType::LsAck),
        lsa_hdrs: vec![router_lsa().hdr],
    }));
}
