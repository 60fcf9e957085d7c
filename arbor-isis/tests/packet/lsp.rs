//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_isis::packet::pdu::{
    LSP_MAX_LIFETIME, Lsp, LspFlags, LspTlvs, Pdu,
};
use arbor_isis::packet::tlv::{
    ExtIpv4Reach, ExtIsReach, Ipv4Reach, IsReach, UnknownTlv,
};
use arbor_isis::packet::{AreaAddr, LanId, LevelNumber, LspId, SystemId};
use const_addrs::{ip4, net4};

use super::test_roundtrip;

fn system_id(n: u8) -> SystemId {
    SystemId::from([0, 0, 0, 0, 0, n])
}

fn router_lsp() -> Lsp {
    Lsp::new(
        LevelNumber::L1,
        LSP_MAX_LIFETIME,
        LspId::from((system_id(1), 0, 0)),
        1,
        LspFlags::IS_TYPE1 | LspFlags::IS_TYPE2,
        LspTlvs::new(
            [AreaAddr::from([0x49, 0x00, 0x01].as_slice())],
            [ip4!("10.0.1.1")],
            [IsReach {
                metric: 10,
                neighbor: LanId::from((system_id(2), 0)),
            }],
            [ExtIsReach {
                neighbor: LanId::from((system_id(3), 0)),
                metric: 100,
            }],
            [Ipv4Reach {
                metric: 10,
                prefix: net4!("10.0.1.0/24"),
            }],
            [Ipv4Reach {
                metric: 50,
                prefix: net4!("192.168.1.0/24"),
            }],
            [ExtIpv4Reach {
                metric: 100,
                up_down: false,
                prefix: net4!("172.16.0.0/16"),
            }],
        ),
    )
}

#[test]
fn test_lsp_roundtrip() {
    test_roundtrip(&Pdu::Lsp(router_lsp()));
}

#[test]
fn test_lsp_checksum_survives_aging() {
    let mut lsp = router_lsp();
    assert_ne!(lsp.cksum, 0);

    // Rewriting the remaining lifetime must not invalidate the checksum,
    // since the field lies outside the checksummed region.
    lsp.set_rem_lifetime(100);
    let decoded = Pdu::decode(&lsp.raw).unwrap();
    let Pdu::Lsp(decoded) = decoded else {
        panic!("expected an LSP");
    };
    assert_eq!(decoded.rem_lifetime, 100);
    assert_eq!(decoded.cksum, lsp.cksum);
}

#[test]
fn test_lsp_bad_checksum() {
    let lsp = router_lsp();
    let mut bytes = lsp.raw.to_vec();
    // Corrupt a TLV byte.
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    assert!(Pdu::decode(&bytes).is_err());
}

#[test]
fn test_lsp_unknown_tlv_preserved() {
    let mut lsp = router_lsp();
    lsp.tlvs.unknown.push(UnknownTlv {
        tlv_type: 250,
        length: 4,
        value: bytes::Bytes::from_static(&[1, 2, 3, 4]),
    });
    lsp.encode();

    let decoded = Pdu::decode(&lsp.raw).unwrap();
    let Pdu::Lsp(decoded) = decoded else {
        panic!("expected an LSP");
    };
    assert_eq!(decoded.tlvs.unknown.len(), 1);
    assert_eq!(decoded.tlvs.unknown[0].tlv_type, 250);
    // The raw representation, and therefore the checksum, round-trips.
    assert_eq!(lsp.raw, decoded.raw);
    assert_eq!(lsp.cksum, decoded.cksum);
}
