//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use arbor_isis::packet::pdu::{Pdu, Snp, SnpTlvs};
use arbor_isis::packet::tlv::{LspEntriesTlv, LspEntry};
use arbor_isis::packet::{LanId, LevelNumber, LspId, SystemId};

use super::{test_decode_pdu, test_encode_pdu, test_roundtrip};

//
// Test PDUs.
//

static PSNP1: Lazy<(Vec<u8>, Pdu)> = Lazy::new(|| {
    (
        vec![
            0x83, 0x11, 0x01, 0x00, 0x1a, 0x01, 0x00, 0x00, 0x00, 0x23,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x09, 0x10, 0x04,
            0x79, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0xb8, 0x47,
        ],
        Pdu::Snp(Snp::new(
            LevelNumber::L1,
            false,
            LanId::from([0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]),
            None,
            SnpTlvs {
                lsp_entries: LspEntriesTlv {
                    list: vec![LspEntry {
                        rem_lifetime: 1145,
                        lsp_id: LspId::from([
                            0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00,
                        ]),
                        seqno: 1,
                        cksum: 0xb847,
                    }],
                },
                unknown: vec![],
            },
        )),
    )
});

#[test]
fn test_encode_psnp1() {
    let (ref bytes, ref pdu) = *PSNP1;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_psnp1() {
    let (ref bytes, ref pdu) = *PSNP1;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_csnp_roundtrip() {
    let pdu = Pdu::Snp(Snp::new(
        LevelNumber::L2,
        true,
        LanId::from((SystemId::from([0, 0, 0, 0, 0, 1]), 0)),
        Some((
            LspId::from([0x00; 8]),
            LspId::from([0xff; 8]),
        )),
        SnpTlvs {
            lsp_entries: LspEntriesTlv {
                list: vec![
                    LspEntry {
                        rem_lifetime: 1200,
                        lsp_id: LspId::from((
                            SystemId::from([0, 0, 0, 0, 0, 1]),
                            0,
                            0,
                        )),
                        seqno: 4,
                        cksum: 0x1234,
                    },
                    LspEntry {
                        rem_lifetime: 900,
                        lsp_id: LspId::from((
                            SystemId::from([0, 0, 0, 0, 0, 2]),
                            0,
                            0,
                        )),
                        seqno: 2,
                        cksum: 0x5678,
                    },
                ],
            },
            unknown: vec![],
        },
    ));
    test_roundtrip(&pdu);
}

#[test]
fn test_decode_truncated() {
    let (ref bytes, _) = *PSNP1;
    assert!(Pdu::decode(&bytes[..12]).is_err());
}
