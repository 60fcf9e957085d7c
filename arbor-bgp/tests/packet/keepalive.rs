//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use arbor_bgp::packet::message::{KeepaliveMsg, Message};

use super::{test_decode_msg, test_encode_msg};

static KEEPALIVE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x13, 0x04,
        ],
        Message::Keepalive(KeepaliveMsg {}),
    )
});

#[test]
fn test_encode_keepalive1() {
    let (ref bytes, ref msg) = *KEEPALIVE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_keepalive1() {
    let (ref bytes, ref msg) = *KEEPALIVE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_decode_bad_marker() {
    let (ref bytes, _) = *KEEPALIVE1;
    let mut bytes = bytes.clone();
    bytes[0] = 0;
    let cxt = arbor_bgp::packet::message::DecodeCxt {
        four_octet_asns: true,
    };
    assert!(arbor_bgp::packet::message::Message::decode(&bytes, &cxt).is_err());
}
