//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

mod keepalive;
mod notification;
mod open;
mod update;

use arbor_bgp::packet::message::{DecodeCxt, EncodeCxt, Message};

//
// Helper functions.
//

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    let cxt = EncodeCxt {
        four_octet_asns: true,
    };

    let bytes_actual = msg.encode(&cxt);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    let cxt = DecodeCxt {
        four_octet_asns: true,
    };

    let msg_size = Message::get_message_len(bytes)
        .expect("Buffer doesn't contain a full BGP message");
    let msg_actual = Message::decode(&bytes[0..msg_size], &cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

fn test_roundtrip(msg: &Message) {
    let encode_cxt = EncodeCxt {
        four_octet_asns: true,
    };
    let decode_cxt = DecodeCxt {
        four_octet_asns: true,
    };

    let bytes = msg.encode(&encode_cxt);
    let decoded = Message::decode(&bytes, &decode_cxt).unwrap();
    assert_eq!(*msg, decoded);

    // Re-encoding a decoded message preserves the original bytes.
    let reencoded = decoded.encode(&encode_cxt);
    assert_eq!(bytes, reencoded);
}
