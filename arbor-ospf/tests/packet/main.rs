//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

mod ospfv2;

use arbor_ospf::packet::Packet;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let packet_actual = Packet::decode(bytes).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}
