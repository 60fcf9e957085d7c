//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_bgp::packet::consts::{Afi, Safi};
use arbor_bgp::packet::message::{Capability, Message, OpenMsg};
use const_addrs::ip4;
use maplit::btreeset;

use super::test_roundtrip;

#[test]
fn test_open_roundtrip() {
    test_roundtrip(&Message::Open(OpenMsg {
        version: 4,
        my_as: 65001,
        holdtime: 90,
        identifier: ip4!("1.1.1.1"),
        capabilities: btreeset![
            Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
            },
            Capability::MultiProtocol {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
            },
            Capability::FourOctetAsNumber { asn: 65001 },
            Capability::RouteRefresh,
        ],
    }));
}

#[test]
fn test_open_graceful_restart_roundtrip() {
    test_roundtrip(&Message::Open(OpenMsg {
        version: 4,
        my_as: 65001,
        holdtime: 180,
        identifier: ip4!("1.1.1.1"),
        capabilities: btreeset![
            Capability::FourOctetAsNumber { asn: 65001 },
            Capability::GracefulRestart {
                restart_time: 120,
                restarting: false,
                afi_safis: vec![(Afi::Ipv4, Safi::Unicast)],
            },
        ],
    }));
}

#[test]
fn test_open_real_as() {
    let msg = OpenMsg {
        version: 4,
        // AS_TRANS placeholder for a 4-octet ASN.
        my_as: 23456,
        holdtime: 90,
        identifier: ip4!("1.1.1.1"),
        capabilities: btreeset![Capability::FourOctetAsNumber {
            asn: 4_200_000_000,
        }],
    };
    assert_eq!(msg.real_as(), 4_200_000_000);

    let msg = OpenMsg {
        version: 4,
        my_as: 65001,
        holdtime: 90,
        identifier: ip4!("1.1.1.1"),
        capabilities: btreeset![],
    };
    assert_eq!(msg.real_as(), 65001);
}
