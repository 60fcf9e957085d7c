//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use arbor_bgp::packet::attribute::{Aggregator, AsPath, Attrs};
use arbor_bgp::packet::consts::Origin;
use arbor_bgp::packet::message::{
    Message, MpReachNlri, MpUnreachNlri, ReachNlri, UnreachNlri, UpdateMsg,
};
use const_addrs::{ip4, ip6, net4, net6};

use super::test_roundtrip;

fn base_attrs(as_path: &[u32]) -> Attrs {
    let mut attrs = Attrs::default();
    attrs.base.origin = Origin::Igp;
    attrs.base.as_path = AsPath::from(as_path);
    attrs.base.nexthop = Some(ip4!("10.0.0.2"));
    attrs
}

#[test]
fn test_update_reach_roundtrip() {
    let mut attrs = base_attrs(&[65002]);
    attrs.base.med = Some(50);
    attrs.comm = Some(BTreeSet::from([0x0001_0001, 0xffff_ff01]));

    test_roundtrip(&Message::Update(UpdateMsg {
        reach: Some(ReachNlri {
            prefixes: vec![net4!("10.10.10.0/24"), net4!("10.10.11.0/24")],
            nexthop: ip4!("10.0.0.2"),
        }),
        unreach: None,
        mp_reach: None,
        mp_unreach: None,
        attrs: Some(attrs),
    }));
}

#[test]
fn test_update_withdraw_roundtrip() {
    test_roundtrip(&Message::Update(UpdateMsg {
        reach: None,
        unreach: Some(UnreachNlri {
            prefixes: vec![net4!("10.10.10.0/24")],
        }),
        mp_reach: None,
        mp_unreach: None,
        attrs: None,
    }));
}

#[test]
fn test_update_rr_attrs_roundtrip() {
    let mut attrs = base_attrs(&[65002, 65099]);
    attrs.base.local_pref = Some(200);
    attrs.base.atomic_aggregate = true;
    attrs.base.aggregator = Some(Aggregator {
        asn: 65002,
        addr: ip4!("2.2.2.2"),
    });
    attrs.base.originator_id = Some(ip4!("3.3.3.3"));
    attrs.base.cluster_list = Some(vec![ip4!("1.1.1.1"), ip4!("4.4.4.4")]);

    test_roundtrip(&Message::Update(UpdateMsg {
        reach: Some(ReachNlri {
            prefixes: vec![net4!("192.168.1.0/24")],
            nexthop: ip4!("10.0.0.2"),
        }),
        unreach: None,
        mp_reach: None,
        mp_unreach: None,
        attrs: Some(attrs),
    }));
}

#[test]
fn test_update_mp_ipv6_roundtrip() {
    let attrs = {
        let mut attrs = Attrs::default();
        attrs.base.origin = Origin::Igp;
        attrs.base.as_path = AsPath::from([65002u32].as_slice());
        attrs
    };

    test_roundtrip(&Message::Update(UpdateMsg {
        reach: None,
        unreach: None,
        mp_reach: Some(MpReachNlri::Ipv6Unicast {
            prefixes: vec![net6!("2001:db8:1::/64")],
            nexthop: ip6!("2001:db8::2"),
            ll_nexthop: Some(ip6!("fe80::2")),
        }),
        mp_unreach: None,
        attrs: Some(attrs),
    }));
}

#[test]
fn test_update_mp_ipv6_withdraw_roundtrip() {
    let attrs = {
        let mut attrs = Attrs::default();
        attrs.base.origin = Origin::Igp;
        attrs.base.as_path = AsPath::default();
        attrs
    };

    test_roundtrip(&Message::Update(UpdateMsg {
        reach: None,
        unreach: None,
        mp_reach: None,
        mp_unreach: Some(MpUnreachNlri::Ipv6Unicast {
            prefixes: vec![net6!("2001:db8:1::/64")],
        }),
        attrs: Some(attrs),
    }));
}

#[test]
fn test_update_end_of_rib() {
    let msg = UpdateMsg::default();
    assert!(msg.is_end_of_rib());
    test_roundtrip(&Message::Update(msg));
}
