//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use arbor_isis::packet::consts::{NLPID_IPV4, PduType};
use arbor_isis::packet::pdu::{Hello, HelloTlvs, HelloVariant, Pdu};
use arbor_isis::packet::tlv::{
    AreaAddressesTlv, Ipv4AddressesTlv, NeighborsTlv, P2pAdjState,
    P2pAdjStateTlv, ProtocolsSupportedTlv,
};
use arbor_isis::packet::{AreaAddr, LanId, LevelType, SystemId};
use const_addrs::ip4;

use super::test_roundtrip;

fn system_id(n: u8) -> SystemId {
    SystemId::from([0, 0, 0, 0, 0, n])
}

#[test]
fn test_lan_hello_roundtrip() {
    let pdu = Pdu::Hello(Hello::new(
        PduType::HelloLanL1,
        LevelType::All,
        system_id(1),
        30,
        HelloVariant::Lan {
            priority: 100,
            lan_id: LanId::from((system_id(1), 1)),
        },
        HelloTlvs {
            protocols_supported: Some(ProtocolsSupportedTlv {
                list: vec![NLPID_IPV4],
            }),
            area_addrs: AreaAddressesTlv {
                list: vec![AreaAddr::from([0x49, 0x00, 0x01].as_slice())],
            },
            neighbors: NeighborsTlv {
                list: vec![[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]],
            },
            ipv4_addrs: Ipv4AddressesTlv {
                list: vec![ip4!("10.0.1.1")],
            },
            p2p_adj_state: None,
            unknown: vec![],
        },
    ));
    test_roundtrip(&pdu);
}

#[test]
fn test_p2p_hello_roundtrip() {
    let pdu = Pdu::Hello(Hello::new(
        PduType::HelloP2P,
        LevelType::L2,
        system_id(2),
        30,
        HelloVariant::P2P {
            local_circuit_id: 1,
        },
        HelloTlvs {
            protocols_supported: Some(ProtocolsSupportedTlv {
                list: vec![NLPID_IPV4],
            }),
            area_addrs: AreaAddressesTlv {
                list: vec![AreaAddr::from([0x49, 0x00, 0x01].as_slice())],
            },
            ipv4_addrs: Ipv4AddressesTlv {
                list: vec![ip4!("10.0.0.2")],
            },
            p2p_adj_state: Some(P2pAdjStateTlv {
                state: P2pAdjState::Initializing,
                neighbor_system_id: Some(system_id(1)),
            }),
            ..Default::default()
        },
    ));
    test_roundtrip(&pdu);
}
