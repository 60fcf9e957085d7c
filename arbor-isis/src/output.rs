//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::adjacency::AdjacencyState;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType};
use crate::lsdb::Lsdb;
use crate::network::MulticastAddr;
use crate::packet::consts::{NLPID_IPV4, PduType};
use crate::packet::pdu::{
    Hello, HelloTlvs, HelloVariant, Lsp, Pdu, Snp, SnpTlvs,
};
use crate::packet::tlv::{
    AreaAddressesTlv, Ipv4AddressesTlv, LspEntriesTlv, LspEntry,
    NeighborsTlv, P2pAdjState, P2pAdjStateTlv, ProtocolsSupportedTlv,
};
use crate::packet::{LanId, LevelNumber, LspId, SystemId};

// ===== global functions =====

pub(crate) fn send_hello(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
) {
    let system_id = instance.config.system_id;
    let holdtime =
        iface.config.hello_interval * iface.config.hello_multiplier;

    let mut tlvs = HelloTlvs {
        protocols_supported: Some(ProtocolsSupportedTlv {
            list: vec![NLPID_IPV4],
        }),
        area_addrs: AreaAddressesTlv {
            list: instance.config.area_addrs.clone(),
        },
        ipv4_addrs: Ipv4AddressesTlv {
            list: vec![iface.config.addr.ip()],
        },
        ..Default::default()
    };

    let (pdu_type, variant) = match iface.config.circuit_type {
        InterfaceType::Broadcast => {
            // List the SNPAs of all neighbors heard on this LAN for the
            // three-way handshake.
            tlvs.neighbors = NeighborsTlv {
                list: iface
                    .state
                    .adjacencies
                    .values()
                    .filter(|adj| adj.level_usage.intersects(level))
                    .map(|adj| adj.snpa)
                    .collect(),
            };

            let pdu_type = match level {
                LevelNumber::L1 => PduType::HelloLanL1,
                LevelNumber::L2 => PduType::HelloLanL2,
            };
            let lan_id = match iface.state.dis.get(level) {
                Some(dis) => *dis,
                None => LanId::from((system_id, iface.state.circuit_id)),
            };
            (
                pdu_type,
                HelloVariant::Lan {
                    priority: iface.config.priority,
                    lan_id,
                },
            )
        }
        InterfaceType::PointToPoint => {
            // RFC 5303 three-way handshake: report the neighbor we see, if
            // any.
            let adj = iface.state.adjacencies.values().next();
            tlvs.p2p_adj_state = Some(P2pAdjStateTlv {
                state: match adj.map(|adj| adj.state) {
                    Some(AdjacencyState::Up) => P2pAdjState::Up,
                    Some(_) => P2pAdjState::Initializing,
                    None => P2pAdjState::Down,
                },
                neighbor_system_id: adj.map(|adj| adj.system_id),
            });

            (
                PduType::HelloP2P,
                HelloVariant::P2P {
                    local_circuit_id: iface.state.circuit_id,
                },
            )
        }
    };

    let hello = Hello::new(
        pdu_type,
        instance.config.level_type,
        system_id,
        holdtime,
        variant,
        tlvs,
    );

    instance.statistics.tx_hello();
    iface.enqueue_pdu(crate::tasks::messages::output::NetTxPduMsg {
        pdu: Pdu::Hello(hello),
        dst: level.into(),
    });
}

// Sends an LSP out an interface.
pub(crate) fn send_lsp(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsp: &Lsp,
) {
    instance.statistics.tx_lsp();
    iface.enqueue_pdu(crate::tasks::messages::output::NetTxPduMsg {
        pdu: Pdu::Lsp(lsp.clone()),
        dst: level.into(),
    });
}

// Sends a complete CSNP describing the entire database for one level.
pub(crate) fn send_csnp(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    lsdb: &Lsdb,
    level: LevelNumber,
) {
    let source = LanId::from((instance.config.system_id, 0));
    let first = LspId::from((SystemId::from([0; 6]), 0, 0));
    let last = LspId::from((SystemId::from([0xff; 6]), 0xff, 0xff));

    let entries = lsdb
        .iter()
        .map(|(_, lse)| LspEntry::from(&*lse.data))
        .collect::<Vec<_>>();

    // Split the summary into as many PDUs as needed, adjusting the
    // start/end LSP ID ranges so the receiver can detect gaps.
    let mut chunks = entries
        .chunks(LspEntriesTlv::MAX_ENTRIES.max(1))
        .peekable();
    let mut start = first;
    loop {
        let Some(chunk) = chunks.next() else {
            // An empty database is still described by one CSNP.
            let snp = Snp::new(
                level,
                true,
                source,
                Some((first, last)),
                SnpTlvs::default(),
            );
            instance.statistics.tx_snp();
            iface.enqueue_pdu(crate::tasks::messages::output::NetTxPduMsg {
                pdu: Pdu::Snp(snp),
                dst: level.into(),
            });
            break;
        };

        let end = match chunks.peek() {
            Some(next) => next[0].lsp_id,
            None => last,
        };
        let snp = Snp::new(
            level,
            true,
            source,
            Some((start, end)),
            SnpTlvs {
                lsp_entries: LspEntriesTlv {
                    list: chunk.to_vec(),
                },
                unknown: vec![],
            },
        );
        instance.statistics.tx_snp();
        iface.enqueue_pdu(crate::tasks::messages::output::NetTxPduMsg {
            pdu: Pdu::Snp(snp),
            dst: level.into(),
        });

        if chunks.peek().is_none() {
            break;
        }
        start = end;
    }
}

// Sends a PSNP carrying the given LSP entries (requests or
// acknowledgments).
pub(crate) fn send_psnp(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    entries: Vec<LspEntry>,
) {
    if entries.is_empty() {
        return;
    }

    let source = LanId::from((instance.config.system_id, 0));
    let snp = Snp::new(
        level,
        false,
        source,
        None,
        SnpTlvs {
            lsp_entries: LspEntriesTlv { list: entries },
            unknown: vec![],
        },
    );
    instance.statistics.tx_snp();
    iface.enqueue_pdu(crate::tasks::messages::output::NetTxPduMsg {
        pdu: Pdu::Snp(snp),
        dst: level.into(),
    });
}
