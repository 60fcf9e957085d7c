//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::{Neighbor, nsm};
use crate::network::{ALL_DR_RTRS, ALL_SPF_RTRS};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketHdr, PacketType,
};
use crate::tasks::messages::output::NetTxPacketMsg;

// Maximum number of LSA headers per Database Description packet.
pub const DBDESC_MAX_LSA_HDRS: usize = 64;
// Maximum number of entries per Link State Request packet.
pub const LSREQ_MAX_ENTRIES: usize = 60;

// ===== global functions =====

pub(crate) fn packet_hdr(
    pkt_type: PacketType,
    instance: &InstanceUpView<'_>,
) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: instance.router_id,
        area_id: instance.config.area_id,
    }
}

pub(crate) fn send_hello(
    iface: &Interface,
    nbrs: &BTreeMap<Ipv4Addr, Neighbor>,
    instance: &InstanceUpView<'_>,
) {
    let hdr = packet_hdr(PacketType::Hello, instance);
    let hello = Hello {
        hdr,
        network_mask: iface.config.addr.mask(),
        hello_interval: iface.config.hello_interval,
        options: Options::E,
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.state.dr,
        bdr: iface.state.bdr,
        neighbors: nbrs
            .values()
            .filter(|nbr| nbr.state >= nsm::State::Init)
            .map(|nbr| nbr.router_id)
            .collect(),
    };

    let dst = hello_dsts(iface);
    instance.statistics.tx_hello();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::Hello(hello),
        dst,
    });
}

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    // Once the exchange is underway, each packet drains the next window of
    // the database summary list. The packet is stored so duplicates and
    // retransmission timeouts resend the exact same instance.
    let mut lsa_hdrs = vec![];
    if !nbr.dd_flags.contains(DbDescFlags::I) {
        let keys = nbr
            .lists
            .db_summary
            .keys()
            .take(DBDESC_MAX_LSA_HDRS)
            .copied()
            .collect::<Vec<_>>();
        for key in keys {
            if let Some(lsa_hdr) = nbr.lists.db_summary.remove(&key) {
                lsa_hdrs.push(lsa_hdr);
            }
        }
    }

    let mut dd_flags = nbr.dd_flags;
    dd_flags.set(DbDescFlags::M, !nbr.lists.db_summary.is_empty());
    if dd_flags.contains(DbDescFlags::I) {
        // The initial packet always carries the M flag.
        dd_flags.insert(DbDescFlags::M);
    }

    let hdr = packet_hdr(PacketType::DbDesc, instance);
    let dbdesc = DbDesc {
        hdr,
        mtu: iface.config.mtu,
        options: Options::E,
        dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    };
    nbr.last_sent_dbdesc = Some(dbdesc.clone());

    instance.statistics.tx_dbdesc();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::DbDesc(dbdesc),
        dst: vec![nbr.src],
    });
}

// Retransmits the last sent Database Description packet.
pub(crate) fn rxmt_dbdesc(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    if let Some(dbdesc) = &nbr.last_sent_dbdesc {
        instance.statistics.tx_dbdesc();
        iface.enqueue_packet(NetTxPacketMsg {
            packet: Packet::DbDesc(dbdesc.clone()),
            dst: vec![nbr.src],
        });
    }
}

pub(crate) fn send_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    let entries = nbr
        .lists
        .ls_request
        .keys()
        .take(LSREQ_MAX_ENTRIES)
        .copied()
        .collect::<Vec<LsaKey>>();
    if entries.is_empty() {
        return;
    }

    let hdr = packet_hdr(PacketType::LsRequest, instance);
    instance.statistics.tx_lsreq();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::LsRequest(LsRequest { hdr, entries }),
        dst: vec![nbr.src],
    });
}

// Floods an LS Update out an interface.
pub(crate) fn send_lsupd(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    lsas: Vec<Lsa>,
) {
    if lsas.is_empty() {
        return;
    }

    let hdr = packet_hdr(PacketType::LsUpdate, instance);
    let dst = flood_dsts(iface);
    instance.statistics.tx_lsupd();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::LsUpdate(LsUpdate { hdr, lsas }),
        dst,
    });
}

// Sends an LS Update directly to one neighbor (requested LSAs,
// retransmissions and older-instance replies are always unicast).
pub(crate) fn send_lsupd_unicast(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    dst: Ipv4Addr,
    lsas: Vec<Lsa>,
) {
    if lsas.is_empty() {
        return;
    }

    let hdr = packet_hdr(PacketType::LsUpdate, instance);
    instance.statistics.tx_lsupd();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::LsUpdate(LsUpdate { hdr, lsas }),
        dst: vec![dst],
    });
}

pub(crate) fn send_lsack(
    iface: &Interface,
    instance: &InstanceUpView<'_>,
    dst: Ipv4Addr,
    lsa_hdrs: Vec<LsaHdr>,
) {
    if lsa_hdrs.is_empty() {
        return;
    }

    let hdr = packet_hdr(PacketType::LsAck, instance);
    instance.statistics.tx_lsack();
    iface.enqueue_packet(NetTxPacketMsg {
        packet: Packet::LsAck(LsAck { hdr, lsa_hdrs }),
        dst: vec![dst],
    });
}

// ===== helper functions =====

// Hello destinations: multicast by default, unicast for configured NBMA
// or point-to-multipoint peers.
fn hello_dsts(iface: &Interface) -> Vec<Ipv4Addr> {
    match iface.config.if_type {
        InterfaceType::Broadcast | InterfaceType::PointToPoint => {
            vec![ALL_SPF_RTRS]
        }
        InterfaceType::PointToMultipoint | InterfaceType::NonBroadcast => {
            match iface.config.unicast_peer {
                Some(peer) => vec![peer],
                None => vec![ALL_SPF_RTRS],
            }
        }
    }
}

// Flooding destinations (RFC 2328, Section 13.3): DR and Backup flood to
// AllSPFRouters, other routers send to AllDRouters.
fn flood_dsts(iface: &Interface) -> Vec<Ipv4Addr> {
    match iface.config.if_type {
        InterfaceType::PointToPoint => vec![ALL_SPF_RTRS],
        InterfaceType::Broadcast => match iface.state.ism_state {
            ism::State::Dr | ism::State::Backup => vec![ALL_SPF_RTRS],
            _ => vec![ALL_DR_RTRS],
        },
        InterfaceType::PointToMultipoint | InterfaceType::NonBroadcast => {
            match iface.config.unicast_peer {
                Some(peer) => vec![peer],
                None => vec![ALL_SPF_RTRS],
            }
        }
    }
}
