//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::debug::Debug;
use crate::error::{Error, InterfaceCfgError};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{self, Lsdb, Neighbors};
use crate::neighbor::{Neighbor, RxmtPacketType, nsm};
use crate::output;
use crate::packet::lsa::{LSA_MAX_SEQ_NO, Lsa, LsaType, lsa_compare};
use crate::packet::{DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Packet};
use crate::tasks::messages::input::{NetRxPacketMsg, RxmtIntervalMsg};

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsdb: &mut Lsdb,
    msg: NetRxPacketMsg,
) -> Result<(), Error> {
    let NetRxPacketMsg {
        ifname,
        src,
        dst: _dst,
        dscp: _dscp,
        packet,
    } = msg;

    if !interfaces.contains_key(&ifname) {
        return Err(Error::InterfaceNotFound(ifname));
    }

    // Drop malformed packets.
    let packet = match packet {
        Ok(packet) => packet,
        Err(error) => {
            instance.statistics.rx_errors();
            return Err(Error::PacketDecodeError(error));
        }
    };

    {
        let iface = &interfaces[&ifname];

        // A packet whose source address matches the local address on this
        // interface is our own transmission looped back.
        if src == iface.src_addr() {
            instance.statistics.rx_errors();
            return Err(Error::InvalidSrcAddr(src));
        }

        // A packet advertising our own router-id indicates a duplicate
        // router-id somewhere on the network.
        if packet.hdr().router_id == instance.router_id {
            instance.statistics.rx_errors();
            return Err(Error::DuplicateRouterId(
                packet.hdr().router_id,
                src,
            ));
        }

        // Check the area-id.
        if packet.hdr().area_id != instance.config.area_id {
            instance.statistics.rx_errors();
            return Err(Error::InterfaceCfgError(
                ifname,
                src,
                packet.hdr().pkt_type,
                InterfaceCfgError::AreaIdMismatch(
                    instance.config.area_id,
                    packet.hdr().area_id,
                ),
            ));
        }

        Debug::PacketRx(&iface.name, &src, &packet).log();
    }

    match packet {
        Packet::Hello(hello) => {
            instance.statistics.rx_hello();
            process_hello(instance, interfaces, neighbors, lsdb, &ifname, src, hello)
        }
        Packet::DbDesc(dbdesc) => {
            instance.statistics.rx_dbdesc();
            process_dbdesc(instance, interfaces, neighbors, lsdb, &ifname, src, dbdesc)
        }
        Packet::LsRequest(lsreq) => {
            instance.statistics.rx_lsreq();
            process_lsreq(instance, interfaces, neighbors, lsdb, &ifname, src, lsreq)
        }
        Packet::LsUpdate(lsu) => {
            instance.statistics.rx_lsupd();
            process_lsupd(instance, interfaces, neighbors, lsdb, &ifname, src, lsu)
        }
        Packet::LsAck(lsack) => {
            instance.statistics.rx_lsack();
            process_lsack(instance, interfaces, neighbors, &ifname, src, lsack)
        }
    }
}

// ===== Hello packets =====

fn process_hello(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsdb: &mut Lsdb,
    ifname: &str,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error> {
    let iface = interfaces.get_mut(ifname).unwrap();
    let iface_nbrs = neighbors.entry(ifname.to_owned()).or_default();
    let router_id = hello.hdr.router_id;

    // Validate interface parameters.
    if hello.hello_interval != iface.config.hello_interval {
        return Err(Error::InterfaceCfgError(
            ifname.to_owned(),
            src,
            hello.hdr.pkt_type,
            InterfaceCfgError::HelloIntervalMismatch(
                iface.config.hello_interval,
                hello.hello_interval,
            ),
        ));
    }
    if hello.dead_interval != iface.config.dead_interval {
        return Err(Error::InterfaceCfgError(
            ifname.to_owned(),
            src,
            hello.hdr.pkt_type,
            InterfaceCfgError::DeadIntervalMismatch(
                iface.config.dead_interval,
                hello.dead_interval,
            ),
        ));
    }
    // The network mask is only checked on multi-access networks.
    if iface.config.if_type == InterfaceType::Broadcast
        && hello.network_mask != iface.config.addr.mask()
    {
        return Err(Error::InterfaceCfgError(
            ifname.to_owned(),
            src,
            hello.hdr.pkt_type,
            InterfaceCfgError::HelloMaskMismatch(
                iface.config.addr.mask(),
                hello.network_mask,
            ),
        ));
    }

    // Look up or create the neighbor.
    let nbr = iface_nbrs
        .entry(router_id)
        .or_insert_with(|| Neighbor::new(router_id, src));
    nbr.src = src;

    // Keep track of neighbor attributes that influence the DR election.
    let old_priority = nbr.priority;
    let old_dr = nbr.dr;
    let old_bdr = nbr.bdr;
    nbr.priority = hello.priority;
    nbr.dr = hello.dr;
    nbr.bdr = hello.bdr;

    nbr.fsm(iface, instance, lsdb, nsm::Event::HelloRcvd);

    // Check for bidirectional communication.
    if hello.neighbors.contains(&instance.router_id) {
        nbr.fsm(iface, instance, lsdb, nsm::Event::TwoWayRcvd);
    } else {
        nbr.fsm(iface, instance, lsdb, nsm::Event::OneWayRcvd);
    }
    let nbr_state = nbr.state;

    if iface.is_broadcast_or_nbma() && nbr_state >= nsm::State::TwoWay {
        // BackupSeen: the neighbor declares itself BDR, or DR with no BDR.
        if iface.state.ism_state == ism::State::Waiting
            && (hello.bdr == Some(src)
                || (hello.dr == Some(src) && hello.bdr.is_none()))
        {
            instance
                .tx
                .protocol_input
                .ism_event(ifname, ism::Event::BackupSeen);
        }
        // NeighborChange: a change in the advertised priority or DR/BDR
        // claims requires a new election.
        else if old_priority != hello.priority
            || old_dr.map(|a| a == src) != hello.dr.map(|a| a == src)
            || old_bdr.map(|a| a == src) != hello.bdr.map(|a| a == src)
        {
            instance
                .tx
                .protocol_input
                .ism_event(ifname, ism::Event::NbrChange);
        }
    }

    Ok(())
}

// ===== Database Description packets =====

fn process_dbdesc(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsdb: &mut Lsdb,
    ifname: &str,
    src: Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    let iface = interfaces.get_mut(ifname).unwrap();
    let iface_nbrs = neighbors.get_mut(ifname).ok_or_else(|| {
        Error::UnknownNeighbor(src, dbdesc.hdr.router_id)
    })?;
    let router_id = dbdesc.hdr.router_id;
    let nbr = iface_nbrs
        .get_mut(&router_id)
        .ok_or(Error::UnknownNeighbor(src, router_id))?;

    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(router_id, nbr.state));
        }
        nsm::State::Init => {
            nbr.fsm(iface, instance, lsdb, nsm::Event::TwoWayRcvd);
            if nbr.state != nsm::State::ExStart {
                return Ok(());
            }
            // Fall through and process the packet in the ExStart state.
            process_dbdesc_exstart(nbr, iface, instance, lsdb, dbdesc);
        }
        nsm::State::ExStart => {
            process_dbdesc_exstart(nbr, iface, instance, lsdb, dbdesc);
        }
        nsm::State::Exchange => {
            process_dbdesc_exchange(nbr, iface, instance, lsdb, dbdesc);
        }
        nsm::State::Loading | nsm::State::Full => {
            // Duplicates are retransmission triggers for the slave and
            // ignored by the master; anything else restarts the exchange.
            if nbr.dbdesc_is_dup(&dbdesc) {
                if !nbr.master {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
            } else {
                nbr.fsm(iface, instance, lsdb, nsm::Event::SeqNoMismatch);
            }
        }
    }

    Ok(())
}

// Master/slave negotiation (RFC 2328, Section 10.8).
fn process_dbdesc_exstart(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    dbdesc: DbDesc,
) {
    let all_negotiation_flags =
        DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;

    if dbdesc.dd_flags.contains(all_negotiation_flags)
        && dbdesc.lsa_hdrs.is_empty()
        && dbdesc.hdr.router_id > instance.router_id
    {
        // The neighbor is the master: adopt its sequence number.
        nbr.master = false;
        nbr.dd_flags.remove(DbDescFlags::I | DbDescFlags::MS);
        nbr.dd_seq_no = dbdesc.dd_seq_no;
        nbr.rxmt_dbdesc_stop();
        nbr.last_rcvd_dbdesc = Some(crate::neighbor::LastDbDesc {
            options: dbdesc.options,
            dd_flags: dbdesc.dd_flags,
            dd_seq_no: dbdesc.dd_seq_no,
        });
        nbr.fsm(iface, instance, lsdb, nsm::Event::NegotiationDone);
        // Echo the master's sequence number with the first window of our
        // database summary.
        output::send_dbdesc(nbr, iface, instance);
    } else if !dbdesc.dd_flags.contains(DbDescFlags::I)
        && !dbdesc.dd_flags.contains(DbDescFlags::MS)
        && dbdesc.dd_seq_no == nbr.dd_seq_no
        && dbdesc.hdr.router_id < instance.router_id
    {
        // We are the master and the neighbor acknowledged our initial
        // packet.
        nbr.master = true;
        nbr.dd_flags.remove(DbDescFlags::I);
        nbr.rxmt_dbdesc_stop();
        nbr.fsm(iface, instance, lsdb, nsm::Event::NegotiationDone);
        dbdesc_process_lsa_hdrs(nbr, instance, lsdb, &dbdesc);
        nbr.last_rcvd_dbdesc = Some(crate::neighbor::LastDbDesc {
            options: dbdesc.options,
            dd_flags: dbdesc.dd_flags,
            dd_seq_no: dbdesc.dd_seq_no,
        });
        dbdesc_exchange_advance(nbr, iface, instance, lsdb, &dbdesc);
    }
    // Otherwise the packet is ignored.
}

fn process_dbdesc_exchange(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    dbdesc: DbDesc,
) {
    // Duplicate packets: the slave retransmits its last packet, the master
    // discards.
    if nbr.dbdesc_is_dup(&dbdesc) {
        if !nbr.master {
            output::rxmt_dbdesc(nbr, iface, instance);
        }
        return;
    }

    // Consistency checks: unexpected master/slave claim or initialization
    // bit restarts the exchange.
    if dbdesc.dd_flags.contains(DbDescFlags::MS) != (!nbr.master)
        || dbdesc.dd_flags.contains(DbDescFlags::I)
    {
        nbr.fsm(iface, instance, lsdb, nsm::Event::SeqNoMismatch);
        return;
    }

    // Sequence number check: the master expects its own sequence number
    // echoed back, the slave expects the next one.
    let expected = match nbr.master {
        true => nbr.dd_seq_no,
        false => nbr.dd_seq_no + 1,
    };
    if dbdesc.dd_seq_no != expected {
        nbr.fsm(iface, instance, lsdb, nsm::Event::SeqNoMismatch);
        return;
    }

    dbdesc_process_lsa_hdrs(nbr, instance, lsdb, &dbdesc);
    nbr.last_rcvd_dbdesc = Some(crate::neighbor::LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });
    dbdesc_exchange_advance(nbr, iface, instance, lsdb, &dbdesc);
}

// Records the LSA headers the neighbor advertised with instances newer
// than ours in the link state request list.
fn dbdesc_process_lsa_hdrs(
    nbr: &mut Neighbor,
    _instance: &InstanceUpView<'_>,
    lsdb: &Lsdb,
    dbdesc: &DbDesc,
) {
    for lsa_hdr in &dbdesc.lsa_hdrs {
        let key = lsa_hdr.key();
        let newer = match lsdb.get(&key) {
            Some(lse) => {
                lsa_compare(lsa_hdr, &lse.data.hdr) == Ordering::Greater
            }
            None => true,
        };
        if newer {
            nbr.lists.ls_request.insert(key, *lsa_hdr);
        }
    }
}

// Advances the database exchange after a valid packet.
fn dbdesc_exchange_advance(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    dbdesc: &DbDesc,
) {
    let rcvd_more = dbdesc.dd_flags.contains(DbDescFlags::M);

    if nbr.master {
        nbr.dd_seq_no += 1;
        let sent_more = !nbr.lists.db_summary.is_empty();
        if !rcvd_more && !sent_more {
            nbr.fsm(iface, instance, lsdb, nsm::Event::ExchangeDone);
        } else {
            output::send_dbdesc(nbr, iface, instance);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;
        output::send_dbdesc(nbr, iface, instance);
        let sent_more = nbr
            .last_sent_dbdesc
            .as_ref()
            .is_some_and(|sent| sent.dd_flags.contains(DbDescFlags::M));
        if !rcvd_more && !sent_more {
            nbr.fsm(iface, instance, lsdb, nsm::Event::ExchangeDone);
        }
    }
}

// ===== Link State Request packets =====

fn process_lsreq(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsdb: &mut Lsdb,
    ifname: &str,
    src: Ipv4Addr,
    lsreq: LsRequest,
) -> Result<(), Error> {
    let iface = interfaces.get_mut(ifname).unwrap();
    let router_id = lsreq.hdr.router_id;
    let nbr = neighbors
        .get_mut(ifname)
        .and_then(|iface_nbrs| iface_nbrs.get_mut(&router_id))
        .ok_or(Error::UnknownNeighbor(src, router_id))?;

    if nbr.state < nsm::State::Exchange {
        return Ok(());
    }

    let mut lsas = vec![];
    for key in &lsreq.entries {
        match lsdb.get(key) {
            Some(lse) => lsas.push((*lse.data).clone()),
            None => {
                // Requesting an LSA we don't have restarts the exchange.
                nbr.fsm(iface, instance, lsdb, nsm::Event::BadLsReq);
                return Ok(());
            }
        }
    }
    output::send_lsupd_unicast(iface, instance, nbr.src, lsas);

    Ok(())
}

// ===== Link State Update packets =====

fn process_lsupd(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsdb: &mut Lsdb,
    ifname: &str,
    src: Ipv4Addr,
    lsu: LsUpdate,
) -> Result<(), Error> {
    let router_id = lsu.hdr.router_id;
    {
        let nbr = neighbors
            .get(ifname)
            .and_then(|iface_nbrs| iface_nbrs.get(&router_id))
            .ok_or(Error::UnknownNeighbor(src, router_id))?;
        if nbr.state < nsm::State::Exchange {
            return Ok(());
        }
    }

    let mut direct_acks = vec![];

    for lsa in lsu.lsas {
        // Validate the LSA checksum, age and sequence number.
        if let Err(error) = lsa.validate() {
            instance.statistics.rx_errors();
            Error::PacketDecodeError(error).log();
            continue;
        }

        let key = lsa.hdr.key();
        let lsa = Arc::new(lsa);

        // An LSA fulfilling an outstanding request is removed from the
        // request list.
        {
            let iface = interfaces.get_mut(ifname).unwrap();
            let nbr = neighbors
                .get_mut(ifname)
                .and_then(|iface_nbrs| iface_nbrs.get_mut(&router_id))
                .unwrap();
            if let Some(req) = nbr.lists.ls_request.get(&key)
                && lsa_compare(&lsa.hdr, req) != Ordering::Less
            {
                nbr.lists.ls_request.remove(&key);
                nbr.loading_done_check(iface, instance);
            }
        }

        let db_copy = lsdb.get(&key).map(|lse| lse.data.clone());
        let cmp = match &db_copy {
            Some(db_copy) => lsa_compare(&lsa.hdr, &db_copy.hdr),
            None => Ordering::Greater,
        };
        match cmp {
            Ordering::Greater => {
                // A newer instance of one of our own LSAs is circulating:
                // install it so the next origination supersedes it.
                if lsa.hdr.adv_rtr == instance.router_id {
                    lsdb.install(lsa.clone());
                    match lsa.hdr.lsa_type {
                        LsaType::Router | LsaType::Network => {
                            instance.tx.protocol_input.lsa_orig_event(
                                lsdb::LsaOriginateEvent::NeighborToFromFull {
                                    ifname: ifname.to_owned(),
                                },
                            );
                        }
                        _ => {
                            // A stale advertisement we no longer make.
                            lsdb::flush_self_originated(
                                instance, lsdb, interfaces, neighbors, key,
                            );
                        }
                    }
                    continue;
                }

                // Install and flood the new instance, excluding the
                // receiving neighbor.
                lsdb::install_and_flood(
                    instance,
                    lsdb,
                    interfaces,
                    neighbors,
                    lsa.clone(),
                    Some((ifname, router_id)),
                );
                direct_acks.push(lsa.hdr);
            }
            Ordering::Equal => {
                let nbr = neighbors
                    .get_mut(ifname)
                    .and_then(|iface_nbrs| iface_nbrs.get_mut(&router_id))
                    .unwrap();
                if nbr.lists.ls_rxmt.remove(&key).is_some() {
                    // Implied acknowledgment.
                    nbr.rxmt_lsupd_stop_check();
                } else {
                    direct_acks.push(lsa.hdr);
                }
            }
            Ordering::Less => {
                // Our copy is newer: send it back to the neighbor.
                let iface = interfaces.get_mut(ifname).unwrap();
                if let Some(db_copy) = db_copy
                    && db_copy.hdr.seq_no != LSA_MAX_SEQ_NO
                {
                    output::send_lsupd_unicast(
                        iface,
                        instance,
                        src,
                        vec![(*db_copy).clone()],
                    );
                }
            }
        }
    }

    // Send the accumulated direct acknowledgments.
    let iface = interfaces.get_mut(ifname).unwrap();
    output::send_lsack(iface, instance, src, direct_acks);

    Ok(())
}

// ===== Link State Ack packets =====

fn process_lsack(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    ifname: &str,
    src: Ipv4Addr,
    lsack: LsAck,
) -> Result<(), Error> {
    let _ = instance;
    let _ = interfaces;
    let router_id = lsack.hdr.router_id;
    let nbr = neighbors
        .get_mut(ifname)
        .and_then(|iface_nbrs| iface_nbrs.get_mut(&router_id))
        .ok_or(Error::UnknownNeighbor(src, router_id))?;

    if nbr.state < nsm::State::Exchange {
        return Ok(());
    }

    for lsa_hdr in &lsack.lsa_hdrs {
        let key = lsa_hdr.key();
        if let Some(rxmt) = nbr.lists.ls_rxmt.get(&key)
            && lsa_compare(lsa_hdr, &rxmt.hdr) == Ordering::Equal
        {
            nbr.lists.ls_rxmt.remove(&key);
        }
    }
    nbr.rxmt_lsupd_stop_check();

    Ok(())
}

// ===== Retransmission intervals =====

pub(crate) fn process_rxmt_interval(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    msg: RxmtIntervalMsg,
) {
    let Some(iface) = interfaces.get_mut(&msg.ifname) else {
        return;
    };
    let Some(nbr) = neighbors
        .get_mut(&msg.ifname)
        .and_then(|iface_nbrs| iface_nbrs.get_mut(&msg.router_id))
    else {
        return;
    };

    match msg.packet_type {
        RxmtPacketType::DbDesc => {
            output::rxmt_dbdesc(nbr, iface, instance);
        }
        RxmtPacketType::LsRequest => {
            output::send_lsreq(nbr, iface, instance);
        }
        RxmtPacketType::LsUpdate => {
            let lsas = nbr
                .lists
                .ls_rxmt
                .values()
                .take(20)
                .map(|lsa| (**lsa).clone())
                .collect::<Vec<Lsa>>();
            output::send_lsupd_unicast(iface, instance, nbr.src, lsas);
        }
    }
}
