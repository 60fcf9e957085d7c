//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use ipnetwork::Ipv4Network;

use crate::adjacency::{Adjacency, AdjacencyEvent, AdjacencyState};
use crate::debug::Debug;
use crate::error::{AdjacencyRejectError, Error};
use crate::flooding;
use crate::instance::InstanceUpView;
use crate::interface::{InterfaceType, Interfaces};
use crate::lsdb::{self, Lsdb, lsp_compare};
use crate::packet::pdu::{Hello, HelloVariant, Lsp, Pdu, Snp};
use crate::packet::{LevelNumber, LevelType, Levels};
use crate::tasks::messages::input::NetRxPduMsg;

// ===== Network PDU receipt =====

pub(crate) fn process_pdu(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    lsdb: &mut Levels<Lsdb>,
    redistributed: &BTreeMap<Ipv4Network, u32>,
    msg: NetRxPduMsg,
) -> Result<(), Error> {
    let NetRxPduMsg { ifname, src, pdu } = msg;

    if !interfaces.contains_key(&ifname) {
        return Err(Error::InterfaceNotFound(ifname));
    }

    // Drop malformed PDUs.
    let pdu = match pdu {
        Ok(pdu) => pdu,
        Err(error) => {
            instance.statistics.rx_errors();
            return Err(Error::PduDecodeError(error));
        }
    };

    {
        let iface = &interfaces[&ifname];
        Debug::PduRx(&iface.name, &pdu).log();

        // Frames looped back from this interface are dropped.
        if src == iface.config.snpa {
            instance.statistics.rx_errors();
            return Ok(());
        }
    }

    match pdu {
        Pdu::Hello(hello) => {
            instance.statistics.rx_hello();
            process_hello(instance, interfaces, lsdb, &ifname, src, hello)
        }
        Pdu::Lsp(lsp) => {
            instance.statistics.rx_lsp();
            process_lsp(
                instance,
                interfaces,
                lsdb,
                redistributed,
                &ifname,
                lsp,
            )
        }
        Pdu::Snp(snp) => {
            instance.statistics.rx_snp();
            process_snp(instance, interfaces, lsdb, &ifname, snp)
        }
    }
}

// ===== Hello PDUs =====

fn process_hello(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    lsdb: &mut Levels<Lsdb>,
    ifname: &str,
    src: [u8; 6],
    hello: Hello,
) -> Result<(), Error> {
    let iface = interfaces.get_mut(ifname).unwrap();

    // A hello carrying our own system-id indicates a duplicate system-id
    // on the network.
    if hello.source == instance.config.system_id {
        instance.statistics.rx_errors();
        return Err(Error::OwnSystemId(hello.source));
    }

    // The hello variant must match the circuit type.
    let broadcast = matches!(hello.variant, HelloVariant::Lan { .. });
    if broadcast != (iface.config.circuit_type == InterfaceType::Broadcast) {
        return Err(Error::CircuitTypeMismatch);
    }

    // Level compatibility: the usable levels are the intersection of both
    // routers' configurations on this circuit.
    let level_usage = match instance
        .config
        .level_type
        .intersection(iface.config.level_type)
        .and_then(|level| level.intersection(hello.circuit_type))
    {
        Some(level_usage) => level_usage,
        None => {
            return Err(Error::AdjacencyReject(
                hello.source,
                AdjacencyRejectError::CircuitTypeMismatch,
            ));
        }
    };

    // An L1 adjacency requires a common area address; any system-id
    // difference is acceptable.
    if level_usage.intersects(LevelType::L1) {
        let area_match = hello
            .tlvs
            .area_addrs
            .list
            .iter()
            .any(|area| instance.config.area_addrs.contains(area));
        if !area_match && level_usage == LevelType::L1 {
            return Err(Error::AdjacencyReject(
                hello.source,
                AdjacencyRejectError::AreaMismatch,
            ));
        }
    }

    // Look up or create the adjacency.
    let adj = iface
        .state
        .adjacencies
        .entry(hello.source)
        .or_insert_with(|| {
            Adjacency::new(src, hello.source, hello.circuit_type, level_usage)
        });
    adj.snpa = src;
    adj.level_usage = level_usage;
    adj.area_addrs = hello.tlvs.area_addrs.list.iter().cloned().collect();
    adj.ipv4_addrs = hello.tlvs.ipv4_addrs.list.iter().copied().collect();
    adj.neighbors = hello.tlvs.neighbors.list.iter().copied().collect();
    if let HelloVariant::Lan { priority, lan_id } = hello.variant {
        adj.priority = Some(priority);
        adj.lan_id = Some(lan_id);
    }
    adj.holdtimer_reset(ifname, instance, hello.holdtime);

    // Adjacency state progression.
    let old_state = adj.state;
    match hello.variant {
        HelloVariant::Lan { .. } => {
            // Three-way handshake: our SNPA must appear in the neighbor's
            // hello before the adjacency comes up.
            if adj.neighbors.contains(&iface.config.snpa) {
                adj.state_change(
                    instance,
                    AdjacencyEvent::HelloTwoWayRcvd,
                    AdjacencyState::Up,
                );
            } else {
                adj.state_change(
                    instance,
                    AdjacencyEvent::HelloOneWayRcvd,
                    AdjacencyState::Initializing,
                );
            }
        }
        HelloVariant::P2P { .. } => {
            // RFC 5303 three-way handshake when the TLV is present; a
            // single exchange suffices otherwise.
            let up = match &hello.tlvs.p2p_adj_state {
                Some(tlv) => {
                    tlv.neighbor_system_id
                        == Some(instance.config.system_id)
                        || tlv.state
                            != crate::packet::tlv::P2pAdjState::Down
                }
                None => true,
            };
            if up {
                adj.state_change(
                    instance,
                    AdjacencyEvent::HelloTwoWayRcvd,
                    AdjacencyState::Up,
                );
            } else {
                adj.state_change(
                    instance,
                    AdjacencyEvent::HelloOneWayRcvd,
                    AdjacencyState::Initializing,
                );
            }
        }
    }
    let new_state = adj.state;

    if old_state != new_state {
        match iface.config.circuit_type {
            InterfaceType::Broadcast => {
                // The set of Up adjacencies changed: rerun the DIS
                // election for the affected levels.
                for level in level_usage.levels() {
                    iface.dis_election(instance, level);
                }
            }
            InterfaceType::PointToPoint => {
                if new_state == AdjacencyState::Up {
                    // Set SRM for the entire database so the new neighbor
                    // synchronizes (ISO 10589, Section 7.3.17).
                    for level in level_usage.levels() {
                        let iface_lsdb = lsdb.get(level);
                        let srm = iface.state.srm_list.get_mut(level);
                        for (lsp_id, lse) in iface_lsdb.iter() {
                            srm.insert(*lsp_id, lse.data.clone());
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

// ===== Link State PDUs =====

fn process_lsp(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    lsdb: &mut Levels<Lsdb>,
    redistributed: &BTreeMap<Ipv4Network, u32>,
    ifname: &str,
    lsp: Lsp,
) -> Result<(), Error> {
    let level = lsp.level();
    let lsp = Arc::new(lsp);

    {
        // LSPs are only accepted over an existing adjacency.
        let iface = interfaces.get_mut(ifname).unwrap();
        if !iface
            .state
            .adjacencies
            .values()
            .any(|adj| adj.state == AdjacencyState::Up)
        {
            return Ok(());
        }
    }

    // A newer instance of one of our own LSPs is circulating: install it
    // and reoriginate with a higher sequence number.
    if lsp.lsp_id.system_id == instance.config.system_id {
        let level_lsdb = lsdb.get_mut(level);
        let own_newer = match level_lsdb.get(&lsp.lsp_id) {
            Some(lse) => lsp_compare(&lsp, &lse.data) == Ordering::Greater,
            None => lsp.rem_lifetime() != 0,
        };
        if own_newer {
            level_lsdb.install(level, lsp.clone());
            lsdb::originate(
                instance,
                level,
                level_lsdb,
                interfaces,
                redistributed,
            );
        }
        return Ok(());
    }

    let level_lsdb = lsdb.get_mut(level);
    let cmp = match level_lsdb.get(&lsp.lsp_id) {
        Some(lse) => lsp_compare(&lsp, &lse.data),
        None => Ordering::Greater,
    };

    match cmp {
        Ordering::Greater => {
            // Expired LSPs are purged from the database once reflooded.
            if lsp.rem_lifetime() == 0 {
                level_lsdb.remove(&lsp.lsp_id);
                flooding::flood(
                    instance,
                    interfaces,
                    level,
                    &lsp,
                    Some(ifname),
                );
            } else {
                level_lsdb.install(level, lsp.clone());
                flooding::flood(
                    instance,
                    interfaces,
                    level,
                    &lsp,
                    Some(ifname),
                );
            }
            instance.tx.protocol_input.spf_schedule(level);

            // Acknowledge on point-to-point circuits.
            let iface = interfaces.get_mut(ifname).unwrap();
            if iface.config.circuit_type == InterfaceType::PointToPoint {
                flooding::ack_lsp(iface, level, &lsp);
            }
        }
        Ordering::Equal => {
            // Same instance: clear any pending flood back to the sender
            // and acknowledge on point-to-point circuits.
            let iface = interfaces.get_mut(ifname).unwrap();
            iface.state.srm_list.get_mut(level).remove(&lsp.lsp_id);
            if iface.config.circuit_type == InterfaceType::PointToPoint {
                flooding::ack_lsp(iface, level, &lsp);
            }
        }
        Ordering::Less => {
            // We have a newer instance: send it back to the sender.
            let iface = interfaces.get_mut(ifname).unwrap();
            if let Some(lse) = lsdb.get(level).get(&lsp.lsp_id) {
                iface
                    .state
                    .srm_list
                    .get_mut(level)
                    .insert(lsp.lsp_id, lse.data.clone());
                flooding::srm_drain(instance, iface, level);
            }
        }
    }

    Ok(())
}

// ===== Sequence Number PDUs =====

fn process_snp(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    lsdb: &mut Levels<Lsdb>,
    ifname: &str,
    snp: Snp,
) -> Result<(), Error> {
    let level = snp.level();
    let iface = interfaces.get_mut(ifname).unwrap();
    let level_lsdb = lsdb.get(level);

    if snp.is_csnp() {
        flooding::process_csnp(iface, level_lsdb, level, &snp);
    } else {
        flooding::process_psnp(iface, level_lsdb, level, &snp);
    }

    // React promptly instead of waiting for the next scan interval.
    flooding::srm_drain(instance, iface, level);
    flooding::ssn_drain(instance, iface, level);

    Ok(())
}

// ===== Adjacency holdtime expiry =====

pub(crate) fn process_adj_holdtimer(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
    system_id: crate::packet::SystemId,
) {
    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    let Some(mut adj) = iface.state.adjacencies.remove(&system_id) else {
        return;
    };

    adj.state_change(
        instance,
        AdjacencyEvent::HoldtimeExpired,
        AdjacencyState::Down,
    );

    // The DIS may have been lost.
    if iface.config.circuit_type == InterfaceType::Broadcast {
        for level in adj.level_usage.levels() {
            iface.dis_election(instance, level);
        }
    }
}

// ===== SRM/SSN scan =====

pub(crate) fn process_srm_interval(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
) {
    if let Some(iface) = interfaces.get_mut(ifname) {
        flooding::srm_scan(instance, iface);
    }
}

// ===== CSNP transmission =====

pub(crate) fn process_csnp_interval(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    lsdb: &Levels<Lsdb>,
    ifname: &str,
    level: LevelNumber,
) {
    if let Some(iface) = interfaces.get_mut(ifname) {
        iface.send_csnp(instance, lsdb.get(level), level);
    }
}
