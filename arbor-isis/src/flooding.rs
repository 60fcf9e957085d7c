//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::sync::Arc;

use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, Interfaces};
use crate::lsdb::Lsdb;
use crate::output;
use crate::packet::pdu::{Lsp, Snp};
use crate::packet::tlv::LspEntry;
use crate::packet::{LevelNumber, LspId};

// ===== global functions =====

// Floods an LSP to every eligible interface, excluding the one it was
// received on.
//
// The SRM flag stays set on point-to-point circuits until the LSP is
// acknowledged through a PSNP; on broadcast circuits the periodic CSNPs
// recover from losses, so the flag is cleared after one transmission.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    level: LevelNumber,
    lsp: &Arc<Lsp>,
    src: Option<&str>,
) {
    for (ifname, iface) in interfaces.iter_mut() {
        if !iface.state.active
            || !iface.config.level_type.intersects(level)
        {
            continue;
        }
        if let Some(src) = src
            && src == ifname
        {
            continue;
        }

        iface
            .state
            .srm_list
            .get_mut(level)
            .insert(lsp.lsp_id, lsp.clone());
        srm_drain(instance, iface, level);
    }
}

// Transmits the LSPs whose SRM flag is set on this interface.
pub(crate) fn srm_drain(
    instance: &InstanceUpView<'_>,
    iface: &mut Interface,
    level: LevelNumber,
) {
    let srm_list = std::mem::take(iface.state.srm_list.get_mut(level));
    for lsp in srm_list.values() {
        output::send_lsp(iface, instance, level, lsp);
    }
    if iface.config.circuit_type == InterfaceType::PointToPoint {
        // Keep the flags set until the LSPs are acknowledged.
        *iface.state.srm_list.get_mut(level) = srm_list;
    }
}

// Transmits a PSNP for the LSP entries whose SSN flag is set on this
// interface.
pub(crate) fn ssn_drain(
    instance: &InstanceUpView<'_>,
    iface: &mut Interface,
    level: LevelNumber,
) {
    let ssn_list = std::mem::take(iface.state.ssn_list.get_mut(level));
    let entries = ssn_list.into_values().collect::<Vec<_>>();
    output::send_psnp(iface, instance, level, entries);
}

// Periodic SRM/SSN scan for one interface.
pub(crate) fn srm_scan(
    instance: &InstanceUpView<'_>,
    iface: &mut Interface,
) {
    for level in iface.levels() {
        srm_drain(instance, iface, level);
        ssn_drain(instance, iface, level);
    }
}

// Processes a received CSNP (ISO 10589, Section 7.3.15.2).
//
// The peer's database summary is compared against the local one: LSPs the
// sender has newer instances of are requested through the SSN flag; LSPs
// the sender lacks or has older instances of are marked for flooding
// through the SRM flag.
pub(crate) fn process_csnp(
    iface: &mut Interface,
    lsdb: &Lsdb,
    level: LevelNumber,
    snp: &Snp,
) {
    let Some((start, end)) = snp.summary else {
        return;
    };

    // Compare the described entries against the local database.
    for entry in &snp.tlvs.lsp_entries.list {
        compare_entry(iface, lsdb, level, entry);
    }

    // LSPs within the described range that the sender did not list are
    // unknown to it and must be flooded.
    let described = snp
        .tlvs
        .lsp_entries
        .list
        .iter()
        .map(|entry| entry.lsp_id)
        .collect::<std::collections::BTreeSet<_>>();
    for (lsp_id, lse) in lsdb
        .iter()
        .filter(|(lsp_id, _)| **lsp_id >= start && **lsp_id <= end)
        .filter(|(lsp_id, _)| !described.contains(*lsp_id))
        // Purged LSPs are not reflooded.
        .filter(|(_, lse)| lse.data.rem_lifetime() != 0)
    {
        iface
            .state
            .srm_list
            .get_mut(level)
            .insert(*lsp_id, lse.data.clone());
    }
}

// Processes a received PSNP: acknowledgments clear the SRM flag, requests
// (entries older than our copy) set it.
pub(crate) fn process_psnp(
    iface: &mut Interface,
    lsdb: &Lsdb,
    level: LevelNumber,
    snp: &Snp,
) {
    for entry in &snp.tlvs.lsp_entries.list {
        compare_entry(iface, lsdb, level, entry);
    }
}

// ===== helper functions =====

// Compares a single SNP entry against the local database, updating the
// SRM and SSN flags accordingly.
fn compare_entry(
    iface: &mut Interface,
    lsdb: &Lsdb,
    level: LevelNumber,
    entry: &LspEntry,
) {
    match lsdb.get(&entry.lsp_id) {
        Some(lse) => {
            match entry_compare(entry, &lse.data) {
                Ordering::Equal => {
                    // The sender has the same instance: implicit
                    // acknowledgment.
                    iface
                        .state
                        .srm_list
                        .get_mut(level)
                        .remove(&entry.lsp_id);
                }
                Ordering::Greater => {
                    // The sender has a newer instance: request it.
                    set_ssn_request(iface, level, entry.lsp_id);
                    iface
                        .state
                        .srm_list
                        .get_mut(level)
                        .remove(&entry.lsp_id);
                }
                Ordering::Less => {
                    // The sender has an older instance: flood ours.
                    iface
                        .state
                        .srm_list
                        .get_mut(level)
                        .insert(entry.lsp_id, lse.data.clone());
                }
            }
        }
        None if entry.seqno != 0 && entry.rem_lifetime != 0 => {
            // Unknown LSP: request it.
            set_ssn_request(iface, level, entry.lsp_id);
        }
        None => (),
    }
}

// Compares an SNP entry against a stored LSP.
fn entry_compare(entry: &LspEntry, lsp: &Lsp) -> Ordering {
    let cmp = entry.seqno.cmp(&lsp.seqno);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let entry_expired = entry.rem_lifetime == 0;
    let lsp_expired = lsp.rem_lifetime() == 0;
    if entry_expired && !lsp_expired {
        return Ordering::Greater;
    } else if !entry_expired && lsp_expired {
        return Ordering::Less;
    }

    Ordering::Equal
}

// Records a request for an LSP the sender has a newer instance of. The
// zeroed entry tells the peer our copy is older than anything it holds.
fn set_ssn_request(iface: &mut Interface, level: LevelNumber, lsp_id: LspId) {
    iface.state.ssn_list.get_mut(level).insert(
        lsp_id,
        LspEntry {
            rem_lifetime: 0,
            lsp_id,
            seqno: 0,
            cksum: 0,
        },
    );
}

// Acknowledges a received LSP on a point-to-point circuit.
pub(crate) fn ack_lsp(
    iface: &mut Interface,
    level: LevelNumber,
    lsp: &Lsp,
) {
    iface.state.ssn_list.get_mut(level).insert(
        lsp.lsp_id,
        LspEntry::from(lsp),
    );
}
