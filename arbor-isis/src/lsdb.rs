//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use ipnetwork::Ipv4Network;

use crate::adjacency::AdjacencyState;
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::{Interfaces, InterfaceType};
use crate::packet::pdu::{
    LSP_MAX_LIFETIME, LSP_REFRESH_TIME, Lsp, LspFlags, LspTlvs,
};
use crate::packet::tlv::{
    ExtIpv4Reach, ExtIsReach, Ipv4Reach, IsReach,
};
use crate::packet::{LanId, LevelNumber, LevelType, LspId};

// Initial sequence number for self-originated LSPs.
pub const LSP_INIT_SEQNO: u32 = 1;

// Per-level link-state database.
//
// LSP fragments are keyed by (system-id, pseudonode-id, fragment).
#[derive(Debug, Default)]
pub struct Lsdb {
    entries: BTreeMap<LspId, LspEntry>,
}

#[derive(Debug)]
pub struct LspEntry {
    pub data: Arc<Lsp>,
}

// ===== impl Lsdb =====

impl Lsdb {
    pub(crate) fn get(&self, lsp_id: &LspId) -> Option<&LspEntry> {
        self.entries.get(lsp_id)
    }

    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (&LspId, &LspEntry)> + '_ {
        self.entries.iter()
    }

    pub(crate) fn remove(&mut self, lsp_id: &LspId) -> Option<LspEntry> {
        self.entries.remove(lsp_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    // Installs an LSP, replacing any previous instance of the same
    // fragment.
    pub(crate) fn install(
        &mut self,
        level: LevelNumber,
        lsp: Arc<Lsp>,
    ) -> bool {
        if let Some(old) = self.entries.get(&lsp.lsp_id)
            && lsp_compare(&lsp, &old.data) != Ordering::Greater
        {
            return false;
        }

        Debug::LspInstall(level, &lsp.lsp_id, lsp.seqno).log();
        self.entries.insert(lsp.lsp_id, LspEntry { data: lsp });
        true
    }
}

// ===== global functions =====

// Compares which of two LSP instances is more recent: higher sequence
// number wins; at equal sequence numbers a purged (zero lifetime) instance
// wins; the checksum is the final tie-breaker.
pub(crate) fn lsp_compare(a: &Lsp, b: &Lsp) -> Ordering {
    let cmp = a.seqno.cmp(&b.seqno);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let a_expired = a.rem_lifetime() == 0;
    let b_expired = b.rem_lifetime() == 0;
    if a_expired && !b_expired {
        return Ordering::Greater;
    } else if !a_expired && b_expired {
        return Ordering::Less;
    }

    a.cksum.cmp(&b.cksum)
}

// Builds and installs the self-originated LSP for one level, flooding it
// to all interfaces.
pub(crate) fn originate(
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsdb: &mut Lsdb,
    interfaces: &mut Interfaces,
    redistributed: &BTreeMap<Ipv4Network, u32>,
) {
    let system_id = instance.config.system_id;
    let lsp_id = LspId::from((system_id, 0, 0));

    // Area addresses and interface addresses.
    let area_addrs = instance.config.area_addrs.clone();
    let ipv4_addrs = interfaces
        .values()
        .filter(|iface| iface.state.active)
        .map(|iface| iface.config.addr.ip())
        .collect::<Vec<_>>();

    // IS reachability: one entry per Up adjacency (or per DIS on broadcast
    // circuits).
    let mut is_reach = vec![];
    let mut ext_is_reach = vec![];
    for iface in interfaces
        .values()
        .filter(|iface| iface.state.active)
        .filter(|iface| iface.config.level_type.intersects(level))
    {
        let metric = iface.config.metric;
        let neighbors: Vec<LanId> = match iface.config.circuit_type {
            InterfaceType::Broadcast => {
                // On broadcast circuits the adjacency is to the DIS
                // pseudonode.
                match iface.state.dis.get(level) {
                    Some(dis)
                        if iface.state.adjacencies.values().any(|adj| {
                            adj.state == AdjacencyState::Up
                                && adj.level_usage.intersects(level)
                        }) || dis.system_id == system_id =>
                    {
                        vec![*dis]
                    }
                    _ => vec![],
                }
            }
            InterfaceType::PointToPoint => iface
                .state
                .adjacencies
                .values()
                .filter(|adj| adj.state == AdjacencyState::Up)
                .filter(|adj| adj.level_usage.intersects(level))
                .map(|adj| LanId::from((adj.system_id, 0)))
                .collect(),
        };
        for neighbor in neighbors {
            if iface.config.wide_metrics {
                ext_is_reach.push(ExtIsReach { neighbor, metric });
            } else {
                is_reach.push(IsReach {
                    metric: metric.min(63) as u8,
                    neighbor,
                });
            }
        }
    }

    // IP reachability: connected prefixes plus redistributed ones.
    let mut ipv4_internal_reach = vec![];
    let mut ipv4_external_reach = vec![];
    let mut ext_ipv4_reach = vec![];
    let wide_metrics = interfaces
        .values()
        .any(|iface| iface.config.wide_metrics);
    for iface in interfaces.values().filter(|iface| iface.state.active) {
        let prefix = apply_mask(iface.config.addr);
        let metric = iface.config.metric;
        if wide_metrics {
            ext_ipv4_reach.push(ExtIpv4Reach {
                metric,
                up_down: false,
                prefix,
            });
        } else {
            ipv4_internal_reach.push(Ipv4Reach {
                metric: metric.min(63) as u8,
                prefix,
            });
        }
    }
    for (prefix, metric) in redistributed {
        if wide_metrics {
            ext_ipv4_reach.push(ExtIpv4Reach {
                metric: *metric,
                up_down: false,
                prefix: *prefix,
            });
        } else {
            ipv4_external_reach.push(Ipv4Reach {
                metric: (*metric).min(63) as u8,
                prefix: *prefix,
            });
        }
    }

    let tlvs = LspTlvs::new(
        area_addrs,
        ipv4_addrs,
        is_reach,
        ext_is_reach,
        ipv4_internal_reach,
        ipv4_external_reach,
        ext_ipv4_reach,
    );

    let mut flags = LspFlags::default();
    match instance.config.level_type {
        LevelType::L1 => flags.insert(LspFlags::IS_TYPE1),
        LevelType::L2 | LevelType::All => {
            flags.insert(LspFlags::IS_TYPE1 | LspFlags::IS_TYPE2)
        }
    }

    originate_lsp(instance, level, lsdb, interfaces, lsp_id, flags, tlvs);

    // Originate (or purge) pseudonode LSPs for the circuits this system is
    // DIS on.
    originate_pseudonodes(instance, level, lsdb, interfaces);
}

// Originates pseudonode LSPs for LAN circuits where this system was
// elected DIS.
fn originate_pseudonodes(
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsdb: &mut Lsdb,
    interfaces: &mut Interfaces,
) {
    let system_id = instance.config.system_id;

    let ifnames = interfaces.keys().cloned().collect::<Vec<_>>();
    for ifname in ifnames {
        let iface = &interfaces[&ifname];
        if iface.config.circuit_type != InterfaceType::Broadcast {
            continue;
        }

        let circuit_id = iface.state.circuit_id;
        let lsp_id = LspId::from((system_id, circuit_id, 0));
        let is_dis = iface.state.dis.get(level).map(|dis| dis.system_id)
            == Some(system_id);

        if is_dis {
            // The pseudonode reports the DIS and every attached router
            // with zero cost.
            let mut is_reach = vec![IsReach {
                metric: 0,
                neighbor: LanId::from((system_id, 0)),
            }];
            let mut ext_is_reach = vec![ExtIsReach {
                neighbor: LanId::from((system_id, 0)),
                metric: 0,
            }];
            for adj in iface
                .state
                .adjacencies
                .values()
                .filter(|adj| adj.state == AdjacencyState::Up)
                .filter(|adj| adj.level_usage.intersects(level))
            {
                let neighbor = LanId::from((adj.system_id, 0));
                is_reach.push(IsReach {
                    metric: 0,
                    neighbor,
                });
                ext_is_reach.push(ExtIsReach {
                    neighbor,
                    metric: 0,
                });
            }
            let tlvs = if iface.config.wide_metrics {
                LspTlvs::new([], [], [], ext_is_reach, [], [], [])
            } else {
                LspTlvs::new([], [], is_reach, [], [], [], [])
            };
            originate_lsp(
                instance,
                level,
                lsdb,
                interfaces,
                lsp_id,
                LspFlags::default(),
                tlvs,
            );
        } else if lsdb.get(&lsp_id).is_some() {
            purge(instance, level, lsdb, interfaces, lsp_id);
        }
    }
}

// Installs a new instance of a self-originated LSP and floods it.
fn originate_lsp(
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsdb: &mut Lsdb,
    interfaces: &mut Interfaces,
    lsp_id: LspId,
    flags: LspFlags,
    tlvs: LspTlvs,
) {
    let seqno = match lsdb.get(&lsp_id) {
        Some(lse) => lse.data.seqno.saturating_add(1),
        None => LSP_INIT_SEQNO,
    };

    let lsp = Lsp::new(level, LSP_MAX_LIFETIME, lsp_id, seqno, flags, tlvs);
    Debug::LspOriginate(level, &lsp.lsp_id, lsp.seqno).log();
    let lsp = Arc::new(lsp);
    if lsdb.install(level, lsp.clone()) {
        crate::flooding::flood(instance, interfaces, level, &lsp, None);
        instance.tx.protocol_input.spf_schedule(level);
    }
}

// Purges an LSP from the routing domain by flooding it with zero
// remaining lifetime.
pub(crate) fn purge(
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsdb: &mut Lsdb,
    interfaces: &mut Interfaces,
    lsp_id: LspId,
) {
    if let Some(lse) = lsdb.remove(&lsp_id) {
        Debug::LspPurge(level, &lsp_id).log();
        let mut lsp = (*lse.data).clone();
        lsp.set_rem_lifetime(0);
        let lsp = Arc::new(lsp);
        crate::flooding::flood(instance, interfaces, level, &lsp, None);
        instance.tx.protocol_input.spf_schedule(level);
    }
}

// LSDB aging, run once per second per level.
pub(crate) fn age_tick(
    instance: &InstanceUpView<'_>,
    level: LevelNumber,
    lsdb: &mut Lsdb,
    interfaces: &mut Interfaces,
    redistributed: &BTreeMap<Ipv4Network, u32>,
) {
    let system_id = instance.config.system_id;
    let mut refresh = false;
    let mut expired = vec![];

    for (lsp_id, lse) in lsdb.iter() {
        let rem_lifetime = lse.data.rem_lifetime();
        if lsp_id.system_id == system_id {
            if rem_lifetime
                <= LSP_MAX_LIFETIME.saturating_sub(LSP_REFRESH_TIME)
            {
                refresh = true;
            }
        } else if rem_lifetime == 0 {
            expired.push(*lsp_id);
        }
    }

    // Refresh self-originated LSPs ahead of expiry.
    if refresh {
        Debug::LspRefresh(level, &LspId::from((system_id, 0, 0)), 0).log();
        originate(instance, level, lsdb, interfaces, redistributed);
    }

    // Expired LSPs are removed from the database.
    for lsp_id in expired {
        if let Some(lse) = lsdb.remove(&lsp_id) {
            Debug::LspPurge(level, &lse.data.lsp_id).log();
            instance.tx.protocol_input.spf_schedule(level);
        }
    }
}

// ===== helper functions =====

pub(crate) fn apply_mask(addr: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(addr.network(), addr.prefix()).unwrap()
}
