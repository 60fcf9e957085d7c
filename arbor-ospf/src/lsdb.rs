//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;

use crate::debug::Debug;
use crate::flood::flood;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::Options;
use crate::packet::lsa::{
    LSA_INIT_SEQ_NO, LSA_MAX_AGE, LSA_MAX_SEQ_NO, LSA_REFRESH_TIME, Lsa,
    LsaAsExternal, LsaBody, LsaKey, LsaNetwork, LsaRouter, LsaRouterLink,
    LsaRouterLinkType, LsaType, lsa_compare,
};

// Per-interface neighbor tables, keyed by interface name.
pub type Neighbors = BTreeMap<String, BTreeMap<Ipv4Addr, Neighbor>>;

// Area link-state database.
//
// LSAs are keyed by (type, link-state-id, advertising router). AS-external
// LSAs share the same store given the single-area design.
#[derive(Debug, Default)]
pub struct Lsdb {
    entries: BTreeMap<LsaKey, LsaEntry>,
}

#[derive(Debug)]
pub struct LsaEntry {
    pub data: Arc<Lsa>,
}

// Events that trigger (re)origination of self LSAs.
#[derive(Clone, Debug)]
pub enum LsaOriginateEvent {
    InstanceStart,
    NeighborToFromFull { ifname: String },
    DrChange { ifname: String },
}

// ===== impl Lsdb =====

impl Lsdb {
    pub(crate) fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.entries.get(key)
    }

    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> + '_ {
        self.entries.iter()
    }

    pub(crate) fn remove(&mut self, key: &LsaKey) -> Option<LsaEntry> {
        self.entries.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    // Installs an LSA, replacing any previous instance of the same key.
    //
    // Installing an equal-or-older instance is a no-op; all callers are
    // expected to have gone through `lsa_compare` first, and this is
    // enforced here as a safety net.
    pub(crate) fn install(&mut self, lsa: Arc<Lsa>) -> bool {
        let key = lsa.hdr.key();
        if let Some(old) = self.entries.get(&key)
            && lsa_compare(&lsa.hdr, &old.data.hdr)
                != std::cmp::Ordering::Greater
        {
            return false;
        }

        Debug::LsaInstall(&lsa.hdr).log();
        self.entries.insert(key, LsaEntry { data: lsa });
        true
    }
}

// ===== global functions =====

// Installs a received or self-originated LSA and floods it.
pub(crate) fn install_and_flood(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsa: Arc<Lsa>,
    src: Option<(&str, Ipv4Addr)>,
) {
    if lsdb.install(lsa.clone()) {
        flood(instance, interfaces, neighbors, &lsa, src);
        instance.tx.protocol_input.spf_delay_event();
    }
}

// LSDB aging, run once per second.
//
// Self-originated LSAs are refreshed ahead of LSRefreshTime; other LSAs age
// towards MaxAge, at which point they are flush-flooded and removed.
pub(crate) fn age_tick(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
) {
    let mut refresh = vec![];
    let mut expired = vec![];

    for (key, lse) in lsdb.iter() {
        let age = lse.data.age();
        if key.adv_rtr == instance.router_id {
            if age >= LSA_REFRESH_TIME {
                refresh.push(*key);
            }
        } else if age >= LSA_MAX_AGE {
            expired.push(*key);
        }
    }

    // Refresh self-originated LSAs with a new sequence number.
    for key in refresh {
        let Some((options, body)) = lsdb.get(&key).map(|lse| {
            Debug::LsaRefresh(&lse.data.hdr).log();
            (lse.data.hdr.options, lse.data.body.clone())
        }) else {
            continue;
        };
        originate(
            instance, lsdb, interfaces, neighbors, key.lsa_id, options, body,
        );
    }

    // Flush-flood and remove expired LSAs.
    for key in expired {
        if let Some(lse) = lsdb.remove(&key) {
            Debug::LsaFlush(&lse.data.hdr).log();
            let mut lsa = (*lse.data).clone();
            lsa.set_maxage();
            let lsa = Arc::new(lsa);
            flood(instance, interfaces, neighbors, &lsa, None);
            instance.tx.protocol_input.spf_delay_event();
        }
    }
}

// Originates a self LSA, handling sequence number progression and the
// MaxSeq rollover (flush at MaxAge before restarting at InitialSeq).
pub(crate) fn originate(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsa_id: Ipv4Addr,
    options: Options,
    body: LsaBody,
) {
    let key = LsaKey {
        lsa_type: body.lsa_type(),
        adv_rtr: instance.router_id,
        lsa_id,
    };

    let seq_no = match lsdb.get(&key) {
        Some(lse) if lse.data.hdr.seq_no == LSA_MAX_SEQ_NO => {
            // Sequence number rollover: the old instance must be flushed
            // from the routing domain before the new one is originated at
            // InitialSequenceNumber.
            let lse = lsdb.remove(&key).unwrap();
            let mut old = (*lse.data).clone();
            old.set_maxage();
            let old = Arc::new(old);
            flood(instance, interfaces, neighbors, &old, None);
            LSA_INIT_SEQ_NO
        }
        Some(lse) => lse.data.hdr.seq_no + 1,
        None => LSA_INIT_SEQ_NO,
    };

    let lsa = Lsa::new(0, options, lsa_id, instance.router_id, seq_no, body);
    Debug::LsaOriginate(&lsa.hdr).log();
    install_and_flood(instance, lsdb, interfaces, neighbors, Arc::new(lsa), None);
}

// Flushes a self-originated LSA by flooding it at MaxAge.
pub(crate) fn flush_self_originated(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    key: LsaKey,
) {
    if let Some(lse) = lsdb.remove(&key) {
        Debug::LsaFlush(&lse.data.hdr).log();
        let mut lsa = (*lse.data).clone();
        lsa.set_maxage();
        let lsa = Arc::new(lsa);
        flood(instance, interfaces, neighbors, &lsa, None);
        instance.tx.protocol_input.spf_delay_event();
    }
}

// Processes an LSA origination event by regenerating the affected self
// LSAs. Regeneration happens only on adjacency or configuration
// transitions, never on individual LSU arrival.
pub(crate) fn process_originate_event(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    event: LsaOriginateEvent,
) {
    match event {
        LsaOriginateEvent::InstanceStart
        | LsaOriginateEvent::NeighborToFromFull { .. } => {
            originate_router_lsa(instance, lsdb, interfaces, neighbors);
            originate_network_lsas(instance, lsdb, interfaces, neighbors);
        }
        LsaOriginateEvent::DrChange { .. } => {
            originate_router_lsa(instance, lsdb, interfaces, neighbors);
            originate_network_lsas(instance, lsdb, interfaces, neighbors);
        }
    }
}

// (Re)originates the local Router-LSA: one link per fully adjacent
// neighbor, plus one stub link per attached network.
pub(crate) fn originate_router_lsa(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
) {
    let mut links = vec![];

    for (ifname, iface) in interfaces.iter() {
        if iface.state.ism_state == ism::State::Down {
            continue;
        }
        let empty = BTreeMap::new();
        let iface_nbrs = neighbors.get(ifname).unwrap_or(&empty);

        match iface.config.if_type {
            InterfaceType::PointToPoint
            | InterfaceType::PointToMultipoint
            | InterfaceType::NonBroadcast => {
                for nbr in iface_nbrs
                    .values()
                    .filter(|nbr| nbr.state == nsm::State::Full)
                {
                    links.push(LsaRouterLink {
                        link_type: LsaRouterLinkType::PointToPoint,
                        link_id: nbr.router_id,
                        link_data: iface.src_addr(),
                        metric: iface.config.cost,
                    });
                }

                // Stub link for the attached subnet.
                links.push(LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: iface.config.addr.network(),
                    link_data: iface.config.addr.mask(),
                    metric: iface.config.cost,
                });
            }
            InterfaceType::Broadcast => {
                // The network is transit if the router is fully adjacent to
                // the DR, or is itself the DR with at least one full
                // adjacency.
                let transit = match iface.state.dr {
                    Some(dr) if dr == iface.src_addr() => iface_nbrs
                        .values()
                        .any(|nbr| nbr.state == nsm::State::Full),
                    Some(dr) => iface_nbrs.values().any(|nbr| {
                        nbr.src == dr && nbr.state == nsm::State::Full
                    }),
                    None => false,
                };
                if transit {
                    links.push(LsaRouterLink {
                        link_type: LsaRouterLinkType::TransitNetwork,
                        link_id: iface.state.dr.unwrap(),
                        link_data: iface.src_addr(),
                        metric: iface.config.cost,
                    });
                } else {
                    links.push(LsaRouterLink {
                        link_type: LsaRouterLinkType::StubNetwork,
                        link_id: iface.config.addr.network(),
                        link_data: iface.config.addr.mask(),
                        metric: iface.config.cost,
                    });
                }
            }
        }
    }

    // Host route for the router-id itself, so remote routers can always
    // reach it (and resolve recursive next-hops through it).
    links.push(LsaRouterLink {
        link_type: LsaRouterLinkType::StubNetwork,
        link_id: instance.router_id,
        link_data: Ipv4Addr::BROADCAST,
        metric: 0,
    });

    let body = LsaBody::Router(LsaRouter { flags: 0, links });
    originate(
        instance,
        lsdb,
        interfaces,
        neighbors,
        instance.router_id,
        Options::E,
        body,
    );
}

// (Re)originates or flushes Network-LSAs for the broadcast networks this
// router is DR on.
pub(crate) fn originate_network_lsas(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
) {
    let ifnames = interfaces.keys().cloned().collect::<Vec<_>>();
    for ifname in ifnames {
        let iface = &interfaces[&ifname];
        if iface.config.if_type != InterfaceType::Broadcast {
            continue;
        }

        let lsa_id = iface.src_addr();
        let key = LsaKey {
            lsa_type: LsaType::Network,
            adv_rtr: instance.router_id,
            lsa_id,
        };

        let empty = BTreeMap::new();
        let iface_nbrs = neighbors.get(&ifname).unwrap_or(&empty);
        let full_nbrs = iface_nbrs
            .values()
            .filter(|nbr| nbr.state == nsm::State::Full)
            .map(|nbr| nbr.router_id)
            .collect::<Vec<_>>();

        if iface.is_dr() && !full_nbrs.is_empty() {
            let mut attached_rtrs = vec![instance.router_id];
            attached_rtrs.extend(full_nbrs);
            let body = LsaBody::Network(LsaNetwork {
                mask: iface.config.addr.mask(),
                attached_rtrs,
            });
            originate(
                instance,
                lsdb,
                interfaces,
                neighbors,
                lsa_id,
                Options::E,
                body,
            );
        } else if lsdb.get(&key).is_some() {
            // No longer DR for this network (or no adjacencies left).
            flush_self_originated(instance, lsdb, interfaces, neighbors, key);
        }
    }
}

// Originates an AS-external LSA for a redistributed prefix.
pub(crate) fn originate_external_lsa(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    prefix: Ipv4Network,
    metric: u32,
    fwd_addr: Option<Ipv4Addr>,
) {
    let body = LsaBody::AsExternal(LsaAsExternal {
        mask: prefix.mask(),
        // Type 2 external metrics by default: the external cost alone is
        // considered, regardless of the internal path cost.
        e_bit: true,
        metric,
        fwd_addr,
        route_tag: 0,
    });
    originate(
        instance,
        lsdb,
        interfaces,
        neighbors,
        prefix.network(),
        Options::E,
        body,
    );
}

// Withdraws a previously redistributed prefix.
pub(crate) fn flush_external_lsa(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    prefix: Ipv4Network,
) {
    let key = LsaKey {
        lsa_type: LsaType::AsExternal,
        adv_rtr: instance.router_id,
        lsa_id: prefix.network(),
    };
    flush_self_originated(instance, lsdb, interfaces, neighbors, key);
}

// Flushes all self-originated LSAs, used at instance shutdown so peers
// don't have to wait for MaxAge expiry.
pub(crate) fn flush_all_self_originated(
    instance: &InstanceUpView<'_>,
    lsdb: &mut Lsdb,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
) {
    let keys = lsdb
        .iter()
        .filter(|(key, _)| key.adv_rtr == instance.router_id)
        .map(|(key, _)| *key)
        .collect::<Vec<_>>();
    for key in keys {
        flush_self_originated(instance, lsdb, interfaces, neighbors, key);
    }
}
