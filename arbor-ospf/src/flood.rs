//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb::Neighbors;
use crate::neighbor::{RXMT_QUEUE_MAX, nsm};
use crate::output;
use crate::packet::lsa::{Lsa, lsa_compare};

// Floods an LSA to all eligible neighbors, excluding the neighbor it was
// received from, and enqueues it on each neighbor's retransmission list
// (RFC 2328, Section 13.3).
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    interfaces: &mut BTreeMap<String, Interface>,
    neighbors: &mut Neighbors,
    lsa: &Arc<Lsa>,
    src: Option<(&str, std::net::Ipv4Addr)>,
) -> bool {
    let mut flooded = false;

    for (ifname, iface) in interfaces.iter_mut() {
        let Some(iface_nbrs) = neighbors.get_mut(ifname) else {
            continue;
        };
        flooded |=
            flood_interface(iface, iface_nbrs, instance, lsa, src);
    }

    flooded
}

// ===== helper functions =====

fn flood_interface(
    iface: &mut Interface,
    iface_nbrs: &mut BTreeMap<std::net::Ipv4Addr, crate::neighbor::Neighbor>,
    instance: &InstanceUpView<'_>,
    lsa: &Arc<Lsa>,
    src: Option<(&str, std::net::Ipv4Addr)>,
) -> bool {
    let lsa_key = lsa.hdr.key();

    // 1) Each of the neighbors attached to this interface is examined.
    let mut rxmt_added = false;
    for nbr in iface_nbrs.values_mut() {
        // 1.a) Skip neighbors in a lesser state than Exchange.
        if nbr.state < nsm::State::Exchange {
            continue;
        }

        // 1.b) For adjacencies still synchronizing, examine the link state
        // request list.
        if nbr.state != nsm::State::Full
            && let Some(req) = nbr.lists.ls_request.get(&lsa_key)
        {
            match lsa_compare(&lsa.hdr, req) {
                Ordering::Less => continue,
                cmp => {
                    // The new LSA fulfills (or supersedes) the request.
                    nbr.lists.ls_request.remove(&lsa_key);
                    nbr.loading_done_check(iface, instance);
                    if cmp == Ordering::Equal {
                        continue;
                    }
                }
            }
        }

        // 1.c) If the new LSA was received from this neighbor, examine the
        // next neighbor.
        if let Some((src_ifname, src_router_id)) = src
            && src_ifname == iface.name
            && src_router_id == nbr.router_id
        {
            continue;
        }

        // 1.d) Add the LSA to the neighbor's retransmission list. A
        // neighbor that cannot drain its queue is torn down rather than
        // allowed to grow it without bound.
        if nbr.lists.ls_rxmt.len() >= RXMT_QUEUE_MAX {
            instance.tx.protocol_input.nsm_event(
                &iface.name,
                nbr.router_id,
                nsm::Event::Kill,
            );
            continue;
        }
        nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
        nbr.rxmt_lsupd_start_check(iface, instance);
        rxmt_added = true;
    }

    // 2) If the LSA was not added to any retransmission list, there is no
    // need to flood it out this interface.
    if !rxmt_added {
        return false;
    }

    // 3) If the new LSA was received on this interface from the DR or the
    // BDR, chances are all the neighbors have received it already.
    if let Some((src_ifname, src_router_id)) = src
        && src_ifname == iface.name
    {
        if let Some(nbr) = iface_nbrs.get(&src_router_id)
            && (iface.state.dr == Some(nbr.src)
                || iface.state.bdr == Some(nbr.src))
        {
            return false;
        }

        // 4) If the interface state is Backup, the DR handles the flooding
        // on this network.
        if iface.state.ism_state == ism::State::Backup {
            return false;
        }
    }

    // Flood the LSA out the interface.
    output::send_lsupd(iface, instance, vec![(**lsa).clone()]);

    true
}
