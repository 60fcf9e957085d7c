//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Instant;

use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::{
    BgpRouteType, Nexthop, RouteKeyMsg, RouteMsg,
};
use ipnetwork::IpNetwork;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, PeerType, fsm};
use crate::packet::attribute::Attrs;
use crate::packet::consts::COMM_NO_EXPORT;
use crate::packet::message::{
    Message, NotificationMsg, ReachNlri, UnreachNlri, UpdateMsg,
};
use crate::policy::DampingState;
use crate::rib::{
    BestPath, BestPathSource, DFLT_LOCAL_PREF, Rib, Route,
    RouteIneligibleReason, RouteType, no_advertise,
};
use crate::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, TcpAcceptMsg, TcpConnectMsg,
};

pub type Neighbors = BTreeMap<IpAddr, Neighbor>;

// ===== TCP connection events =====

pub(crate) fn process_tcp_accept(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    msg: TcpAcceptMsg,
) {
    let remote_addr = msg.conn_info.remote_addr;
    let Some(nbr) = neighbors.get_mut(&remote_addr) else {
        // Connection from an unconfigured peer: the stream is dropped.
        return;
    };

    // An inbound connection while an exchange is already underway is
    // rejected (simple collision avoidance: the existing session wins).
    if nbr.state >= fsm::State::OpenSent {
        return;
    }

    let old_state = nbr.fsm_event(
        instance,
        fsm::Event::Connected(msg.stream, msg.conn_info),
    );
    post_fsm_transition(
        instance, neighbors, rib, damping, remote_addr, old_state,
    );
}

pub(crate) fn process_tcp_connect(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    msg: TcpConnectMsg,
) {
    let remote_addr = msg.conn_info.remote_addr;
    let Some(nbr) = neighbors.get_mut(&remote_addr) else {
        return;
    };
    if nbr.state >= fsm::State::OpenSent {
        return;
    }

    let old_state = nbr.fsm_event(
        instance,
        fsm::Event::Connected(msg.stream, msg.conn_info),
    );
    post_fsm_transition(
        instance, neighbors, rib, damping, remote_addr, old_state,
    );
}

pub(crate) fn process_tcp_conn_fail(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    nbr_addr: IpAddr,
) {
    let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
        return;
    };
    let old_state = nbr.fsm_event(instance, fsm::Event::ConnFail);
    post_fsm_transition(instance, neighbors, rib, damping, nbr_addr, old_state);
}

// ===== Message receipt =====

pub(crate) fn process_nbr_msg(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    igp_costs: &BTreeMap<IpAddr, u32>,
    msg: NbrRxMsg,
) -> Result<(), Error> {
    let nbr_addr = msg.nbr_addr;
    let nbr = neighbors
        .get_mut(&nbr_addr)
        .ok_or(Error::NbrNotFound(nbr_addr))?;

    // Decode errors trigger a NOTIFICATION and tear the session down.
    let msg = match msg.msg {
        Ok(msg) => msg,
        Err(error) => {
            let old_state =
                nbr.fsm_event(instance, fsm::Event::RcvdError(error.clone()));
            post_fsm_transition(
                instance, neighbors, rib, damping, nbr_addr, old_state,
            );
            return Err(Error::NbrRxError(nbr_addr, error));
        }
    };

    Debug::NbrMsgRx(&nbr_addr, &msg).log();
    nbr.statistics.msgs_rcvd += 1;

    let old_state = match msg {
        Message::Open(msg) => {
            nbr.fsm_event(instance, fsm::Event::RcvdOpen(msg))
        }
        Message::Keepalive(_) => {
            nbr.fsm_event(instance, fsm::Event::RcvdKalive)
        }
        Message::Notification(msg) => {
            nbr.statistics.notifications_rcvd += 1;
            nbr.fsm_event(instance, fsm::Event::RcvdNotif(msg))
        }
        Message::Update(msg) => {
            nbr.statistics.updates_rcvd += 1;
            if nbr.state == fsm::State::Established {
                process_update(
                    instance, neighbors, rib, damping, igp_costs, nbr_addr,
                    msg,
                );
                let nbr = neighbors.get_mut(&nbr_addr).unwrap();
                nbr.fsm_event(instance, fsm::Event::RcvdUpdate)
            } else {
                let msg = NotificationMsg::new(
                    crate::packet::consts::ErrorCode::FiniteStateMachineError,
                    0u8,
                );
                nbr.fsm_event(instance, fsm::Event::Stop(Some(msg)))
            }
        }
        Message::RouteRefresh(_) => {
            // Re-advertise the full Adj-RIB-Out.
            if nbr.state == fsm::State::Established {
                advertise_initial(instance, neighbors, rib, nbr_addr);
            }
            return Ok(());
        }
    };
    post_fsm_transition(instance, neighbors, rib, damping, nbr_addr, old_state);

    Ok(())
}

pub(crate) fn process_nbr_timer(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    msg: NbrTimerMsg,
) {
    let Some(nbr) = neighbors.get_mut(&msg.nbr_addr) else {
        return;
    };

    if msg.timer == fsm::Timer::GrStale {
        // The restart window expired without resynchronization: the stale
        // routes are withdrawn for good.
        nbr.tasks.gr_stale = None;
        clear_peer_routes(instance, neighbors, rib, msg.nbr_addr, true);
        return;
    }

    let old_state = nbr.fsm_event(instance, fsm::Event::Timer(msg.timer));
    post_fsm_transition(
        instance, neighbors, rib, damping, msg.nbr_addr, old_state,
    );
}

// Reacts to FSM state transitions that affect the RIB.
fn post_fsm_transition(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    nbr_addr: IpAddr,
    old_state: fsm::State,
) {
    let Some(nbr) = neighbors.get(&nbr_addr) else {
        return;
    };
    let new_state = nbr.state;

    if old_state == fsm::State::Established
        && new_state != fsm::State::Established
    {
        // Session went down: clear (or keep stale, with graceful restart)
        // the routes learned from this peer.
        let keep_stale = nbr.tasks.gr_stale.is_some();
        damping.clear_peer(nbr_addr);
        clear_peer_routes(instance, neighbors, rib, nbr_addr, !keep_stale);
    } else if old_state != fsm::State::Established
        && new_state == fsm::State::Established
    {
        // Session came up: advertise the current Loc-RIB.
        advertise_initial(instance, neighbors, rib, nbr_addr);
    }
}

// ===== UPDATE processing =====

fn process_update(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    damping: &mut DampingState,
    igp_costs: &BTreeMap<IpAddr, u32>,
    nbr_addr: IpAddr,
    msg: UpdateMsg,
) {
    let nbr = neighbors.get_mut(&nbr_addr).unwrap();
    let peer_type = nbr.peer_type;
    let peer_id = nbr.identifier.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
    let damping_enabled =
        instance.config.damping.enabled && nbr.config.damping;
    let mut changed_prefixes = vec![];

    // 1. Withdrawn routes are removed from the Adj-RIB-In.
    let mut withdrawn: Vec<IpNetwork> = vec![];
    if let Some(unreach) = &msg.unreach {
        withdrawn.extend(unreach.prefixes.iter().copied().map(IpNetwork::V4));
    }
    if let Some(crate::packet::message::MpUnreachNlri::Ipv6Unicast {
        prefixes,
    }) = &msg.mp_unreach
    {
        withdrawn.extend(prefixes.iter().copied().map(IpNetwork::V6));
    }
    for prefix in withdrawn {
        let dest = rib.destination(prefix);
        if let Some(adj_rib) = dest.adj_rib.get_mut(&nbr_addr)
            && adj_rib.in_.take().is_some()
        {
            // Route flap: the damping penalty accumulates on withdraws.
            if damping_enabled {
                damping.flap(&instance.config.damping, nbr_addr, prefix);
            }
            changed_prefixes.push(prefix);
        }
    }

    // 2-4. Install the reachable NLRIs in the Adj-RIB-In.
    let mut reach: Vec<(IpNetwork, IpAddr)> = vec![];
    if let Some(ReachNlri { prefixes, nexthop }) = &msg.reach {
        reach.extend(
            prefixes
                .iter()
                .map(|prefix| (IpNetwork::V4(*prefix), IpAddr::V4(*nexthop))),
        );
    }
    if let Some(crate::packet::message::MpReachNlri::Ipv6Unicast {
        prefixes,
        nexthop,
        ..
    }) = &msg.mp_reach
    {
        reach.extend(
            prefixes
                .iter()
                .map(|prefix| (IpNetwork::V6(*prefix), IpAddr::V6(*nexthop))),
        );
    }

    if !reach.is_empty() {
        let Some(attrs) = &msg.attrs else {
            return;
        };

        for (prefix, nexthop) in reach {
            let mut ineligible = None;

            // 3. Loop detection: our own AS in the AS_PATH.
            if peer_type == PeerType::External
                && attrs.base.as_path.contains(instance.config.asn)
            {
                ineligible = Some(RouteIneligibleReason::AsLoop);
            }
            // Route reflection loop detection.
            if attrs.base.originator_id == Some(instance.config.router_id) {
                ineligible = Some(RouteIneligibleReason::Originator);
            }
            if let Some(cluster_list) = &attrs.base.cluster_list
                && cluster_list.contains(&instance.config.router_id)
            {
                ineligible = Some(RouteIneligibleReason::ClusterLoop);
            }

            // RPKI origin validation.
            if ineligible.is_none()
                && instance.config.rpki.enabled
                && instance.config.rpki.reject_invalid
            {
                let origin_as = attrs.base.as_path.iter().last();
                if instance.config.rpki.validate(&prefix, origin_as)
                    == crate::policy::RpkiValidationState::Invalid
                {
                    ineligible = Some(RouteIneligibleReason::RpkiInvalid);
                }
            }

            // Suppressed (damped) routes are not considered for selection.
            if ineligible.is_none()
                && damping_enabled
                && damping.is_suppressed(
                    &instance.config.damping,
                    nbr_addr,
                    prefix,
                )
            {
                ineligible = Some(RouteIneligibleReason::Damped);
            }

            let igp_cost = igp_costs.get(&nexthop).copied();
            let route = Route {
                attrs: attrs.clone(),
                route_type: match peer_type {
                    PeerType::Internal => RouteType::Internal,
                    PeerType::External => RouteType::External,
                },
                peer_id,
                peer_addr: nbr_addr,
                last_modified: Instant::now(),
                igp_cost,
                ineligible,
                stale: false,
            };
            let dest = rib.destination(prefix);
            dest.adj_rib.entry(nbr_addr).or_default().in_ = Some(route);
            changed_prefixes.push(prefix);
        }
    }

    // Rerun the decision process for every affected prefix.
    for prefix in changed_prefixes {
        best_path_update(instance, neighbors, rib, prefix);
    }
}

// ===== Decision process and route propagation =====

// Recomputes the best path for one prefix, updating the Loc-RIB, the
// kernel routing table and the Adj-RIB-Out of every peer.
pub(crate) fn best_path_update(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    prefix: IpNetwork,
) {
    let dest = rib.destination(prefix);
    let new_best = dest.best_path();
    if dest.best == new_best {
        return;
    }
    dest.best = new_best.clone();

    // Synchronize the Loc-RIB change with the routing component.
    match &new_best {
        Some(best) => {
            if let BestPathSource::Neighbor { peer_addr, .. } = &best.source {
                Debug::BestPathFound(prefix, peer_addr).log();
            }
            if let Some(msg) = loc_rib_route_msg(instance, prefix, best) {
                instance.tx.ibus.route_add(msg);
            }
        }
        None => {
            Debug::BestPathRemoved(prefix).log();
            instance.tx.ibus.route_del(RouteKeyMsg {
                protocol: Protocol::BGP,
                prefix,
            });
        }
    }

    // Propagate the change to the Adj-RIB-Out of every peer.
    advertise_prefix(instance, neighbors, rib, prefix);
}

// Converts a Loc-RIB entry into a route message for the installer.
// Locally originated routes are not reinstalled.
fn loc_rib_route_msg(
    instance: &InstanceUpView<'_>,
    prefix: IpNetwork,
    best: &BestPath,
) -> Option<RouteMsg> {
    let _ = instance;
    let BestPathSource::Neighbor { route_type, .. } = &best.source else {
        return None;
    };
    let nexthop = best.attrs.base.nexthop?;

    let bgp_type = match route_type {
        RouteType::Internal => BgpRouteType::Internal,
        RouteType::External => BgpRouteType::External,
    };
    Some(RouteMsg {
        protocol: Protocol::BGP,
        prefix,
        distance: match bgp_type {
            BgpRouteType::Internal => 200,
            BgpRouteType::External => 210,
        },
        metric: best.attrs.base.med.unwrap_or(0),
        bgp_type: Some(bgp_type),
        // The gateway is resolved by the kernel through the connected
        // routes.
        nexthops: [Nexthop::Address {
            ifindex: 0,
            addr: IpAddr::V4(nexthop),
        }]
        .into(),
    })
}

// Advertises (or withdraws) the best path for one prefix to every
// established peer, respecting the split-horizon and route reflection
// rules.
fn advertise_prefix(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    prefix: IpNetwork,
) {
    let Some(dest) = rib.destinations.get_mut(&prefix) else {
        return;
    };
    let best = dest.best.clone();

    for (nbr_addr, nbr) in neighbors.iter_mut() {
        if nbr.state != fsm::State::Established {
            continue;
        }

        let attrs = best
            .as_ref()
            .and_then(|best| export_attrs(instance, nbr, best));

        let adj_rib = dest.adj_rib.entry(*nbr_addr).or_default();
        if adj_rib.out == attrs {
            continue;
        }

        match &attrs {
            Some(attrs) => {
                nbr.message_send(Message::Update(reach_update(
                    prefix,
                    attrs.clone(),
                )));
            }
            None if adj_rib.out.is_some() => {
                nbr.message_send(Message::Update(unreach_update(prefix)));
            }
            None => (),
        }
        adj_rib.out = attrs;
    }

    rib.gc(&prefix);
}

// Computes the attributes advertised to one peer, or `None` when the
// route must not be sent to it.
fn export_attrs(
    instance: &InstanceUpView<'_>,
    nbr: &Neighbor,
    best: &BestPath,
) -> Option<Attrs> {
    // NO_ADVERTISE forbids any readvertisement.
    if no_advertise(&best.attrs) {
        return None;
    }

    // Split-horizon: never send a route back to the peer it was learned
    // from.
    if let BestPathSource::Neighbor { peer_addr, .. } = &best.source
        && *peer_addr == nbr.remote_addr
    {
        return None;
    }

    let mut attrs = best.attrs.clone();

    match nbr.peer_type {
        PeerType::External => {
            // NO_EXPORT keeps the route within the AS.
            if attrs
                .comm
                .as_ref()
                .is_some_and(|comm| comm.contains(&COMM_NO_EXPORT))
            {
                return None;
            }

            // Prepend our AS and rewrite the next-hop to ourselves.
            attrs.base.as_path.prepend(instance.config.asn);
            if let Some(TcpConnInfoV4 { local_addr }) =
                conn_local_v4(nbr)
            {
                attrs.base.nexthop = Some(local_addr);
            }
            attrs.base.local_pref = None;
            attrs.base.med = None;
            attrs.base.originator_id = None;
            attrs.base.cluster_list = None;
        }
        PeerType::Internal => {
            match &best.source {
                BestPathSource::Neighbor {
                    route_type: RouteType::Internal,
                    peer_id,
                    peer_addr,
                } => {
                    // iBGP-learned routes are reflected to iBGP peers only
                    // when this router acts as a route reflector: routes
                    // from clients go to everyone, routes from non-clients
                    // go to clients only.
                    let from_client = instance
                        .config
                        .rr_clients
                        .contains(peer_addr);
                    if !from_client && !nbr.config.rr_client {
                        return None;
                    }

                    // Reflection loop protection attributes.
                    if attrs.base.originator_id.is_none() {
                        attrs.base.originator_id = Some(*peer_id);
                    }
                    let cluster_id = instance.config.router_id;
                    attrs
                        .base
                        .cluster_list
                        .get_or_insert_with(Vec::new)
                        .insert(0, cluster_id);
                }
                _ => {
                    // eBGP-learned and local routes go to all iBGP peers.
                }
            }

            attrs.base.local_pref =
                Some(attrs.base.local_pref.unwrap_or(DFLT_LOCAL_PREF));
            if attrs.base.nexthop.is_none()
                && let Some(TcpConnInfoV4 { local_addr }) = conn_local_v4(nbr)
            {
                attrs.base.nexthop = Some(local_addr);
            }
        }
    }

    Some(attrs)
}

struct TcpConnInfoV4 {
    local_addr: std::net::Ipv4Addr,
}

fn conn_local_v4(nbr: &Neighbor) -> Option<TcpConnInfoV4> {
    match nbr.conn_info.as_ref()?.local_addr {
        IpAddr::V4(local_addr) => Some(TcpConnInfoV4 { local_addr }),
        IpAddr::V6(_) => None,
    }
}

fn reach_update(prefix: IpNetwork, attrs: Attrs) -> UpdateMsg {
    match prefix {
        IpNetwork::V4(prefix) => UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![prefix],
                nexthop: attrs.base.nexthop.unwrap_or(
                    std::net::Ipv4Addr::UNSPECIFIED,
                ),
            }),
            unreach: None,
            mp_reach: None,
            mp_unreach: None,
            attrs: Some(attrs),
        },
        IpNetwork::V6(prefix) => UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: Some(
                crate::packet::message::MpReachNlri::Ipv6Unicast {
                    prefixes: vec![prefix],
                    nexthop: std::net::Ipv6Addr::UNSPECIFIED,
                    ll_nexthop: None,
                },
            ),
            mp_unreach: None,
            attrs: Some(attrs),
        },
    }
}

fn unreach_update(prefix: IpNetwork) -> UpdateMsg {
    match prefix {
        IpNetwork::V4(prefix) => UpdateMsg {
            reach: None,
            unreach: Some(UnreachNlri {
                prefixes: vec![prefix],
            }),
            mp_reach: None,
            mp_unreach: None,
            attrs: None,
        },
        IpNetwork::V6(prefix) => UpdateMsg {
            reach: None,
            unreach: None,
            mp_reach: None,
            mp_unreach: Some(
                crate::packet::message::MpUnreachNlri::Ipv6Unicast {
                    prefixes: vec![prefix],
                },
            ),
            attrs: None,
        },
    }
}

// Advertises the entire Loc-RIB to a newly established peer.
pub(crate) fn advertise_initial(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    nbr_addr: IpAddr,
) {
    let prefixes = rib
        .destinations
        .iter()
        .filter(|(_, dest)| dest.best.is_some())
        .map(|(prefix, _)| *prefix)
        .collect::<Vec<_>>();

    for prefix in prefixes {
        let Some(dest) = rib.destinations.get_mut(&prefix) else {
            continue;
        };
        let best = dest.best.clone().unwrap();
        let Some(nbr) = neighbors.get_mut(&nbr_addr) else {
            return;
        };
        let attrs = export_attrs(instance, nbr, &best);
        if let Some(attrs) = &attrs {
            nbr.message_send(Message::Update(reach_update(
                prefix,
                attrs.clone(),
            )));
        }
        dest.adj_rib.entry(nbr_addr).or_default().out = attrs;
    }

    // A peer that resynchronized within the graceful restart window gets
    // its stale routes refreshed by the normal UPDATE processing; the
    // stale timer is no longer needed.
    if let Some(nbr) = neighbors.get_mut(&nbr_addr) {
        nbr.tasks.gr_stale = None;
    }
}

// Clears (or marks stale) all routes learned from a peer, rerunning the
// decision process for the affected prefixes.
pub(crate) fn clear_peer_routes(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    nbr_addr: IpAddr,
    remove: bool,
) {
    let prefixes = rib
        .destinations
        .iter()
        .filter(|(_, dest)| {
            dest.adj_rib
                .get(&nbr_addr)
                .is_some_and(|adj_rib| adj_rib.in_.is_some())
        })
        .map(|(prefix, _)| *prefix)
        .collect::<Vec<_>>();

    for prefix in prefixes {
        let dest = rib.destination(prefix);
        let adj_rib = dest.adj_rib.entry(nbr_addr).or_default();
        if remove {
            adj_rib.in_ = None;
            adj_rib.out = None;
            best_path_update(instance, neighbors, rib, prefix);
        } else if let Some(route) = adj_rib.in_.as_mut() {
            // Graceful restart: keep forwarding over the stale route
            // until the restart window expires.
            route.stale = true;
        }
    }

    // The Adj-RIB-Out toward this peer is gone with the session.
    if remove {
        for dest in rib.destinations.values_mut() {
            if let Some(adj_rib) = dest.adj_rib.get_mut(&nbr_addr) {
                adj_rib.out = None;
            }
        }
    }
}

// ===== Local route origination =====

// Originates a local prefix (network statement, operator command or
// redistribution).
pub(crate) fn originate_prefix(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    prefix: IpNetwork,
    attrs: Attrs,
    origin_protocol: Protocol,
) {
    let dest = rib.destination(prefix);
    dest.local = Some(crate::rib::LocalRoute {
        attrs,
        origin_protocol,
    });
    best_path_update(instance, neighbors, rib, prefix);
}

pub(crate) fn withdraw_prefix(
    instance: &InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    rib: &mut Rib,
    prefix: IpNetwork,
) {
    let dest = rib.destination(prefix);
    if dest.local.take().is_some() {
        best_path_update(instance, neighbors, rib, prefix);
    }
}
