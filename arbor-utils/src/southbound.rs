//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::protocol::Protocol;

// Route next-hop.
//
// A next-hop known only by router-id stays `Unresolved` until an adjacency
// or link-state entry supplies an interface address for that router; the
// originating engine re-announces the route once resolution succeeds.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Nexthop {
    Address { ifindex: u32, addr: IpAddr },
    Interface { ifindex: u32 },
    Unresolved { router_id: Ipv4Addr },
}

// BGP route types, ordered so that internal routes have lower preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum BgpRouteType {
    Internal,
    External,
}

// ===== Ibus messages =====

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
    pub distance: u8,
    pub metric: u32,
    pub bgp_type: Option<BgpRouteType>,
    pub nexthops: BTreeSet<Nexthop>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RouteKeyMsg {
    pub protocol: Protocol,
    pub prefix: IpNetwork,
}

// Route injected by the redistribution fabric into a target protocol.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RedistRouteMsg {
    pub target: Protocol,
    pub origin: Protocol,
    pub prefix: IpNetwork,
    pub metric: u32,
    pub nexthop: Option<IpAddr>,
}

// ===== impl Nexthop =====

impl Nexthop {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Nexthop::Unresolved { .. })
    }
}
