//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::protocol::Protocol;
use crate::southbound::{RedistRouteMsg, RouteKeyMsg, RouteMsg};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

/// Transmit channels for sending [`IbusMsg`] messages to each base component.
#[derive(Clone, Debug, Default)]
pub struct IbusChannelsTx {
    pub routing: Option<IbusSender>,
    pub ospf: Option<IbusSender>,
    pub isis: Option<IbusSender>,
    pub bgp: Option<IbusSender>,
}

/// Ibus message for communication among the different Arbor components.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    /// Computed route update from a protocol engine.
    RouteAdd(RouteMsg),
    /// Computed route withdrawal from a protocol engine.
    RouteDel(RouteKeyMsg),
    /// Request to inject a redistributed prefix into a target engine.
    RedistributeAdd(RedistRouteMsg),
    /// Withdrawal of a previously redistributed prefix.
    RedistributeDel { target: Protocol, prefix: IpNetwork },
    /// Next-hop cost update derived from the latest IGP computation.
    NexthopCostUpd { addr: IpAddr, metric: Option<u32> },
}

// ===== impl IbusChannelsTx =====

impl IbusChannelsTx {
    /// Announce a computed route to the routing component.
    pub fn route_add(&self, msg: RouteMsg) {
        if let Some(routing) = &self.routing {
            let _ = routing.send(IbusMsg::RouteAdd(msg));
        }
    }

    /// Withdraw a computed route from the routing component.
    pub fn route_del(&self, msg: RouteKeyMsg) {
        if let Some(routing) = &self.routing {
            let _ = routing.send(IbusMsg::RouteDel(msg));
        }
    }

    /// Ask the target engine to originate a redistributed prefix.
    pub fn redistribute_add(&self, msg: RedistRouteMsg) {
        if let Some(tx) = self.engine(msg.target) {
            let _ = tx.send(IbusMsg::RedistributeAdd(msg));
        }
    }

    /// Ask the target engine to withdraw a redistributed prefix.
    pub fn redistribute_del(&self, target: Protocol, prefix: IpNetwork) {
        if let Some(tx) = self.engine(target) {
            let _ = tx.send(IbusMsg::RedistributeDel { target, prefix });
        }
    }

    /// Broadcast an IGP next-hop cost update to all protocol engines.
    pub fn nexthop_cost_upd(&self, addr: IpAddr, metric: Option<u32>) {
        for tx in [&self.ospf, &self.isis, &self.bgp].into_iter().flatten() {
            let _ = tx.send(IbusMsg::NexthopCostUpd { addr, metric });
        }
    }

    fn engine(&self, protocol: Protocol) -> Option<&IbusSender> {
        match protocol {
            Protocol::OSPFV2 => self.ospf.as_ref(),
            Protocol::ISIS => self.isis.as_ref(),
            Protocol::BGP => self.bgp.as_ref(),
            Protocol::DIRECT | Protocol::STATIC => None,
        }
    }
}
