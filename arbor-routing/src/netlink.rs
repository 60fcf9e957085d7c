//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use arbor_utils::protocol::Protocol;
use arbor_utils::southbound::Nexthop;
use ipnetwork::IpNetwork;
use rtnetlink::{Handle, new_connection};
use tracing::error;

use crate::rib::Route;

// Route protocol types as defined in the rtnetlink.h kernel header.
const NETLINK_PROTO_UNSPEC: u8 = 0;
const NETLINK_PROTO_STATIC: u8 = 4;
const NETLINK_PROTO_BGP: u8 = 186;
const NETLINK_PROTO_ISIS: u8 = 187;
const NETLINK_PROTO_OSPF: u8 = 188;

fn netlink_protocol(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::STATIC => NETLINK_PROTO_STATIC,
        Protocol::BGP => NETLINK_PROTO_BGP,
        Protocol::ISIS => NETLINK_PROTO_ISIS,
        Protocol::OSPFV2 => NETLINK_PROTO_OSPF,
        _ => NETLINK_PROTO_UNSPEC,
    }
}

pub(crate) async fn ip_route_install(
    handle: &Handle,
    prefix: &IpNetwork,
    route: &Route,
) {
    // Create netlink request.
    let mut request = handle.route().add();

    // Set route protocol.
    let protocol = netlink_protocol(route.protocol);
    request = request.protocol(protocol);

    match prefix {
        IpNetwork::V4(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v4()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Add nexthops.
            for nexthop in route.nexthops.iter() {
                request = match nexthop {
                    Nexthop::Address { addr, ifindex } => {
                        if let IpAddr::V4(addr) = addr {
                            let request = request.gateway(*addr);
                            match ifindex {
                                0 => request,
                                ifindex => {
                                    request.output_interface(*ifindex)
                                }
                            }
                        } else {
                            request
                        }
                    }
                    Nexthop::Interface { ifindex } => {
                        request.output_interface(*ifindex)
                    }
                    Nexthop::Unresolved { .. } => request,
                };
            }

            // Execute request.
            if let Err(error) = request.execute().await {
                error!(%prefix, %error, "failed to install route");
            }
        }
        IpNetwork::V6(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v6()
                .replace()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Add nexthops.
            for nexthop in route.nexthops.iter() {
                request = match nexthop {
                    Nexthop::Address { addr, ifindex } => {
                        if let IpAddr::V6(addr) = addr {
                            let request = request.gateway(*addr);
                            match ifindex {
                                0 => request,
                                ifindex => {
                                    request.output_interface(*ifindex)
                                }
                            }
                        } else {
                            request
                        }
                    }
                    Nexthop::Interface { ifindex } => {
                        request.output_interface(*ifindex)
                    }
                    Nexthop::Unresolved { .. } => request,
                };
            }

            // Execute request.
            if let Err(error) = request.execute().await {
                error!(%prefix, %error, "failed to install route");
            }
        }
    }
}

pub(crate) async fn ip_route_uninstall(
    handle: &Handle,
    prefix: &IpNetwork,
    protocol: Protocol,
) {
    // Create netlink request.
    let mut request = handle.route().add();

    // Set route protocol.
    let protocol = netlink_protocol(protocol);
    request = request.protocol(protocol);

    match prefix {
        IpNetwork::V4(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v4()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Execute request.
            let request = handle.route().del(request.message_mut().clone());
            if let Err(error) = request.execute().await {
                error!(%prefix, %error, "failed to uninstall route");
            }
        }
        IpNetwork::V6(prefix) => {
            // Set destination prefix.
            let mut request = request
                .v6()
                .destination_prefix(prefix.ip(), prefix.prefix());

            // Execute request.
            let request = handle.route().del(request.message_mut().clone());
            if let Err(error) = request.execute().await {
                error!(%prefix, %error, "failed to uninstall route");
            }
        }
    }
}

pub(crate) fn init() -> Handle {
    // Create netlink connection.
    let (conn, handle, _) = new_connection().unwrap();

    // Serve requests initiated by the netlink handle.
    tokio::spawn(conn);

    // Return handle used to send netlink requests to the kernel.
    handle
}
