//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

// Address family.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IP address into a host prefix network.
    fn to_host_prefix(&self) -> IpNetwork;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;

    // Converts a dotted-quad netmask into a prefix length, rejecting
    // non-contiguous masks.
    fn mask_to_plen(&self) -> Option<u8>;

    // Builds a dotted-quad netmask from a prefix length.
    fn plen_to_mask(plen: u8) -> Ipv4Addr;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    const LENGTH: usize;

    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Converts this IPv6 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv6Network;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> IpNetwork;

    // Returns true if this is a routable network.
    fn is_routable(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;

    // Returns the address of the remote endpoint on a point-to-point
    // subnet (/30 or /31), or `None` for any other prefix length.
    fn p2p_peer_addr(&self) -> Option<Ipv4Addr>;
}

// Extension methods for Ipv6Network.
pub trait Ipv6NetworkExt {
    const MAX_PREFIXLEN: u8;

    // Apply mask to prefix.
    #[must_use]
    fn apply_mask(&self) -> Ipv6Network;

    // Returns true if this is a host prefix.
    fn is_host_prefix(&self) -> bool;
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn is_usable(&self) -> bool {
        match self {
            IpAddr::V4(addr) => addr.is_usable(),
            IpAddr::V6(addr) => addr.is_usable(),
        }
    }

    fn to_host_prefix(&self) -> IpNetwork {
        match self {
            IpAddr::V4(addr) => addr.to_host_prefix().into(),
            IpAddr::V6(addr) => addr.to_host_prefix().into(),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    const LENGTH: usize = 4;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_broadcast() || self.is_multicast())
            && !self.is_unspecified()
    }

    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Ipv4Network::MAX_PREFIXLEN).unwrap()
    }

    fn mask_to_plen(&self) -> Option<u8> {
        let mask = u32::from(*self);
        let plen = mask.count_ones() as u8;
        (mask == Self::plen_to_mask(plen).into()).then_some(plen)
    }

    fn plen_to_mask(plen: u8) -> Ipv4Addr {
        let mask = u32::MAX
            .checked_shl(32 - plen as u32)
            .unwrap_or(0);
        Ipv4Addr::from(mask)
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    const LENGTH: usize = 16;

    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast()) && !self.is_unspecified()
    }

    fn to_host_prefix(&self) -> Ipv6Network {
        Ipv6Network::new(*self, Ipv6Network::MAX_PREFIXLEN).unwrap()
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn apply_mask(&self) -> IpNetwork {
        match self {
            IpNetwork::V4(network) => IpNetwork::V4(network.apply_mask()),
            IpNetwork::V6(network) => IpNetwork::V6(network.apply_mask()),
        }
    }

    fn is_routable(&self) -> bool {
        match self {
            IpNetwork::V4(network) => !network.ip().is_loopback(),
            IpNetwork::V6(network) => !network.ip().is_loopback(),
        }
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }

    fn p2p_peer_addr(&self) -> Option<Ipv4Addr> {
        let local = u32::from(self.ip());
        match self.prefix() {
            31 => Some(Ipv4Addr::from(local ^ 1)),
            30 => {
                let network = u32::from(self.network());
                let peer = match local - network {
                    1 => local + 1,
                    _ => local - 1,
                };
                Some(Ipv4Addr::from(peer))
            }
            _ => None,
        }
    }
}

// ===== impl Ipv6Network =====

impl Ipv6NetworkExt for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn apply_mask(&self) -> Ipv6Network {
        Ipv6Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == Self::MAX_PREFIXLEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_conversion() {
        let mask = Ipv4Addr::new(255, 255, 255, 252);
        assert_eq!(mask.mask_to_plen(), Some(30));
        assert_eq!(Ipv4Addr::plen_to_mask(30), mask);
        assert_eq!(Ipv4Addr::plen_to_mask(0), Ipv4Addr::UNSPECIFIED);

        // Non-contiguous masks are rejected.
        let mask = Ipv4Addr::new(255, 0, 255, 0);
        assert_eq!(mask.mask_to_plen(), None);
    }

    #[test]
    fn p2p_peer_resolution() {
        let net = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 1), 31).unwrap();
        assert_eq!(net.p2p_peer_addr(), Some(Ipv4Addr::new(10, 0, 0, 0)));

        let net = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 5), 30).unwrap();
        assert_eq!(net.p2p_peer_addr(), Some(Ipv4Addr::new(10, 0, 0, 6)));

        let net = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 6), 30).unwrap();
        assert_eq!(net.p2p_peer_addr(), Some(Ipv4Addr::new(10, 0, 0, 5)));

        let net = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 1), 24).unwrap();
        assert_eq!(net.p2p_peer_addr(), None);
    }
}
