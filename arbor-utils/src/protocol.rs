//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// The protocols Arbor supports.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    DIRECT,
    STATIC,
    OSPFV2,
    ISIS,
    BGP,
}

// ===== impl Protocol =====

impl Protocol {
    /// Default administrative distance, ordering route sources as
    /// connected > static > OSPF > IS-IS > BGP. BGP distances are refined
    /// by the RIB depending on the route type (iBGP before eBGP).
    pub fn default_distance(&self) -> u8 {
        match self {
            Protocol::DIRECT => 0,
            Protocol::STATIC => 1,
            Protocol::OSPFV2 => 110,
            Protocol::ISIS => 115,
            Protocol::BGP => 200,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::STATIC => write!(f, "static"),
            Protocol::OSPFV2 => write!(f, "ospfv2"),
            Protocol::ISIS => write!(f, "isis"),
            Protocol::BGP => write!(f, "bgp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "direct" => Ok(Protocol::DIRECT),
            "static" => Ok(Protocol::STATIC),
            "ospfv2" | "ospf" => Ok(Protocol::OSPFV2),
            "isis" => Ok(Protocol::ISIS),
            "bgp" => Ok(Protocol::BGP),
            _ => Err(()),
        }
    }
}
