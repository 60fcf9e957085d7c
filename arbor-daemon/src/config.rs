//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use arbor_bgp::neighbor::NeighborCfg as BgpNeighborCfg;
use arbor_bgp::policy::{DampingCfg, RpkiCfg};
use arbor_isis::packet::{AreaAddr, LevelType, SystemId};
use arbor_ospf::interface::InterfaceType as OspfInterfaceType;
use arbor_routing::redistribution::RedistributionCfg;
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub router_id: Option<Ipv4Addr>,
    pub logging: Logging,
    pub redistribution: RedistributionCfg,
    pub interfaces: Vec<InterfaceConfig>,
    pub static_routes: Vec<StaticRoute>,
    pub ospf: Option<OspfConfig>,
    pub isis: Option<IsisConfig>,
    pub bgp: Option<BgpConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

// Interfaces are created once at startup and not reconfigured.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: Ipv4Network,
    #[serde(default = "dflt_mtu")]
    pub mtu: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticRoute {
    pub prefix: IpNetwork,
    pub nexthop: Option<IpAddr>,
    #[serde(default = "dflt_static_metric")]
    pub metric: u32,
}

//
// OSPF.
//

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OspfConfig {
    pub router_id: Option<Ipv4Addr>,
    pub area_id: Ipv4Addr,
    pub spf_delay: u64,
    pub spf_interval: u64,
    pub interfaces: Vec<OspfInterfaceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OspfInterfaceConfig {
    pub name: String,
    pub source_ip: Option<Ipv4Addr>,
    #[serde(default = "dflt_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "dflt_dead_interval")]
    pub dead_interval: u32,
    #[serde(default = "dflt_rxmt_interval")]
    pub rxmt_interval: u16,
    #[serde(default = "dflt_network_type")]
    pub network_type: OspfInterfaceType,
    pub unicast_peer: Option<Ipv4Addr>,
    #[serde(default = "dflt_cost")]
    pub cost: u16,
    #[serde(default = "dflt_priority")]
    pub priority: u8,
    #[serde(default)]
    pub passive: bool,
}

//
// IS-IS.
//

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsisConfig {
    // Dotted form, e.g. "1921.6800.1001".
    pub system_id: String,
    // Up to three area addresses, e.g. "49.0001".
    pub area_addresses: Vec<String>,
    pub level: LevelType,
    pub spf_delay: u64,
    pub spf_interval: u64,
    pub interfaces: Vec<IsisInterfaceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsisInterfaceConfig {
    pub name: String,
    #[serde(default = "dflt_isis_metric")]
    pub metric: u32,
    #[serde(default = "dflt_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "dflt_hello_multiplier")]
    pub hello_multiplier: u16,
    #[serde(default = "dflt_circuit_type")]
    pub circuit_type: arbor_isis::interface::InterfaceType,
    #[serde(default = "dflt_isis_priority")]
    pub priority: u8,
    #[serde(default)]
    pub passive: bool,
    #[serde(default = "dflt_wide_metrics")]
    pub wide_metrics: bool,
    #[serde(default = "dflt_csnp_interval")]
    pub csnp_interval: u16,
}

//
// BGP.
//

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BgpConfig {
    pub local_as: u32,
    pub router_id: Option<Ipv4Addr>,
    pub listen_ip: IpAddr,
    pub listen_port: u16,
    pub networks: Vec<IpNetwork>,
    pub peers: Vec<BgpPeerConfig>,
    pub damping: DampingCfg,
    pub rpki: RpkiCfg,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BgpPeerConfig {
    pub ip: IpAddr,
    pub remote_as: u32,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub rr_client: bool,
    #[serde(default = "dflt_hold_time")]
    pub hold_time: u16,
    #[serde(default = "dflt_connect_retry")]
    pub connect_retry: u16,
    pub md5_key: Option<String>,
    #[serde(default)]
    pub damping: bool,
    #[serde(default)]
    pub graceful_restart: bool,
    #[serde(default)]
    pub flowspec: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/arbord.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Result<Config, String> {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        let config_str = std::fs::read_to_string(config_file)
            .map_err(|error| {
                format!("failed to load configuration file: {error}")
            })?;
        let config: Config = toml::from_str(&config_str).map_err(|error| {
            format!("failed to parse configuration file: {error}")
        })?;
        config.validate()?;
        Ok(config)
    }

    // Configuration is rejected before anything starts.
    fn validate(&self) -> Result<(), String> {
        if self.interfaces.is_empty() {
            return Err("no interfaces configured".to_owned());
        }

        let router_id = self.router_id();
        if router_id.is_unspecified() {
            return Err("a non-zero router-id is required".to_owned());
        }

        for iface in &self.interfaces {
            if self
                .interfaces
                .iter()
                .filter(|other| other.name == iface.name)
                .count()
                > 1
            {
                return Err(format!("duplicate interface: {}", iface.name));
            }
        }

        if let Some(ospf) = &self.ospf {
            for iface in &ospf.interfaces {
                if !self.interfaces.iter().any(|i| i.name == iface.name) {
                    return Err(format!(
                        "ospf references unknown interface: {}",
                        iface.name
                    ));
                }
                if iface.dead_interval <= iface.hello_interval as u32 {
                    return Err(format!(
                        "ospf dead-interval must exceed hello-interval on {}",
                        iface.name
                    ));
                }
            }
        }

        if let Some(isis) = &self.isis {
            parse_system_id(&isis.system_id)?;
            if isis.area_addresses.is_empty()
                || isis.area_addresses.len() > 3
            {
                return Err(
                    "between one and three area addresses are required"
                        .to_owned(),
                );
            }
            for area in &isis.area_addresses {
                parse_area_addr(area)?;
            }
            for iface in &isis.interfaces {
                if !self.interfaces.iter().any(|i| i.name == iface.name) {
                    return Err(format!(
                        "isis references unknown interface: {}",
                        iface.name
                    ));
                }
            }
        }

        if let Some(bgp) = &self.bgp {
            if bgp.local_as == 0 {
                return Err("bgp local-as must be non-zero".to_owned());
            }
            for peer in &bgp.peers {
                if peer.remote_as == 0 {
                    return Err(format!(
                        "bgp peer {} remote-as must be non-zero",
                        peer.ip
                    ));
                }
                if peer.hold_time != 0 && peer.hold_time < 3 {
                    return Err(format!(
                        "bgp peer {} hold-time must be zero or at least 3",
                        peer.ip
                    ));
                }
            }
        }

        Ok(())
    }

    // Router-id shared across protocols, overridable per protocol.
    pub(crate) fn router_id(&self) -> Ipv4Addr {
        self.router_id
            .or(self.ospf.as_ref().and_then(|ospf| ospf.router_id))
            .or(self.bgp.as_ref().and_then(|bgp| bgp.router_id))
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) fn interface(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }
}

// ===== default values =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

impl Default for LoggingFmtStyle {
    fn default() -> LoggingFmtStyle {
        LoggingFmtStyle::Full
    }
}

impl Default for OspfConfig {
    fn default() -> OspfConfig {
        OspfConfig {
            router_id: None,
            area_id: Ipv4Addr::UNSPECIFIED,
            spf_delay: arbor_ospf::spf::DFLT_SPF_DELAY,
            spf_interval: arbor_ospf::spf::DFLT_SPF_INTERVAL,
            interfaces: vec![],
        }
    }
}

impl Default for IsisConfig {
    fn default() -> IsisConfig {
        IsisConfig {
            system_id: String::new(),
            area_addresses: vec![],
            level: LevelType::All,
            spf_delay: arbor_isis::spf::DFLT_SPF_DELAY,
            spf_interval: arbor_isis::spf::DFLT_SPF_INTERVAL,
            interfaces: vec![],
        }
    }
}

impl Default for BgpConfig {
    fn default() -> BgpConfig {
        BgpConfig {
            local_as: 0,
            router_id: None,
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 179,
            networks: vec![],
            peers: vec![],
            damping: Default::default(),
            rpki: Default::default(),
        }
    }
}

const fn dflt_mtu() -> u16 {
    1500
}

const fn dflt_static_metric() -> u32 {
    1
}

const fn dflt_hello_interval() -> u16 {
    10
}

const fn dflt_dead_interval() -> u32 {
    40
}

const fn dflt_rxmt_interval() -> u16 {
    5
}

const fn dflt_network_type() -> OspfInterfaceType {
    OspfInterfaceType::Broadcast
}

const fn dflt_cost() -> u16 {
    1
}

const fn dflt_priority() -> u8 {
    1
}

const fn dflt_isis_metric() -> u32 {
    10
}

const fn dflt_hello_multiplier() -> u16 {
    3
}

const fn dflt_circuit_type() -> arbor_isis::interface::InterfaceType {
    arbor_isis::interface::InterfaceType::Broadcast
}

const fn dflt_isis_priority() -> u8 {
    64
}

const fn dflt_wide_metrics() -> bool {
    true
}

const fn dflt_csnp_interval() -> u16 {
    10
}

const fn dflt_hold_time() -> u16 {
    90
}

const fn dflt_connect_retry() -> u16 {
    120
}

// ===== helper functions =====

// Parses a system-id in the dotted form "1921.6800.1001".
pub(crate) fn parse_system_id(value: &str) -> Result<SystemId, String> {
    let digits = value
        .chars()
        .filter(|c| *c != '.')
        .collect::<String>();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid system-id: {value}"));
    }
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
            .map_err(|_| format!("invalid system-id: {value}"))?;
    }
    Ok(SystemId::from(bytes))
}

// Parses an area address in the dotted form "49.0001".
pub(crate) fn parse_area_addr(value: &str) -> Result<AreaAddr, String> {
    let digits = value
        .chars()
        .filter(|c| *c != '.')
        .collect::<String>();
    if digits.is_empty()
        || digits.len() % 2 != 0
        || digits.len() > 2 * AreaAddr::MAX_LEN as usize
        || !digits.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(format!("invalid area address: {value}"));
    }
    let mut bytes = vec![];
    for i in 0..digits.len() / 2 {
        bytes.push(
            u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("invalid area address: {value}"))?,
        );
    }
    Ok(AreaAddr::from(bytes.as_slice()))
}

// Builds the per-protocol instance configurations from the validated
// daemon configuration.
pub(crate) fn ospf_instance_cfg(
    config: &Config,
    ifindexes: &BTreeMap<String, u32>,
) -> Option<arbor_ospf::instance::InstanceCfg> {
    let ospf = config.ospf.as_ref()?;
    let mut interfaces = BTreeMap::new();
    for iface in &ospf.interfaces {
        let iface_cfg = config.interface(&iface.name)?;
        interfaces.insert(
            iface.name.clone(),
            arbor_ospf::interface::InterfaceCfg {
                ifindex: ifindexes.get(&iface.name).copied().unwrap_or(0),
                addr: iface_cfg.address,
                mtu: iface_cfg.mtu,
                if_type: iface.network_type,
                hello_interval: iface.hello_interval,
                dead_interval: iface.dead_interval,
                rxmt_interval: iface.rxmt_interval,
                cost: iface.cost,
                priority: iface.priority,
                source_ip: iface.source_ip,
                unicast_peer: iface.unicast_peer,
                passive: iface.passive,
            },
        );
    }

    Some(arbor_ospf::instance::InstanceCfg {
        router_id: ospf.router_id.unwrap_or_else(|| config.router_id()),
        area_id: ospf.area_id,
        spf_delay: ospf.spf_delay,
        spf_interval: ospf.spf_interval,
        interfaces,
    })
}

pub(crate) fn isis_instance_cfg(
    config: &Config,
    ifindexes: &BTreeMap<String, u32>,
    macs: &BTreeMap<String, [u8; 6]>,
) -> Option<arbor_isis::instance::InstanceCfg> {
    let isis = config.isis.as_ref()?;
    let system_id = parse_system_id(&isis.system_id).ok()?;
    let area_addrs = isis
        .area_addresses
        .iter()
        .map(|area| parse_area_addr(area))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    let mut interfaces = BTreeMap::new();
    for iface in &isis.interfaces {
        let iface_cfg = config.interface(&iface.name)?;
        interfaces.insert(
            iface.name.clone(),
            arbor_isis::interface::InterfaceCfg {
                ifindex: ifindexes.get(&iface.name).copied().unwrap_or(0),
                addr: iface_cfg.address,
                snpa: macs.get(&iface.name).copied().unwrap_or([0; 6]),
                circuit_type: iface.circuit_type,
                level_type: isis.level,
                metric: iface.metric,
                hello_interval: iface.hello_interval,
                hello_multiplier: iface.hello_multiplier,
                priority: iface.priority,
                passive: iface.passive,
                wide_metrics: iface.wide_metrics,
                csnp_interval: iface.csnp_interval,
            },
        );
    }

    Some(arbor_isis::instance::InstanceCfg {
        system_id,
        area_addrs,
        level_type: isis.level,
        spf_delay: isis.spf_delay,
        spf_interval: isis.spf_interval,
        interfaces,
    })
}

pub(crate) fn bgp_instance_cfg(
    config: &Config,
) -> Option<arbor_bgp::instance::InstanceCfg> {
    let bgp = config.bgp.as_ref()?;
    let neighbors = bgp
        .peers
        .iter()
        .map(|peer| {
            (
                peer.ip,
                BgpNeighborCfg {
                    remote_as: peer.remote_as,
                    passive: peer.passive,
                    rr_client: peer.rr_client,
                    holdtime: peer.hold_time,
                    connect_retry: peer.connect_retry,
                    md5_key: peer.md5_key.clone(),
                    damping: peer.damping,
                    graceful_restart: peer.graceful_restart,
                    flowspec: peer.flowspec,
                },
            )
        })
        .collect();

    Some(arbor_bgp::instance::InstanceCfg {
        asn: bgp.local_as,
        router_id: bgp.router_id.unwrap_or_else(|| config.router_id()),
        listen_addr: bgp.listen_ip,
        listen_port: bgp.listen_port,
        networks: bgp.networks.clone(),
        neighbors,
        rr_clients: Default::default(),
        damping: bgp.damping.clone(),
        rpki: bgp.rpki.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_id_parsing() {
        let system_id = parse_system_id("1921.6800.1001").unwrap();
        assert_eq!(
            system_id,
            SystemId::from([0x19, 0x21, 0x68, 0x00, 0x10, 0x01])
        );
        assert!(parse_system_id("1921.6800").is_err());
        assert!(parse_system_id("zzzz.6800.1001").is_err());
    }

    #[test]
    fn area_addr_parsing() {
        let area = parse_area_addr("49.0001").unwrap();
        assert_eq!(area.as_slice(), &[0x49, 0x00, 0x01]);
        assert!(parse_area_addr("").is_err());
        assert!(parse_area_addr("49.001").is_err());
    }

    #[test]
    fn config_validation() {
        let config: Config = toml::from_str(
            r#"
            router_id = "1.1.1.1"

            [[interfaces]]
            name = "eth0"
            address = "10.0.0.1/30"

            [ospf]
            area_id = "0.0.0.0"

            [[ospf.interfaces]]
            name = "eth0"
            network_type = "point-to-point"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        // Unknown interface references are rejected.
        let config: Config = toml::from_str(
            r#"
            router_id = "1.1.1.1"

            [[interfaces]]
            name = "eth0"
            address = "10.0.0.1/30"

            [ospf]
            area_id = "0.0.0.0"

            [[ospf.interfaces]]
            name = "eth99"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        // A router-id is mandatory.
        let config: Config = toml::from_str(
            r#"
            [[interfaces]]
            name = "eth0"
            address = "10.0.0.1/30"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
