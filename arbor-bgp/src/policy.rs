//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Instant;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

//
// Route-flap damping (RFC 2439).
//
// A penalty accumulates on every withdraw and decays exponentially with
// the configured half-life. Routes whose penalty exceeds the suppress
// threshold are not announced until the penalty decays below the reuse
// threshold.
//

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct DampingCfg {
    pub enabled: bool,
    pub half_life_secs: u64,
    pub suppress_threshold: f64,
    pub reuse_threshold: f64,
    pub max_penalty: f64,
}

#[derive(Debug, Default)]
pub struct DampingState {
    entries: BTreeMap<(IpAddr, IpNetwork), DampingEntry>,
}

#[derive(Debug)]
struct DampingEntry {
    penalty: f64,
    last_updated: Instant,
    suppressed: bool,
}

// Penalty added by a single flap.
const FLAP_PENALTY: f64 = 1000.0;

// ===== impl DampingCfg =====

impl Default for DampingCfg {
    fn default() -> DampingCfg {
        DampingCfg {
            enabled: false,
            half_life_secs: 900,
            suppress_threshold: 2000.0,
            reuse_threshold: 750.0,
            max_penalty: 16000.0,
        }
    }
}

// ===== impl DampingState =====

impl DampingState {
    // Records a flap (withdraw) of the given prefix and returns whether
    // the route is now suppressed.
    pub(crate) fn flap(
        &mut self,
        config: &DampingCfg,
        peer: IpAddr,
        prefix: IpNetwork,
    ) -> bool {
        let now = Instant::now();
        let entry = self
            .entries
            .entry((peer, prefix))
            .or_insert_with(|| DampingEntry {
                penalty: 0.0,
                last_updated: now,
                suppressed: false,
            });

        entry.decay(config, now);
        entry.penalty = (entry.penalty + FLAP_PENALTY).min(config.max_penalty);
        entry.last_updated = now;
        if entry.penalty >= config.suppress_threshold {
            entry.suppressed = true;
        }
        entry.suppressed
    }

    // Returns whether the given prefix is currently suppressed, applying
    // the exponential decay first.
    pub(crate) fn is_suppressed(
        &mut self,
        config: &DampingCfg,
        peer: IpAddr,
        prefix: IpNetwork,
    ) -> bool {
        let now = Instant::now();
        let Some(entry) = self.entries.get_mut(&(peer, prefix)) else {
            return false;
        };

        entry.decay(config, now);
        entry.last_updated = now;
        if entry.suppressed && entry.penalty < config.reuse_threshold {
            entry.suppressed = false;
        }
        let suppressed = entry.suppressed;
        if entry.penalty < 1.0 {
            self.entries.remove(&(peer, prefix));
            return false;
        }
        suppressed
    }

    pub(crate) fn clear_peer(&mut self, peer: IpAddr) {
        self.entries.retain(|(entry_peer, _), _| *entry_peer != peer);
    }
}

impl DampingEntry {
    fn decay(&mut self, config: &DampingCfg, now: Instant) {
        let elapsed = now.duration_since(self.last_updated).as_secs_f64();
        let half_life = config.half_life_secs as f64;
        self.penalty *= 0.5f64.powf(elapsed / half_life);
    }
}

//
// RPKI origin validation.
//
// Validation states follow RFC 6811: a prefix is Valid if a covering ROA
// authorizes its origin AS at its prefix length, Invalid if covering ROAs
// exist but none match, and NotFound otherwise.
//

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RpkiCfg {
    pub enabled: bool,
    pub reject_invalid: bool,
    pub roas: Vec<Roa>,
}

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Roa {
    pub prefix: IpNetwork,
    pub max_length: u8,
    pub asn: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RpkiValidationState {
    Valid,
    Invalid,
    NotFound,
}

// ===== impl RpkiCfg =====

impl Default for RpkiCfg {
    fn default() -> RpkiCfg {
        RpkiCfg {
            enabled: false,
            reject_invalid: true,
            roas: vec![],
        }
    }
}

impl RpkiCfg {
    // Validates the origin AS of a prefix against the loaded ROA set.
    pub(crate) fn validate(
        &self,
        prefix: &IpNetwork,
        origin_as: Option<u32>,
    ) -> RpkiValidationState {
        let covering = self
            .roas
            .iter()
            .filter(|roa| {
                roa.prefix.contains(prefix.ip())
                    && roa.prefix.prefix() <= prefix.prefix()
            })
            .collect::<Vec<_>>();

        if covering.is_empty() {
            return RpkiValidationState::NotFound;
        }

        let valid = covering.iter().any(|roa| {
            Some(roa.asn) == origin_as && prefix.prefix() <= roa.max_length
        });
        match valid {
            true => RpkiValidationState::Valid,
            false => RpkiValidationState::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpki_validation_states() {
        let config = RpkiCfg {
            enabled: true,
            reject_invalid: true,
            roas: vec![Roa {
                prefix: "10.10.0.0/16".parse().unwrap(),
                max_length: 24,
                asn: 65002,
            }],
        };

        // Authorized origin within the max length.
        let prefix: IpNetwork = "10.10.10.0/24".parse().unwrap();
        assert_eq!(
            config.validate(&prefix, Some(65002)),
            RpkiValidationState::Valid
        );

        // Wrong origin AS.
        assert_eq!(
            config.validate(&prefix, Some(65099)),
            RpkiValidationState::Invalid
        );

        // Prefix longer than the authorized maximum.
        let prefix: IpNetwork = "10.10.10.0/25".parse().unwrap();
        assert_eq!(
            config.validate(&prefix, Some(65002)),
            RpkiValidationState::Invalid
        );

        // No covering ROA.
        let prefix: IpNetwork = "192.168.1.0/24".parse().unwrap();
        assert_eq!(
            config.validate(&prefix, Some(65002)),
            RpkiValidationState::NotFound
        );
    }

    #[test]
    fn damping_suppress_and_reuse() {
        let config = DampingCfg {
            enabled: true,
            half_life_secs: 900,
            suppress_threshold: 2000.0,
            reuse_threshold: 750.0,
            max_penalty: 16000.0,
        };
        let mut state = DampingState::default();
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let prefix: IpNetwork = "10.10.10.0/24".parse().unwrap();

        // A single flap does not suppress.
        assert!(!state.flap(&config, peer, prefix));
        assert!(!state.is_suppressed(&config, peer, prefix));

        // Two more flaps push the penalty past the suppress threshold.
        state.flap(&config, peer, prefix);
        assert!(state.flap(&config, peer, prefix));
        assert!(state.is_suppressed(&config, peer, prefix));

        // Without decay time the route stays suppressed.
        assert!(state.is_suppressed(&config, peer, prefix));
    }
}
