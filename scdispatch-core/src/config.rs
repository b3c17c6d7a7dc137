//! Configuration, following an embedded-default-plus-override-merge
//! pattern: `include_str!` of a packaged `config.toml` deserialized with
//! `toml`, then merged against anything the caller supplies.
//!
//! This crate has no filesystem of its own — callers live in a browser or
//! an embedding host, not on a machine with a config directory — so there
//! is no `Config::load()` that reads a user file from disk. Instead
//! `Config::from_overrides` merges the embedded default against an
//! explicit, in-memory [`ConfigOverrides`] the facade receives from
//! `init(config)`.

use serde::Deserialize;

use crate::error::DispatchError;

const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml");

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "lookaheadSeconds")]
    lookahead_seconds: f64,
    #[serde(rename = "dispatchLeadSeconds")]
    dispatch_lead_seconds: f64,
    #[serde(rename = "preschedulerPollIntervalMs")]
    prescheduler_poll_interval_ms: u64,
    #[serde(rename = "preschedulerCapacity")]
    prescheduler_capacity: usize,
    #[serde(rename = "engineSchedulerCapacity")]
    engine_scheduler_capacity: usize,
    #[serde(rename = "engineSchedulerSlotBytes")]
    engine_scheduler_slot_bytes: usize,
    #[serde(rename = "inboundRingBytes")]
    inbound_ring_bytes: usize,
    #[serde(rename = "outboundRingBytes")]
    outbound_ring_bytes: usize,
    #[serde(rename = "debugRingBytes")]
    debug_ring_bytes: usize,
    #[serde(rename = "ntpIdentifierType")]
    ntp_identifier_type: String,
}

/// Resolved, validated configuration. Construct via [`Config::from_overrides`];
/// there is no public constructor that skips validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub lookahead_seconds: f64,
    pub dispatch_lead_seconds: f64,
    pub prescheduler_poll_interval_ms: u64,
    pub prescheduler_capacity: usize,
    pub engine_scheduler_capacity: usize,
    pub engine_scheduler_slot_bytes: usize,
    pub inbound_ring_bytes: usize,
    pub outbound_ring_bytes: usize,
    pub debug_ring_bytes: usize,
    pub ntp_identifier_tag: u8,
}

/// Caller-supplied overrides, as passed to `init(config)`.
/// `None` leaves the embedded default in place for that field.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub lookahead_seconds: Option<f64>,
    pub dispatch_lead_seconds: Option<f64>,
    pub prescheduler_poll_interval_ms: Option<u64>,
    pub prescheduler_capacity: Option<usize>,
    pub engine_scheduler_capacity: Option<usize>,
    pub engine_scheduler_slot_bytes: Option<usize>,
    pub inbound_ring_bytes: Option<usize>,
    pub outbound_ring_bytes: Option<usize>,
    pub debug_ring_bytes: Option<usize>,
    pub ntp_identifier_tag: Option<u8>,
}

impl Config {
    /// Merges `overrides` over the embedded default, then validates.
    /// A "Configuration invalid" error is thrown synchronously here,
    /// before anything else in `init` runs.
    pub fn from_overrides(overrides: &ConfigOverrides) -> Result<Self, DispatchError> {
        let defaults: ConfigFile = toml::from_str(DEFAULT_CONFIG_TOML)
            .expect("embedded default config.toml must parse");

        let ntp_identifier_tag = overrides
            .ntp_identifier_tag
            .or_else(|| defaults.ntp_identifier_type.as_bytes().first().copied())
            .unwrap_or(crate::osc::DEFAULT_IDENTIFIER_TAG);

        let config = Config {
            lookahead_seconds: overrides.lookahead_seconds.unwrap_or(defaults.lookahead_seconds),
            dispatch_lead_seconds: overrides
                .dispatch_lead_seconds
                .unwrap_or(defaults.dispatch_lead_seconds),
            prescheduler_poll_interval_ms: overrides
                .prescheduler_poll_interval_ms
                .unwrap_or(defaults.prescheduler_poll_interval_ms),
            prescheduler_capacity: overrides
                .prescheduler_capacity
                .unwrap_or(defaults.prescheduler_capacity),
            engine_scheduler_capacity: overrides
                .engine_scheduler_capacity
                .unwrap_or(defaults.engine_scheduler_capacity),
            engine_scheduler_slot_bytes: overrides
                .engine_scheduler_slot_bytes
                .unwrap_or(defaults.engine_scheduler_slot_bytes),
            inbound_ring_bytes: overrides.inbound_ring_bytes.unwrap_or(defaults.inbound_ring_bytes),
            outbound_ring_bytes: overrides
                .outbound_ring_bytes
                .unwrap_or(defaults.outbound_ring_bytes),
            debug_ring_bytes: overrides.debug_ring_bytes.unwrap_or(defaults.debug_ring_bytes),
            ntp_identifier_tag,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if !self.lookahead_seconds.is_finite() || self.lookahead_seconds < 0.0 {
            return Err(DispatchError::InvalidConfig("lookaheadSeconds must be finite and >= 0".into()));
        }
        if !self.dispatch_lead_seconds.is_finite() || self.dispatch_lead_seconds < 0.0 {
            return Err(DispatchError::InvalidConfig("dispatchLeadSeconds must be finite and >= 0".into()));
        }
        if self.prescheduler_poll_interval_ms == 0 {
            return Err(DispatchError::InvalidConfig("preschedulerPollIntervalMs must be > 0".into()));
        }
        if self.prescheduler_capacity == 0 {
            return Err(DispatchError::InvalidConfig("preschedulerCapacity must be > 0".into()));
        }
        if self.engine_scheduler_capacity == 0 {
            return Err(DispatchError::InvalidConfig("engineSchedulerCapacity must be > 0".into()));
        }
        if self.engine_scheduler_slot_bytes < 64 {
            return Err(DispatchError::InvalidConfig("engineSchedulerSlotBytes must be >= 64".into()));
        }
        for (name, bytes) in [
            ("inboundRingBytes", self.inbound_ring_bytes),
            ("outboundRingBytes", self.outbound_ring_bytes),
            ("debugRingBytes", self.debug_ring_bytes),
        ] {
            if bytes <= 4 {
                return Err(DispatchError::InvalidConfig(format!("{name} must exceed 4 bytes")));
            }
        }
        if !self.ntp_identifier_tag.is_ascii_graphic() {
            return Err(DispatchError::InvalidConfig("ntpIdentifierType must be a printable ASCII character".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses_and_validates() {
        let config = Config::from_overrides(&ConfigOverrides::default()).unwrap();
        assert_eq!(config.lookahead_seconds, 0.5);
        assert_eq!(config.dispatch_lead_seconds, 0.1);
        assert_eq!(config.prescheduler_poll_interval_ms, 25);
        assert_eq!(config.prescheduler_capacity, 65_536);
        assert_eq!(config.ntp_identifier_tag, b'u');
    }

    #[test]
    fn overrides_take_priority_over_defaults() {
        let overrides = ConfigOverrides { lookahead_seconds: Some(1.5), ..Default::default() };
        let config = Config::from_overrides(&overrides).unwrap();
        assert_eq!(config.lookahead_seconds, 1.5);
        assert_eq!(config.dispatch_lead_seconds, 0.1);
    }

    #[test]
    fn negative_lookahead_is_rejected() {
        let overrides = ConfigOverrides { lookahead_seconds: Some(-1.0), ..Default::default() };
        assert!(Config::from_overrides(&overrides).is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let overrides = ConfigOverrides { prescheduler_poll_interval_ms: Some(0), ..Default::default() };
        assert!(Config::from_overrides(&overrides).is_err());
    }
}
