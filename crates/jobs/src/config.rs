// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime configuration for [`crate::manager::JobManager`].
//!
//! `serde`-serializable so a host application can load it from a config
//! file rather than hand-assembling capability bits in code.

use crate::error::Error;
use crate::priority::RunnerCapability;

/// One [`RunnerCapability`] (as raw bits, for a stable wire format) per
/// runner the manager should create. The default asks for one
/// general-purpose runner per available core — one that serves every
/// priority band.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct JobManagerConfig {
    /// `runner_capability_bits[i]` is `RunnerCapability::bits()` for the
    /// priority bands runner `i` serves. This is independent of
    /// `Job::affinity_mask`, which names *which runner indices* a job may
    /// run on — a job only ever runs on runner `i` when both its affinity
    /// mask includes bit `i` and runner `i`'s capability serves the job's
    /// priority band (§4.I).
    pub runner_capability_bits: Vec<u64>,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        let runner_count = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get).min(crate::manager::MAX_RUNNERS);
        Self { runner_capability_bits: vec![RunnerCapability::all().bits(); runner_count] }
    }
}

impl JobManagerConfig {
    /// Parses a config from JSON, e.g. a file loaded by the host
    /// application at startup.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if `json` doesn't deserialize into
    /// a `JobManagerConfig`.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::InvalidConfig)
    }

    /// Builds a config with `runner_count` general-purpose runners plus a
    /// final runner exclusively reserved for `capability` (the source's
    /// pattern for e.g. a dedicated render-thread runner). Pin the target
    /// job's own `affinity_mask` to that runner's index to actually route
    /// work there — capability alone only says which priority bands the
    /// runner serves, not which runner indices a job is allowed on.
    #[must_use]
    pub fn with_exclusive_runner(mut runner_count: usize, capability: RunnerCapability) -> Self {
        runner_count = runner_count.max(1);
        let mut bits = vec![RunnerCapability::all().bits(); runner_count];
        bits.push(capability.bits());
        Self { runner_capability_bits: bits }
    }

    pub(crate) fn capabilities(&self) -> Vec<RunnerCapability> {
        self.runner_capability_bits.iter().map(|&bits| RunnerCapability::from_bits_truncate(bits)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_at_least_one_runner() {
        assert!(!JobManagerConfig::default().runner_capability_bits.is_empty());
    }

    #[test]
    fn parses_from_json() {
        let config = JobManagerConfig::from_json(r#"{"runner_capability_bits": [1, 2, 3]}"#).unwrap();
        assert_eq!(config.runner_capability_bits, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(JobManagerConfig::from_json("not json").is_err());
    }

    #[test]
    fn exclusive_runner_is_appended_last() {
        let config = JobManagerConfig::with_exclusive_runner(2, RunnerCapability::EFFICIENCY);
        assert_eq!(config.runner_capability_bits.len(), 3);
        assert_eq!(*config.runner_capability_bits.last().unwrap(), RunnerCapability::EFFICIENCY.bits());
    }

    #[test]
    fn capabilities_round_trip_through_bits() {
        let config = JobManagerConfig { runner_capability_bits: vec![RunnerCapability::HIGH_PERF.bits(), RunnerCapability::EFFICIENCY.bits()] };
        assert_eq!(config.capabilities(), vec![RunnerCapability::HIGH_PERF, RunnerCapability::EFFICIENCY]);
    }
}
