//! Runtime configuration for a dispatch run.
//!
//! Kept as a plain serializable struct, independent of [`crate::engine::DispatchEngineBuilder`],
//! so a host process can load it from a config file or environment and pass it straight
//! through — wiring up a CLI or file format for it is out of scope here.

use serde::{Deserialize, Serialize};

fn default_worker_count() -> usize {
    4
}

fn default_max_parallel_per_table() -> u32 {
    2
}

/// Tunables for one restore run. `no_data` mirrors myloader's `--no-data`: schema is
/// still created, but no data-worker threads are spawned and no data jobs ever
/// dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_max_parallel_per_table")]
    pub max_parallel_per_table: u32,

    #[serde(default)]
    pub no_data: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_parallel_per_table: default_max_parallel_per_table(),
            no_data: false,
        }
    }
}

impl DispatcherConfig {
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct DispatcherConfigBuilder {
    worker_count: Option<usize>,
    max_parallel_per_table: Option<u32>,
    no_data: bool,
}

impl DispatcherConfigBuilder {
    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = Some(n);
        self
    }

    pub fn max_parallel_per_table(mut self, n: u32) -> Self {
        self.max_parallel_per_table = Some(n);
        self
    }

    pub fn no_data(mut self, enabled: bool) -> Self {
        self.no_data = enabled;
        self
    }

    pub fn build(self) -> DispatcherConfig {
        DispatcherConfig {
            worker_count: self.worker_count.unwrap_or_else(default_worker_count),
            max_parallel_per_table: self
                .max_parallel_per_table
                .unwrap_or_else(default_max_parallel_per_table),
            no_data: self.no_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default_impl() {
        let built = DispatcherConfig::builder().build();
        let default = DispatcherConfig::default();
        assert_eq!(built.worker_count, default.worker_count);
        assert_eq!(built.max_parallel_per_table, default.max_parallel_per_table);
        assert_eq!(built.no_data, default.no_data);
    }

    #[test]
    fn no_data_disables_workers_via_config() {
        let cfg = DispatcherConfig::builder().no_data(true).worker_count(8).build();
        assert!(cfg.no_data);
        assert_eq!(cfg.worker_count, 8);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = DispatcherConfig::builder().worker_count(6).build();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DispatcherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_count, 6);
    }
}
