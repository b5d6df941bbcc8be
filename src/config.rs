use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the batchboard engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Campaign identifier, shown on the dashboard.
    pub id: String,

    /// Campaign working directory holding the job store, the scheduler
    /// sample log, and per-dataset failure directories.
    pub workdir: PathBuf,

    /// Dashboard output directory. Default: "<workdir>/dashboard".
    #[serde(default)]
    pub outdir: Option<PathBuf>,

    /// Sample logs of secondary ("foreman") schedulers to include.
    #[serde(default)]
    pub foreman_logs: Vec<PathBuf>,

    /// Number of fixed-width time buckets per report window. Default: 100.
    #[serde(default = "default_buckets")]
    pub buckets: usize,

    /// Background refresh behavior.
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Failure-artifact retrieval behavior.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Sample-log counter kinds, merged over the built-in table.
    /// Counters not listed anywhere are treated as gauges.
    #[serde(default)]
    pub counters: HashMap<String, CounterKind>,

    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,
}

/// Background refresh configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Minimum interval between two renders. Default: 60s.
    #[serde(default = "default_min_interval", with = "humantime_serde")]
    pub min_interval: Duration,

    /// Period of the automatic trigger policy. Default: 15m.
    #[serde(default = "default_auto_period", with = "humantime_serde")]
    pub auto_period: Duration,
}

/// Failure-artifact retrieval configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Failure samples kept per error class. Default: 5.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Concurrent decompression workers. Default: 10.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Artifact file names looked up in each failure directory.
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<String>,
}

/// How a sample-log column behaves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Point-in-time value, taken as-is.
    Gauge,
    /// Monotone count since scheduler start; differenced per interval.
    Cumulative,
    /// Monotone accumulated time in microseconds since scheduler start;
    /// differenced per interval and converted to minutes.
    CumulativeMicros,
}

/// Built-in counter kinds for the scheduler's known cumulative columns.
pub fn default_counter_kinds() -> HashMap<String, CounterKind> {
    let mut kinds = HashMap::new();
    kinds.insert("total_workers_joined".to_string(), CounterKind::Cumulative);
    kinds.insert("total_workers_removed".to_string(), CounterKind::Cumulative);
    kinds.insert("total_send_time".to_string(), CounterKind::CumulativeMicros);
    kinds.insert(
        "total_receive_time".to_string(),
        CounterKind::CumulativeMicros,
    );
    kinds.insert(
        "total_create_time".to_string(),
        CounterKind::CumulativeMicros,
    );
    kinds.insert(
        "total_return_time".to_string(),
        CounterKind::CumulativeMicros,
    );
    kinds
}

// --- Default value functions ---

fn default_buckets() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_auto_period() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_sample_count() -> usize {
    5
}

fn default_workers() -> usize {
    10
}

fn default_artifacts() -> Vec<String> {
    vec!["task.log.gz".to_string(), "wrapper.log.gz".to_string()]
}

// --- Default trait impls ---

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_interval: default_min_interval(),
            auto_period: default_auto_period(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            workers: default_workers(),
            artifacts: default_artifacts(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("id is required");
        }

        if self.workdir.as_os_str().is_empty() {
            bail!("workdir is required");
        }

        if self.buckets == 0 {
            bail!("buckets must be positive");
        }

        if self.refresh.min_interval.is_zero() {
            bail!("refresh.min_interval must be positive");
        }

        if self.refresh.auto_period.is_zero() {
            bail!("refresh.auto_period must be positive");
        }

        if self.retrieval.sample_count == 0 {
            bail!("retrieval.sample_count must be positive");
        }

        if self.retrieval.workers == 0 {
            bail!("retrieval.workers must be positive");
        }

        Ok(())
    }

    /// Resolved dashboard output directory.
    pub fn outdir(&self) -> PathBuf {
        self.outdir
            .clone()
            .unwrap_or_else(|| self.workdir.join("dashboard"))
    }

    /// Counter kinds with user overrides applied over the built-in table.
    pub fn counter_kinds(&self) -> HashMap<String, CounterKind> {
        let mut kinds = default_counter_kinds();
        for (name, kind) in &self.counters {
            kinds.insert(name.clone(), *kind);
        }
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "id: run-2024\nworkdir: /data/run-2024\n"
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("valid yaml");
        cfg.validate().expect("valid config");

        assert_eq!(cfg.buckets, 100);
        assert_eq!(cfg.refresh.min_interval, Duration::from_secs(60));
        assert_eq!(cfg.refresh.auto_period, Duration::from_secs(900));
        assert_eq!(cfg.retrieval.sample_count, 5);
        assert_eq!(cfg.retrieval.workers, 10);
        assert_eq!(
            cfg.retrieval.artifacts,
            vec!["task.log.gz", "wrapper.log.gz"]
        );
        assert_eq!(cfg.outdir(), PathBuf::from("/data/run-2024/dashboard"));
    }

    #[test]
    fn test_missing_id_rejected() {
        let cfg: Config = serde_yaml::from_str("id: \"\"\nworkdir: /data\n").expect("valid yaml");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let cfg: Config =
            serde_yaml::from_str("id: x\nworkdir: /data\nbuckets: 0\n").expect("valid yaml");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_counter_kind_overrides_merge() {
        let yaml = "id: x\nworkdir: /data\ncounters:\n  queue_depth: gauge\n  total_send_time: cumulative\n";
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        let kinds = cfg.counter_kinds();

        // Built-in entry survives.
        assert_eq!(
            kinds.get("total_workers_joined"),
            Some(&CounterKind::Cumulative)
        );
        // Override wins over the built-in table.
        assert_eq!(kinds.get("total_send_time"), Some(&CounterKind::Cumulative));
        assert_eq!(kinds.get("queue_depth"), Some(&CounterKind::Gauge));
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = "id: x\nworkdir: /data\nrefresh:\n  min_interval: 2m\n  auto_period: 1h\n";
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.refresh.min_interval, Duration::from_secs(120));
        assert_eq!(cfg.refresh.auto_period, Duration::from_secs(3600));
    }
}
