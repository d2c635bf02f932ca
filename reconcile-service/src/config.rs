use serde::Deserialize;
use std::{fs, io::ErrorKind, path::PathBuf};

use crate::{pricing::PricingConfig, store::DedupPolicy};

pub const CONFIG_ENV: &str = "RECONCILE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "reconcile-config.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Canonical series files.
    pub data_dir: PathBuf,
    pub consumption_dir: PathBuf,
    pub price_dir: PathBuf,
    pub loss_profile_dir: PathBuf,
    pub meter_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            consumption_dir: "data/raw/consumption".into(),
            price_dir: "data/raw/day_ahead".into(),
            loss_profile_dir: "data/raw/losses".into(),
            meter_dir: "data/raw/meters".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Download missing price files and device exports before normalizing.
    pub enabled: bool,
    pub price_base_url: String,
    /// Base URL of the metering device, e.g. `http://192.168.1.50`.
    pub meter_origin: Option<String>,
    pub workers: usize,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            price_base_url: "https://www.omie.es/pt/file-download?parents%5B0%5D=marginalpdbcpt&filename=".to_string(),
            meter_origin: None,
            workers: 4,
            timeout_secs: 30,
        }
    }
}

/// Dedup policy per merged series.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    pub consumption: DedupPolicy,
    pub prices: DedupPolicy,
    pub losses: DedupPolicy,
    pub meter_samples: DedupPolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterDevice {
    pub name: String,
    /// Channel index on the device's energy export endpoint.
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetersConfig {
    pub grid: MeterDevice,
    pub solar: MeterDevice,
}

impl Default for MetersConfig {
    fn default() -> Self {
        Self {
            grid: MeterDevice {
                name: "grid".to_string(),
                channel: 0,
            },
            solar: MeterDevice {
                name: "solar".to_string(),
                channel: 1,
            },
        }
    }
}

impl MetersConfig {
    pub fn devices(&self) -> [&MeterDevice; 2] {
        [&self.grid, &self.solar]
    }

    pub fn find(&self, name: &str) -> Option<&MeterDevice> {
        self.devices().into_iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub pricing: PricingConfig,
    pub fetch: FetchConfig,
    pub merge: MergeConfig,
    pub meters: MetersConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    /// Reads `$RECONCILE_CONFIG`, or `reconcile-config.toml` when unset. A
    /// missing default file means all defaults; a missing explicit file is
    /// an error.
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let explicit = env::var(CONFIG_ENV).ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound && explicit.is_none() => {
                tracing::info!(path = %path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(anyhow::anyhow!("failed to read config {path}: {e}")),
        };
        Self::from_toml_str(&contents).map_err(|e| anyhow::anyhow!("invalid config {path}: {e}"))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if cfg.fetch.workers == 0 {
            anyhow::bail!("fetch.workers must be at least 1");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.pricing.adjustment_factor, 1.03);
        assert_eq!(cfg.meters.solar.channel, 1);
        assert!(cfg.metrics.is_none());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [paths]
            data_dir = "/var/lib/reconcile"

            [pricing]
            fixed_fee = 0.02
            data_start = "2024-06-01"

            [merge]
            meter_samples = "exact_row"

            [meters.grid]
            name = "mains"
            channel = 2

            [metrics]
            bind_addr = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.paths.data_dir, PathBuf::from("/var/lib/reconcile"));
        assert_eq!(cfg.paths.price_dir, PathsConfig::default().price_dir);
        assert_eq!(cfg.pricing.fixed_fee, 0.02);
        assert_eq!(cfg.pricing.adjustment_factor, 1.03);
        assert_eq!(cfg.pricing.data_start, date!(2024 - 06 - 01));
        assert_eq!(cfg.merge.meter_samples, DedupPolicy::ExactRow);
        assert_eq!(cfg.merge.prices, DedupPolicy::LastWriteWins);
        assert_eq!(cfg.meters.find("mains").map(|d| d.channel), Some(2));
        assert_eq!(cfg.meters.solar.name, "solar");
        assert_eq!(cfg.metrics.unwrap().bind_addr, "127.0.0.1:9100");
    }

    #[test]
    fn unknown_keys_and_zero_workers_are_rejected() {
        assert!(AppConfig::from_toml_str("[pricing]\nfee = 1.0\n").is_err());
        assert!(AppConfig::from_toml_str("[fetch]\nworkers = 0\n").is_err());
    }
}
