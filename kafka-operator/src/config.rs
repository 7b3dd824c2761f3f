//! Process configuration (`spec.md` §6 "Process environment"), loaded the
//! way the teacher's `Config` structs are (`serde::Deserialize` driven by
//! the `config` crate, default functions grounded on
//! `service-common::defaults`), bridging environment variables into typed
//! fields via `humantime_serde` for durations.

use crate::health::HealthServerConfig;
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};

fn default_namespace() -> String {
    "default".to_string()
}

fn default_configmap_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        crate::model::spec::LABEL_KIND.to_string(),
        crate::model::spec::LABEL_KIND_VALUE.to_string(),
    )])
}

fn default_full_reconciliation_interval() -> Duration {
    Duration::from_millis(120_000)
}

fn default_lock_timeout() -> Duration {
    crate::engine::LOCK_TIMEOUT
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// `NAMESPACE` — namespace to watch.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// `CONFIGMAP_LABELS` — selector label set (default `kind=cluster`),
    /// given as `key=value,key=value`.
    #[serde(default = "default_configmap_labels", deserialize_with = "deserialize_label_set")]
    pub configmap_labels: BTreeMap<String, String>,

    /// `FULL_RECONCILIATION_INTERVAL` — milliseconds between sweeps.
    #[serde(
        default = "default_full_reconciliation_interval",
        with = "humantime_serde"
    )]
    pub full_reconciliation_interval: Duration,

    #[serde(default = "default_lock_timeout", with = "humantime_serde")]
    pub lock_timeout: Duration,

    #[serde(default)]
    pub health: HealthServerConfig,
}

fn deserialize_label_set<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_label_set(&raw))
}

fn parse_label_set(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

impl Config {
    /// Load configuration from the process environment, via a `.env` file
    /// if present (`dotenv`), falling back to field defaults per `spec.md`
    /// §6 when a variable is unset.
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        for (key, field) in [
            ("NAMESPACE", "namespace"),
            ("CONFIGMAP_LABELS", "configmap_labels"),
            (
                "FULL_RECONCILIATION_INTERVAL",
                "full_reconciliation_interval",
            ),
        ] {
            if let Ok(value) = std::env::var(key) {
                builder = builder.set_override(field, value)?;
            }
        }

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
