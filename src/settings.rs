//! Runtime settings. Values come from an optional `ledger.toml` next to the
//! process and from `LEDGER__SECTION__KEY` environment variables, e.g.
//! `LEDGER__CACHE__TTL_SECS=60`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of shadow account snapshots kept
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostingSettings {
    /// Reject journals whose debits and credits differ
    pub enforce_balance: bool,
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            enforce_balance: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub posting: PostingSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("ledger").required(false))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }

    /// Load from an explicit file, still honoring environment overrides
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("LEDGER")
        .separator("__")
        .try_parsing(true)
}
