// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Looking-glass configuration.
//!
//! Configuration is a JSON document. Durations are human readable strings
//! such as `"5m"` or `"30s"`.
//!
//! ```json
//! {
//!   "routes_store": { "refresh_interval": "5m", "source_timeout": "30s" },
//!   "communities": { "65000:*": "customer $0" },
//!   "sources": [
//!     {
//!       "id": "rs1",
//!       "name": "rs1.example.net (IPv4)",
//!       "backend": { "kind": "static_file", "path": "/var/lg/rs1.json" }
//!     }
//!   ]
//! }
//! ```

use crate::cache::CacheConfig;
use crate::error::Error;
use crate::types::SourceId;
use crate::{DEFAULT_REFRESH_INTERVAL, DEFAULT_SOURCE_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long responses read from a static file stay cached.
pub const DEFAULT_STATIC_FILE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub neighbors_store: StoreConfig,
    pub routes_store: StoreConfig,
    pub housekeeping: HousekeepingConfig,

    /// Community label rules shared by all sources.
    pub communities: BTreeMap<String, String>,

    pub sources: Vec<SourceConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        for (name, d) in [
            ("neighbors_store.refresh_interval", self.neighbors_store.refresh_interval),
            ("neighbors_store.source_timeout", self.neighbors_store.source_timeout),
            ("routes_store.refresh_interval", self.routes_store.refresh_interval),
            ("routes_store.source_timeout", self.routes_store.source_timeout),
            ("housekeeping.interval", self.housekeeping.interval),
        ] {
            if d.is_zero() {
                return Err(Error::Config(format!("{name} must be non-zero")));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for s in &self.sources {
            if !seen.insert(&s.id) {
                return Err(Error::Config(format!(
                    "duplicate source id {}",
                    s.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(with = "humantime_duration")]
    pub refresh_interval: Duration,

    /// Upper bound on one backend call made by a refresh.
    #[serde(with = "humantime_duration")]
    pub source_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    #[serde(with = "humantime_duration")]
    pub interval: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub name: String,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Community label rules overriding the global ones for this source.
    #[serde(default)]
    pub communities: BTreeMap<String, String>,

    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// A JSON dump of a route server on local disk.
    StaticFile {
        path: PathBuf,
        #[serde(with = "humantime_duration", default = "default_static_ttl")]
        cache_ttl: Duration,
    },
}

fn default_static_ttl() -> Duration {
    DEFAULT_STATIC_FILE_TTL
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        d: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
