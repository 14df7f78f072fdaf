// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::communities::CommunityRegistry;
use crate::config::{BackendConfig, Config, SourceConfig};
use crate::error::Error;
use crate::multi_table::MultiTableSource;
use crate::static_file::StaticFileBackend;
use crate::types::{
    NeighborsResponse, RoutePartition, SourceId, StatusInfo,
};
use slog::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A route-server backend as seen by the stores. Implementations do their
/// own response caching; callers may invoke any method from any thread.
pub trait Source: Send + Sync {
    fn status(&self) -> Result<StatusInfo, Error>;

    fn neighbors(&self) -> Result<NeighborsResponse, Error>;

    /// Imported and filtered routes of a neighbor.
    fn routes(&self, neighbor_id: &str) -> Result<RoutePartition, Error>;

    /// Like [`Source::routes`] with only the imported half populated.
    fn routes_received(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error>;

    /// Like [`Source::routes`] with only the filtered half populated.
    fn routes_filtered(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error>;

    fn routes_not_exported(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error>;

    /// Every imported and filtered route of every neighbor.
    fn all_routes(&self) -> Result<RoutePartition, Error>;

    /// Drop lapsed cached responses. Returns the number dropped.
    fn expire_caches(&self) -> usize;
}

/// A configured source together with its identity and community labels.
#[derive(Clone)]
pub struct SourceHandle {
    pub id: SourceId,
    pub name: String,
    pub source: Arc<dyn Source>,
    pub communities: CommunityRegistry,
}

/// The set of configured sources, in configuration order. Built once at
/// startup and shared by handle.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, SourceHandle>,
    order: Vec<SourceId>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every source described by `config`. Each source's community
    /// rules are merged over the global ones.
    pub fn from_config(config: &Config, log: &Logger) -> Result<Self, Error> {
        let global = CommunityRegistry::with_rules(&config.communities)?;
        let mut registry = Self::new();
        for sc in &config.sources {
            let source = build_source(sc, log)?;
            let mut overrides = CommunityRegistry::empty();
            for (key, label) in &sc.communities {
                overrides.set(key, label)?;
            }
            registry.add(SourceHandle {
                id: sc.id.clone(),
                name: sc.name.clone(),
                source,
                communities: global.merge(&overrides),
            })?;
        }
        Ok(registry)
    }

    pub fn add(&mut self, handle: SourceHandle) -> Result<(), Error> {
        if self.sources.contains_key(&handle.id) {
            return Err(Error::Config(format!(
                "duplicate source id {}",
                handle.id
            )));
        }
        self.order.push(handle.id.clone());
        self.sources.insert(handle.id.clone(), handle);
        Ok(())
    }

    pub fn get(&self, id: &SourceId) -> Result<&SourceHandle, Error> {
        self.sources
            .get(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))
    }

    pub fn ids(&self) -> &[SourceId] {
        &self.order
    }

    /// Handles in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &SourceHandle> {
        self.order.iter().filter_map(|id| self.sources.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn build_source(
    sc: &SourceConfig,
    log: &Logger,
) -> Result<Arc<dyn Source>, Error> {
    let log = log.new(slog::o!("source" => sc.id.to_string()));
    match &sc.backend {
        BackendConfig::StaticFile { path, cache_ttl } => {
            let backend = StaticFileBackend::new(path.clone(), *cache_ttl);
            Ok(Arc::new(MultiTableSource::new(backend, sc.cache, log)))
        }
    }
}
