// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The route store: a periodically refreshed copy of the imported and
//! filtered routes of every source, and federated lookups over it.
//!
//! A lookup runs one task per source. Each task works on the snapshot of its
//! source current at dispatch time, so lookups never wait for a refresh that
//! is in flight; a source that is refreshing or failing contributes its last
//! good routes, or nothing.

use crate::config::StoreConfig;
use crate::error::Error;
use crate::fanout::fan_out;
use crate::neighbors::{log_refresh, NeighborsStore};
use crate::source::{Source, SourceHandle, SourceRegistry};
use crate::store::{RefreshOutcome, SourceTable, StoreState, StoreStatus};
use crate::types::{LookupRoute, Route, RouteState, SourceId};
use chrono::{DateTime, Utc};
use lg_common::thread::{PeriodicThread, DEFAULT_RESOLUTION};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Imported and filtered routes of one source. Both halves are replaced
/// together, so readers never see a torn pair.
#[derive(Debug, Default)]
pub struct RouteSet {
    pub imported: Vec<Route>,
    pub filtered: Vec<Route>,
}

fn fetch_routes(source: &dyn Source) -> Result<RouteSet, Error> {
    let all = source.all_routes()?;
    Ok(RouteSet {
        imported: all.imported,
        filtered: all.filtered,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceRoutesStats {
    pub id: SourceId,
    pub name: String,
    pub state: StoreState,
    pub imported: usize,
    pub filtered: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoutesStoreStats {
    pub sources: Vec<SourceRoutesStats>,
    pub total_imported: usize,
    pub total_filtered: usize,
}

pub struct RoutesStore {
    sources: Arc<SourceRegistry>,
    neighbors: Arc<NeighborsStore>,
    table: SourceTable<RouteSet>,
    config: StoreConfig,
    log: Logger,
}

impl RoutesStore {
    pub fn new(
        sources: Arc<SourceRegistry>,
        neighbors: Arc<NeighborsStore>,
        config: StoreConfig,
        log: Logger,
    ) -> Self {
        let table =
            SourceTable::new(&sources, config.source_timeout, log.clone());
        Self {
            sources,
            neighbors,
            table,
            config,
            log,
        }
    }

    pub fn refresh(&self) -> Vec<(SourceId, RefreshOutcome)> {
        let outcomes = self.table.refresh_all(&self.sources, fetch_routes);
        log_refresh(&self.log, "routes", &outcomes);
        outcomes
    }

    pub fn refresh_source(
        &self,
        id: &SourceId,
    ) -> Result<RefreshOutcome, Error> {
        self.table.refresh(self.sources.get(id)?, fetch_routes)
    }

    pub fn start(self: &Arc<Self>) -> Result<PeriodicThread, Error> {
        let store = self.clone();
        Ok(PeriodicThread::spawn(
            "routes-store",
            self.config.refresh_interval,
            DEFAULT_RESOLUTION,
            move || {
                store.refresh();
            },
        )?)
    }

    /// Routes of every source whose network starts with `prefix`.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<LookupRoute> {
        self.lookup(self.sources.iter().collect(), |_, route| {
            route.network.starts_with(prefix)
        })
    }

    /// All routes of the given neighbors, by source. Sources not in
    /// `neighbors` are not consulted.
    pub fn lookup_prefix_for_neighbors(
        &self,
        neighbors: &BTreeMap<SourceId, BTreeSet<String>>,
    ) -> Vec<LookupRoute> {
        let handles = self
            .sources
            .iter()
            .filter(|h| neighbors.contains_key(&h.id))
            .collect();
        self.lookup(handles, |id, route| {
            neighbors
                .get(id)
                .is_some_and(|ids| ids.contains(&route.neighbor_id))
        })
    }

    fn lookup<F>(&self, handles: Vec<&SourceHandle>, filter: F) -> Vec<LookupRoute>
    where
        F: Fn(&SourceId, &Route) -> bool + Sync,
    {
        fan_out(handles, |handle| self.lookup_at(handle, &filter))
            .into_iter()
            .flatten()
            .collect()
    }

    fn lookup_at<F>(&self, handle: &SourceHandle, filter: &F) -> Vec<LookupRoute>
    where
        F: Fn(&SourceId, &Route) -> bool,
    {
        let Some(routes) = self.table.snapshot(&handle.id) else {
            return Vec::new();
        };
        let index = self.neighbors.index_at(&handle.id).ok();

        let tag = |route: &Route, state: RouteState| LookupRoute {
            route: route.clone(),
            state,
            neighbor: index
                .as_ref()
                .and_then(|i| i.get(&route.neighbor_id))
                .cloned(),
            source_id: handle.id.clone(),
            source_name: handle.name.clone(),
            community_labels: handle.communities.labels_for(route),
        };

        let imported = routes
            .imported
            .iter()
            .filter(|r| filter(&handle.id, *r))
            .map(|r| tag(r, RouteState::Imported));
        let filtered = routes
            .filtered
            .iter()
            .filter(|r| filter(&handle.id, *r))
            .map(|r| tag(r, RouteState::Filtered));
        imported.chain(filtered).collect()
    }

    pub fn status(&self, id: &SourceId) -> Result<StoreStatus, Error> {
        self.table
            .status(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))
    }

    pub fn stats(&self) -> RoutesStoreStats {
        let sources: Vec<SourceRoutesStats> = self
            .sources
            .iter()
            .filter_map(|h| {
                let (status, routes) = self.table.entry(&h.id)?;
                Some(SourceRoutesStats {
                    id: h.id.clone(),
                    name: h.name.clone(),
                    state: status.state,
                    imported: routes.imported.len(),
                    filtered: routes.filtered.len(),
                    last_refresh: status.last_refresh,
                    last_error: status.last_error,
                })
            })
            .collect();
        RoutesStoreStats {
            total_imported: sources.iter().map(|s| s.imported).sum(),
            total_filtered: sources.iter().map(|s| s.filtered).sum(),
            sources,
        }
    }
}
