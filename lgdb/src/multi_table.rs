// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`Source`] for route servers running in multi-table mode, where each
//! neighbor is imported into its own table that is piped into a shared
//! master table.
//!
//! The wire protocol of a particular route server is hidden behind
//! [`RouteBackend`], which hands back typed records. This module owns the
//! response caches of the source and runs the reconciliation in
//! [`crate::reconcile`] over what the backend returns.

use crate::cache::{CacheConfig, FetchLocks, ResponseCache};
use crate::error::Error;
use crate::log::source_log;
use crate::reconcile;
use crate::source::Source;
use crate::types::{
    Neighbor, NeighborsResponse, PipeInfo, Response, RoutePair,
    RoutePartition, RoutesResponse, StatusInfo,
};
use lg_common::lock;
use slog::Logger;
use std::hash::Hash;

/// Typed queries against a single route server.
pub trait RouteBackend: Send + Sync {
    fn status(&self) -> Result<StatusInfo, Error>;

    /// All neighbors with their raw protocol counters.
    fn neighbors(&self) -> Result<NeighborsResponse, Error>;

    /// Pipes from peer tables into the master table.
    fn pipes(&self) -> Result<Vec<PipeInfo>, Error>;

    /// Routes announced by the neighbor, before import policy.
    fn received(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error>;

    /// Routes rejected by the neighbor's protocol import filter.
    fn filtered(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error>;

    /// Routes rejected by a pipe, for every neighbor of the pipe's table.
    fn pipe_filtered(&self, pipe: &PipeInfo) -> Result<RoutesResponse, Error>;

    /// Number of the neighbor's routes rejected by a pipe.
    fn pipe_filtered_count(
        &self,
        pipe: &PipeInfo,
        neighbor: &Neighbor,
    ) -> Result<u64, Error>;

    /// Routes in the master table withheld from export to the neighbor.
    fn not_exported(&self, neighbor: &Neighbor)
        -> Result<RoutesResponse, Error>;
}

pub struct MultiTableSource<B: RouteBackend> {
    backend: B,

    status_cache: ResponseCache<(), StatusInfo>,
    status_locks: FetchLocks<()>,

    neighbors_cache: ResponseCache<(), NeighborsResponse>,
    neighbors_locks: FetchLocks<()>,

    /// Reconciled imported/filtered pairs by neighbor id.
    routes_cache: ResponseCache<String, RoutePair>,
    routes_locks: FetchLocks<String>,

    not_exported_cache: ResponseCache<String, RoutesResponse>,
    not_exported_locks: FetchLocks<String>,

    log: Logger,
}

impl<B: RouteBackend> MultiTableSource<B> {
    pub fn new(backend: B, cache: CacheConfig, log: Logger) -> Self {
        Self {
            backend,
            status_cache: ResponseCache::new(cache),
            status_locks: FetchLocks::default(),
            neighbors_cache: ResponseCache::new(cache),
            neighbors_locks: FetchLocks::default(),
            routes_cache: ResponseCache::new(cache),
            routes_locks: FetchLocks::default(),
            not_exported_cache: ResponseCache::new(cache),
            not_exported_locks: FetchLocks::default(),
            log,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn neighbor(&self, id: &str) -> Result<Neighbor, Error> {
        self.neighbors()?
            .neighbors
            .into_iter()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::NeighborNotFound(id.to_string()))
    }

    fn pipe_for(&self, neighbor: &Neighbor) -> Result<Option<PipeInfo>, Error> {
        let Some(table) = &neighbor.table else {
            return Ok(None);
        };
        Ok(self.backend.pipes()?.into_iter().find(|p| &p.table == table))
    }

    fn fetch_neighbors(&self) -> Result<NeighborsResponse, Error> {
        let mut response = self.backend.neighbors()?;
        let pipes = self.backend.pipes()?;
        let attributions = reconcile::attribute_pipe_filtered(
            &mut response.neighbors,
            &pipes,
            |pipe, neighbor| self.backend.pipe_filtered_count(pipe, neighbor),
        )?;
        for (table, attribution) in attributions {
            source_log!(self.log, debug,
                "pipe filtered routes of table {} attributed", table;
                "attribution" => format!("{attribution:?}")
            );
        }
        Ok(response)
    }

    fn fetch_route_pair(&self, neighbor: &Neighbor) -> Result<RoutePair, Error> {
        let received = self.backend.received(neighbor)?;
        if received.routes.is_empty() {
            return Ok(RoutePair {
                imported: Vec::new(),
                filtered: Vec::new(),
                meta: received.meta,
            });
        }

        let mut filtered = self.backend.filtered(neighbor)?.routes;
        if let Some(pipe) = self.pipe_for(neighbor)? {
            filtered.extend(self.backend.pipe_filtered(&pipe)?.routes);
        }
        reconcile::sort_by_network(&mut filtered);

        let (imported, filtered) =
            reconcile::reconcile(received.routes, filtered);

        source_log!(self.log, debug,
            "reconciled routes of neighbor {}", neighbor.id;
            "imported" => imported.len(),
            "filtered" => filtered.len()
        );

        Ok(RoutePair {
            imported,
            filtered,
            meta: received.meta,
        })
    }

    fn route_pair(&self, neighbor_id: &str) -> Result<RoutePair, Error> {
        cached(
            &self.routes_cache,
            &self.routes_locks,
            neighbor_id.to_string(),
            || {
                let neighbor = self.neighbor(neighbor_id)?;
                self.fetch_route_pair(&neighbor)
            },
        )
    }
}

/// Serve `key` from `cache`, or fetch it while holding the key's fetch lock
/// so concurrent misses wait for a single fetch.
fn cached<K, V, F>(
    cache: &ResponseCache<K, V>,
    locks: &FetchLocks<K>,
    key: K,
    fetch: F,
) -> Result<V, Error>
where
    K: Eq + Hash + Clone,
    V: Response + Clone,
    F: FnOnce() -> Result<V, Error>,
{
    if let Some(v) = cache.get(&key) {
        return Ok(from_cache(v));
    }
    let slot = locks.lock_for(&key);
    let _guard = lock!(slot);
    if let Some(v) = cache.get(&key) {
        return Ok(from_cache(v));
    }
    let v = fetch()?;
    cache.set(key, v.clone());
    Ok(v)
}

fn from_cache<V: Response>(mut v: V) -> V {
    v.meta_mut().result_from_cache = true;
    v
}

impl<B: RouteBackend> Source for MultiTableSource<B> {
    fn status(&self) -> Result<StatusInfo, Error> {
        cached(&self.status_cache, &self.status_locks, (), || {
            self.backend.status()
        })
    }

    fn neighbors(&self) -> Result<NeighborsResponse, Error> {
        cached(&self.neighbors_cache, &self.neighbors_locks, (), || {
            self.fetch_neighbors()
        })
    }

    fn routes(&self, neighbor_id: &str) -> Result<RoutePartition, Error> {
        Ok(self.route_pair(neighbor_id)?.into())
    }

    fn routes_received(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        let mut partition: RoutePartition =
            self.route_pair(neighbor_id)?.into();
        partition.filtered = Vec::new();
        Ok(partition)
    }

    fn routes_filtered(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        let mut partition: RoutePartition =
            self.route_pair(neighbor_id)?.into();
        partition.imported = Vec::new();
        Ok(partition)
    }

    fn routes_not_exported(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        let response = cached(
            &self.not_exported_cache,
            &self.not_exported_locks,
            neighbor_id.to_string(),
            || {
                let neighbor = self.neighbor(neighbor_id)?;
                self.backend.not_exported(&neighbor)
            },
        )?;
        Ok(RoutePartition {
            imported: Vec::new(),
            filtered: Vec::new(),
            not_exported: response.routes,
            meta: response.meta,
        })
    }

    fn all_routes(&self) -> Result<RoutePartition, Error> {
        let neighbors = self.neighbors()?;
        let mut imported = Vec::new();
        let mut filtered = Vec::new();
        for n in &neighbors.neighbors {
            let pair = self.route_pair(&n.id)?;
            imported.extend(pair.imported);
            filtered.extend(pair.filtered);
        }
        Ok(RoutePartition {
            imported,
            filtered,
            not_exported: Vec::new(),
            meta: neighbors.meta,
        })
    }

    fn expire_caches(&self) -> usize {
        let count = self.status_cache.expire()
            + self.neighbors_cache.expire()
            + self.routes_cache.expire()
            + self.not_exported_cache.expire();
        let pruned = self.status_locks.prune()
            + self.neighbors_locks.prune()
            + self.routes_locks.prune()
            + self.not_exported_locks.prune();
        source_log!(self.log, debug, "expired cached responses";
            "expired" => count,
            "fetch_locks_pruned" => pruned
        );
        count
    }
}
