// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The neighbor store: a periodically refreshed index of the BGP sessions of
//! every source.

use crate::config::StoreConfig;
use crate::error::Error;
use crate::fanout::fan_out;
use crate::log::store_log;
use crate::source::{Source, SourceRegistry};
use crate::store::{RefreshOutcome, SourceTable, StoreState, StoreStatus};
use crate::types::{Neighbor, SessionState, SourceId};
use chrono::{DateTime, Utc};
use lg_common::thread::{PeriodicThread, DEFAULT_RESOLUTION};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The neighbors of one source, as of its last successful refresh.
#[derive(Debug, Default)]
pub struct NeighborIndex {
    neighbors: Vec<Neighbor>,
    by_id: HashMap<String, usize>,
}

impl NeighborIndex {
    fn new(neighbors: Vec<Neighbor>) -> Self {
        let by_id = neighbors
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { neighbors, by_id }
    }

    /// Neighbors in the order the source reported them.
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn get(&self, id: &str) -> Option<&Neighbor> {
        self.by_id.get(id).map(|i| &self.neighbors[*i])
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Neighbors whose description contains `query`, which must already be
    /// lowercase.
    fn matching(&self, query: &str) -> Vec<Neighbor> {
        self.neighbors
            .iter()
            .filter(|n| n.description.to_lowercase().contains(query))
            .cloned()
            .collect()
    }
}

fn fetch_index(source: &dyn Source) -> Result<NeighborIndex, Error> {
    Ok(NeighborIndex::new(source.neighbors()?.neighbors))
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceNeighborsStats {
    pub id: SourceId,
    pub name: String,
    pub state: StoreState,
    pub neighbors: usize,
    pub neighbors_up: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NeighborsStoreStats {
    pub sources: Vec<SourceNeighborsStats>,
    pub total_neighbors: usize,
}

pub struct NeighborsStore {
    sources: Arc<SourceRegistry>,
    table: SourceTable<NeighborIndex>,
    config: StoreConfig,
    log: Logger,
}

impl NeighborsStore {
    pub fn new(
        sources: Arc<SourceRegistry>,
        config: StoreConfig,
        log: Logger,
    ) -> Self {
        let table =
            SourceTable::new(&sources, config.source_timeout, log.clone());
        Self {
            sources,
            table,
            config,
            log,
        }
    }

    /// Refresh every source once, concurrently.
    pub fn refresh(&self) -> Vec<(SourceId, RefreshOutcome)> {
        let outcomes = self.table.refresh_all(&self.sources, fetch_index);
        log_refresh(&self.log, "neighbors", &outcomes);
        outcomes
    }

    pub fn refresh_source(
        &self,
        id: &SourceId,
    ) -> Result<RefreshOutcome, Error> {
        self.table.refresh(self.sources.get(id)?, fetch_index)
    }

    /// Refresh now and then every `refresh_interval` until the returned
    /// handle is dropped.
    pub fn start(self: &Arc<Self>) -> Result<PeriodicThread, Error> {
        let store = self.clone();
        Ok(PeriodicThread::spawn(
            "neighbors-store",
            self.config.refresh_interval,
            DEFAULT_RESOLUTION,
            move || {
                store.refresh();
            },
        )?)
    }

    /// The current neighbor index of a source.
    pub fn index_at(&self, id: &SourceId) -> Result<Arc<NeighborIndex>, Error> {
        self.table
            .snapshot(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))
    }

    pub fn get_neighbors_at(&self, id: &SourceId) -> Result<Vec<Neighbor>, Error> {
        Ok(self.index_at(id)?.neighbors().to_vec())
    }

    pub fn get_neighbor(
        &self,
        id: &SourceId,
        neighbor_id: &str,
    ) -> Result<Neighbor, Error> {
        self.index_at(id)?
            .get(neighbor_id)
            .cloned()
            .ok_or_else(|| Error::NeighborNotFound(neighbor_id.to_string()))
    }

    /// Neighbors of one source whose description contains `query`, ignoring
    /// case.
    pub fn lookup_neighbors_at(
        &self,
        id: &SourceId,
        query: &str,
    ) -> Result<Vec<Neighbor>, Error> {
        Ok(self.index_at(id)?.matching(&query.to_lowercase()))
    }

    /// [`NeighborsStore::lookup_neighbors_at`] across every source. Sources
    /// without matches are left out.
    pub fn lookup_neighbors(
        &self,
        query: &str,
    ) -> BTreeMap<SourceId, Vec<Neighbor>> {
        let query = query.to_lowercase();
        fan_out(self.sources.ids(), |id| {
            let matches = self
                .table
                .snapshot(id)
                .map(|index| index.matching(&query))
                .unwrap_or_default();
            (id.clone(), matches)
        })
        .into_iter()
        .filter(|(_, matches)| !matches.is_empty())
        .collect()
    }

    pub fn status(&self, id: &SourceId) -> Result<StoreStatus, Error> {
        self.table
            .status(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))
    }

    pub fn stats(&self) -> NeighborsStoreStats {
        let sources: Vec<SourceNeighborsStats> = self
            .sources
            .iter()
            .filter_map(|h| {
                let (status, index) = self.table.entry(&h.id)?;
                Some(SourceNeighborsStats {
                    id: h.id.clone(),
                    name: h.name.clone(),
                    state: status.state,
                    neighbors: index.len(),
                    neighbors_up: index
                        .neighbors()
                        .iter()
                        .filter(|n| n.state == SessionState::Up)
                        .count(),
                    last_refresh: status.last_refresh,
                    last_error: status.last_error,
                })
            })
            .collect();
        let total_neighbors = sources.iter().map(|s| s.neighbors).sum();
        NeighborsStoreStats {
            sources,
            total_neighbors,
        }
    }
}

pub(crate) fn log_refresh(
    log: &Logger,
    store: &str,
    outcomes: &[(SourceId, RefreshOutcome)],
) {
    let count = |o: RefreshOutcome| {
        outcomes.iter().filter(|(_, x)| *x == o).count()
    };
    store_log!(log, info, "{} store refreshed", store;
        "refreshed" => count(RefreshOutcome::Refreshed),
        "failed" => count(RefreshOutcome::Failed),
        "skipped" => count(RefreshOutcome::Skipped)
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{handle, neighbor, registry, MockSource};
    use lg_common::log::discard;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn store_with(
        sources: Vec<(&str, Arc<MockSource>)>,
        config: StoreConfig,
    ) -> Arc<NeighborsStore> {
        let handles = sources
            .into_iter()
            .map(|(id, s)| handle(id, s as Arc<dyn Source>))
            .collect();
        Arc::new(NeighborsStore::new(
            Arc::new(registry(handles)),
            config,
            discard(),
        ))
    }

    fn described(id: &str, asn: u32, description: &str) -> Neighbor {
        let mut n = neighbor(id, "192.0.2.1", asn);
        n.description = description.to_string();
        n
    }

    #[test]
    fn refresh_populates_index() {
        let src = Arc::new(MockSource::default());
        src.set_neighbors(vec![
            neighbor("n1", "192.0.2.1", 65001),
            neighbor("n2", "192.0.2.2", 65002),
        ]);
        let store = store_with(vec![("rs1", src)], StoreConfig::default());
        let rs1 = SourceId::from("rs1");

        assert_eq!(store.status(&rs1).expect("status").state, StoreState::Init);
        assert!(store.get_neighbors_at(&rs1).expect("neighbors").is_empty());

        let outcomes = store.refresh();
        assert_eq!(outcomes, vec![(rs1.clone(), RefreshOutcome::Refreshed)]);

        let status = store.status(&rs1).expect("status");
        assert_eq!(status.state, StoreState::Ready);
        assert!(status.last_refresh.is_some());
        assert_eq!(store.get_neighbors_at(&rs1).expect("neighbors").len(), 2);
        assert_eq!(store.get_neighbor(&rs1, "n2").expect("n2").asn, 65002);

        assert!(matches!(
            store.get_neighbor(&rs1, "n3"),
            Err(Error::NeighborNotFound(_))
        ));
        assert!(matches!(
            store.get_neighbors_at(&SourceId::from("rs9")),
            Err(Error::SourceNotFound(_))
        ));
        assert!(matches!(
            store.refresh_source(&SourceId::from("rs9")),
            Err(Error::SourceNotFound(_))
        ));
    }

    #[test]
    fn refresh_while_updating_is_noop() {
        let src = Arc::new(MockSource::default());
        src.set_neighbors(vec![neighbor("n1", "192.0.2.1", 65001)]);
        let store =
            store_with(vec![("rs1", src.clone())], StoreConfig::default());
        let rs1 = SourceId::from("rs1");
        store.refresh_source(&rs1).expect("first refresh");
        let before = store.status(&rs1).expect("status");

        src.set_neighbors(vec![
            neighbor("n1", "192.0.2.1", 65001),
            neighbor("n2", "192.0.2.2", 65002),
        ]);
        src.hold();
        let bg = {
            let store = store.clone();
            let rs1 = rs1.clone();
            std::thread::spawn(move || store.refresh_source(&rs1))
        };
        lg_common::wait_for!(
            store.status(&rs1).expect("status").state,
            ==,
            StoreState::Updating
        );

        assert_eq!(
            store.refresh_source(&rs1).expect("second refresh"),
            RefreshOutcome::Skipped
        );
        let during = store.status(&rs1).expect("status");
        assert_eq!(during.last_refresh, before.last_refresh);
        assert_eq!(store.get_neighbors_at(&rs1).expect("neighbors").len(), 1);
        lg_common::wait_for!(src.calls.neighbors.load(Ordering::SeqCst), ==, 2);

        src.release();
        assert_eq!(
            bg.join().expect("join").expect("refresh"),
            RefreshOutcome::Refreshed
        );
        assert_eq!(store.get_neighbors_at(&rs1).expect("neighbors").len(), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_data() {
        let src = Arc::new(MockSource::default());
        src.set_neighbors(vec![neighbor("n1", "192.0.2.1", 65001)]);
        let store =
            store_with(vec![("rs1", src.clone())], StoreConfig::default());
        let rs1 = SourceId::from("rs1");
        store.refresh_source(&rs1).expect("refresh");
        let ready = store.status(&rs1).expect("status");

        src.fail_with("connection refused");
        assert_eq!(
            store.refresh_source(&rs1).expect("refresh"),
            RefreshOutcome::Failed
        );
        let failed = store.status(&rs1).expect("status");
        assert_eq!(failed.state, StoreState::Error);
        assert_eq!(failed.last_refresh, ready.last_refresh);
        assert!(failed
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused")));
        assert!(failed.last_error_at.is_some());
        assert_eq!(store.get_neighbors_at(&rs1).expect("neighbors").len(), 1);

        // Error is not terminal, and success clears it.
        src.recover();
        store.refresh_source(&rs1).expect("refresh");
        let recovered = store.status(&rs1).expect("status");
        assert_eq!(recovered.state, StoreState::Ready);
        assert_eq!(recovered.last_error, None);
        assert_eq!(recovered.last_error_at, None);
    }

    #[test]
    fn slow_source_times_out() {
        let src = Arc::new(MockSource::default());
        src.set_delay(Duration::from_millis(500));
        let config = StoreConfig {
            source_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let store = store_with(vec![("rs1", src)], config);
        let rs1 = SourceId::from("rs1");

        assert_eq!(
            store.refresh_source(&rs1).expect("refresh"),
            RefreshOutcome::Failed
        );
        let status = store.status(&rs1).expect("status");
        assert_eq!(status.state, StoreState::Error);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
    }

    #[test]
    fn timed_out_call_blocks_further_calls() {
        let src = Arc::new(MockSource::default());
        src.set_neighbors(vec![neighbor("n1", "192.0.2.1", 65001)]);
        let config = StoreConfig {
            source_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let store = store_with(vec![("rs1", src.clone())], config);
        let rs1 = SourceId::from("rs1");
        src.hold();

        let outcomes: Vec<RefreshOutcome> = (0..5)
            .map(|_| store.refresh_source(&rs1).expect("refresh"))
            .collect();
        assert_eq!(outcomes[0], RefreshOutcome::Failed);
        assert!(outcomes[1..].iter().all(|o| *o == RefreshOutcome::Skipped));
        assert_eq!(src.calls.neighbors.load(Ordering::SeqCst), 1);
        assert_eq!(store.status(&rs1).expect("status").state, StoreState::Error);

        src.release();
        lg_common::wait_for!(
            store.refresh_source(&rs1).expect("refresh"),
            ==,
            RefreshOutcome::Refreshed
        );
        assert_eq!(src.calls.neighbors.load(Ordering::SeqCst), 2);
        let status = store.status(&rs1).expect("status");
        assert_eq!(status.state, StoreState::Ready);
        assert!(status.last_error.is_none());
        assert!(status.last_error_at.is_none());
    }

    #[test]
    fn federated_lookup_ignores_case() {
        let a = Arc::new(MockSource::default());
        a.set_neighbors(vec![
            described("n1", 65001, "Example Transit"),
            described("n2", 65002, "Some IXP member"),
        ]);
        let b = Arc::new(MockSource::default());
        b.set_neighbors(vec![described("m1", 65003, "TRANSIT provider")]);
        let c = Arc::new(MockSource::default());
        c.set_neighbors(vec![described("k1", 65004, "content network")]);
        let store = store_with(
            vec![("rs1", a), ("rs2", b), ("rs3", c)],
            StoreConfig::default(),
        );
        store.refresh();

        let found = store.lookup_neighbors("transit");
        let ids: Vec<(&str, Vec<&str>)> = found
            .iter()
            .map(|(src, ns)| {
                (src.as_str(), ns.iter().map(|n| n.id.as_str()).collect())
            })
            .collect();
        assert_eq!(ids, vec![("rs1", vec!["n1"]), ("rs2", vec!["m1"])]);

        let at = store
            .lookup_neighbors_at(&SourceId::from("rs1"), "ixp")
            .expect("lookup");
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].id, "n2");
    }

    #[test]
    fn stats_count_per_source() {
        let a = Arc::new(MockSource::default());
        let mut down = neighbor("n2", "192.0.2.2", 65002);
        down.state = SessionState::Down;
        a.set_neighbors(vec![neighbor("n1", "192.0.2.1", 65001), down]);
        let b = Arc::new(MockSource::default());
        b.fail_with("no route to host");
        let store = store_with(vec![("rs1", a), ("rs2", b)], StoreConfig::default());
        store.refresh();

        let stats = store.stats();
        assert_eq!(stats.total_neighbors, 2);
        assert_eq!(stats.sources.len(), 2);
        assert_eq!(stats.sources[0].state, StoreState::Ready);
        assert_eq!(stats.sources[0].neighbors_up, 1);
        assert_eq!(stats.sources[1].state, StoreState::Error);
        assert_eq!(stats.sources[1].neighbors, 0);
        assert!(stats.sources[1].last_error.is_some());
    }

    #[test]
    fn background_refresh_runs_until_dropped() {
        let src = Arc::new(MockSource::default());
        src.set_neighbors(vec![neighbor("n1", "192.0.2.1", 65001)]);
        let store =
            store_with(vec![("rs1", src.clone())], StoreConfig::default());
        let rs1 = SourceId::from("rs1");

        let thread = store.start().expect("start");
        lg_common::wait_for!(
            store.status(&rs1).expect("status").state,
            ==,
            StoreState::Ready
        );
        assert!(thread.is_running());
        drop(thread);
        assert_eq!(src.calls.neighbors.load(Ordering::SeqCst), 1);
    }
}
