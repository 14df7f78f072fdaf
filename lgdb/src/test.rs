// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixtures and mock backends shared by the unit tests.

use crate::communities::CommunityRegistry;
use crate::error::Error;
use crate::multi_table::RouteBackend;
use crate::source::{Source, SourceHandle, SourceRegistry};
use crate::types::{
    Neighbor, NeighborsResponse, PipeInfo, ResponseMeta, Route, RoutePartition,
    RoutesResponse, SessionState, SourceId, StatusInfo,
};
use chrono::{TimeDelta, Utc};
use lg_common::lock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub fn live_meta() -> ResponseMeta {
    ResponseMeta::new(Duration::from_secs(60))
}

pub fn expired_meta() -> ResponseMeta {
    let now = Utc::now();
    ResponseMeta {
        as_of: now - TimeDelta::seconds(120),
        cache_until: now - TimeDelta::seconds(60),
        result_from_cache: false,
    }
}

pub fn status_info(router_id: &str, meta: ResponseMeta) -> StatusInfo {
    StatusInfo {
        router_id: router_id.to_string(),
        version: "test".to_string(),
        server_time: Utc::now(),
        last_reboot: None,
        last_reconfig: None,
        message: String::new(),
        meta,
    }
}

pub fn neighbor(id: &str, address: &str, asn: u32) -> Neighbor {
    Neighbor {
        id: id.to_string(),
        address: address.parse().expect("neighbor address"),
        asn,
        state: SessionState::Up,
        description: format!("AS{asn} {id}"),
        routes: Default::default(),
        uptime_secs: 0,
        last_error: None,
        table: None,
        details: BTreeMap::new(),
    }
}

pub fn route(id: &str, neighbor_id: &str, network: &str, gateway: &str) -> Route {
    Route {
        id: id.to_string(),
        neighbor_id: neighbor_id.to_string(),
        network: network.to_string(),
        gateway: gateway.parse().expect("route gateway"),
        learnt_from: None,
        interface: String::new(),
        metric: 0,
        bgp: Default::default(),
        age_secs: 0,
        route_type: Vec::new(),
        primary: true,
        details: BTreeMap::new(),
    }
}

/// Wrap `source` in a handle with the default community registry.
pub fn handle(id: &str, source: Arc<dyn Source>) -> SourceHandle {
    SourceHandle {
        id: SourceId::from(id),
        name: format!("{id} route server"),
        source,
        communities: CommunityRegistry::new(),
    }
}

pub fn registry(handles: Vec<SourceHandle>) -> SourceRegistry {
    let mut r = SourceRegistry::new();
    for h in handles {
        r.add(h).expect("add source");
    }
    r
}

/// A file under /tmp that is removed when dropped.
pub struct TestFile {
    path: PathBuf,
}

impl TestFile {
    pub fn raw(test_name: &str, contents: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        std::fs::create_dir_all("/tmp").expect("create tmp dir");

        // Include process ID to avoid collisions between parallel test processes
        let path = PathBuf::from(format!(
            "/tmp/{}_{}_{}.json",
            test_name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, contents).expect("write test file");
        Self { path }
    }

    pub fn json<T: serde::Serialize>(test_name: &str, value: &T) -> Self {
        let contents = serde_json::to_string_pretty(value).expect("serialize");
        Self::raw(test_name, &contents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TestFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A gate test code can close to hold mock calls in flight.
#[derive(Default)]
struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn set(&self, closed: bool) {
        *lock!(self.closed) = closed;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut closed = lock!(self.closed);
        while *closed {
            closed = self.cv.wait(closed).expect("gate wait");
        }
    }
}

#[derive(Default)]
pub struct BackendCalls {
    pub status: AtomicUsize,
    pub neighbors: AtomicUsize,
    pub pipes: AtomicUsize,
    pub received: AtomicUsize,
    pub filtered: AtomicUsize,
    pub pipe_filtered: AtomicUsize,
    pub pipe_filtered_count: AtomicUsize,
    pub not_exported: AtomicUsize,
}

#[derive(Default)]
struct BackendData {
    neighbors: Vec<Neighbor>,
    pipes: Vec<PipeInfo>,
    received: HashMap<String, Vec<Route>>,
    filtered: HashMap<String, Vec<Route>>,
    pipe_filtered: HashMap<String, Vec<Route>>,
    pipe_filtered_count: HashMap<String, u64>,
    not_exported: HashMap<String, Vec<Route>>,
    meta: Option<ResponseMeta>,
    delay: Option<Duration>,
    failure: Option<String>,
}

/// An in-memory [`RouteBackend`] that counts calls per query.
#[derive(Default)]
pub struct MockBackend {
    data: Mutex<BackendData>,
    pub calls: BackendCalls,
}

impl MockBackend {
    pub fn set_neighbors(&self, neighbors: Vec<Neighbor>) {
        lock!(self.data).neighbors = neighbors;
    }

    pub fn set_pipes(&self, pipes: Vec<PipeInfo>) {
        lock!(self.data).pipes = pipes;
    }

    pub fn set_received(&self, neighbor_id: &str, routes: Vec<Route>) {
        lock!(self.data).received.insert(neighbor_id.into(), routes);
    }

    pub fn set_filtered(&self, neighbor_id: &str, routes: Vec<Route>) {
        lock!(self.data).filtered.insert(neighbor_id.into(), routes);
    }

    pub fn set_pipe_filtered(&self, pipe: &str, routes: Vec<Route>) {
        lock!(self.data).pipe_filtered.insert(pipe.into(), routes);
    }

    pub fn set_pipe_filtered_count(&self, neighbor_id: &str, count: u64) {
        lock!(self.data)
            .pipe_filtered_count
            .insert(neighbor_id.into(), count);
    }

    pub fn set_not_exported(&self, neighbor_id: &str, routes: Vec<Route>) {
        lock!(self.data).not_exported.insert(neighbor_id.into(), routes);
    }

    /// Metadata attached to every response from now on.
    pub fn set_meta(&self, meta: ResponseMeta) {
        lock!(self.data).meta = Some(meta);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        lock!(self.data).delay = Some(delay);
    }

    /// Make every call fail as unreachable.
    pub fn fail_with(&self, msg: &str) {
        lock!(self.data).failure = Some(msg.to_string());
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<ResponseMeta, Error> {
        counter.fetch_add(1, Ordering::SeqCst);
        let (delay, failure, meta) = {
            let data = lock!(self.data);
            (data.delay, data.failure.clone(), data.meta.clone())
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match failure {
            Some(msg) => Err(Error::Unreachable(msg)),
            None => Ok(meta.unwrap_or_else(live_meta)),
        }
    }

    fn routes_of(
        &self,
        counter: &AtomicUsize,
        pick: impl FnOnce(&BackendData) -> Option<Vec<Route>>,
    ) -> Result<RoutesResponse, Error> {
        let meta = self.enter(counter)?;
        let routes = pick(&*lock!(self.data)).unwrap_or_default();
        Ok(RoutesResponse { routes, meta })
    }
}

impl RouteBackend for MockBackend {
    fn status(&self) -> Result<StatusInfo, Error> {
        let meta = self.enter(&self.calls.status)?;
        Ok(status_info("192.0.2.254", meta))
    }

    fn neighbors(&self) -> Result<NeighborsResponse, Error> {
        let meta = self.enter(&self.calls.neighbors)?;
        Ok(NeighborsResponse {
            neighbors: lock!(self.data).neighbors.clone(),
            meta,
        })
    }

    fn pipes(&self) -> Result<Vec<PipeInfo>, Error> {
        self.enter(&self.calls.pipes)?;
        Ok(lock!(self.data).pipes.clone())
    }

    fn received(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error> {
        self.routes_of(&self.calls.received, |d| {
            d.received.get(&neighbor.id).cloned()
        })
    }

    fn filtered(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error> {
        self.routes_of(&self.calls.filtered, |d| {
            d.filtered.get(&neighbor.id).cloned()
        })
    }

    fn pipe_filtered(&self, pipe: &PipeInfo) -> Result<RoutesResponse, Error> {
        self.routes_of(&self.calls.pipe_filtered, |d| {
            d.pipe_filtered.get(&pipe.name).cloned()
        })
    }

    fn pipe_filtered_count(
        &self,
        _pipe: &PipeInfo,
        neighbor: &Neighbor,
    ) -> Result<u64, Error> {
        self.enter(&self.calls.pipe_filtered_count)?;
        Ok(lock!(self.data)
            .pipe_filtered_count
            .get(&neighbor.id)
            .copied()
            .unwrap_or(0))
    }

    fn not_exported(
        &self,
        neighbor: &Neighbor,
    ) -> Result<RoutesResponse, Error> {
        self.routes_of(&self.calls.not_exported, |d| {
            d.not_exported.get(&neighbor.id).cloned()
        })
    }
}

#[derive(Default)]
pub struct SourceCalls {
    pub neighbors: AtomicUsize,
    pub all_routes: AtomicUsize,
    pub expire_caches: AtomicUsize,
}

#[derive(Default)]
struct SourceData {
    neighbors: Vec<Neighbor>,
    imported: Vec<Route>,
    filtered: Vec<Route>,
    failure: Option<String>,
    delay: Option<Duration>,
    expired: usize,
}

/// A [`Source`] serving fixed data, for exercising the stores.
#[derive(Default)]
pub struct MockSource {
    data: Mutex<SourceData>,
    gate: Gate,
    pub calls: SourceCalls,
}

impl MockSource {
    pub fn set_neighbors(&self, neighbors: Vec<Neighbor>) {
        lock!(self.data).neighbors = neighbors;
    }

    pub fn set_routes(&self, imported: Vec<Route>, filtered: Vec<Route>) {
        let mut data = lock!(self.data);
        data.imported = imported;
        data.filtered = filtered;
    }

    pub fn fail_with(&self, msg: &str) {
        lock!(self.data).failure = Some(msg.to_string());
    }

    pub fn recover(&self) {
        lock!(self.data).failure = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        lock!(self.data).delay = Some(delay);
    }

    /// Number reported by the next `expire_caches` calls.
    pub fn set_expired(&self, n: usize) {
        lock!(self.data).expired = n;
    }

    /// Hold every subsequent call until [`MockSource::release`].
    pub fn hold(&self) {
        self.gate.set(true);
    }

    pub fn release(&self) {
        self.gate.set(false);
    }

    fn enter(&self, counter: &AtomicUsize) -> Result<(), Error> {
        counter.fetch_add(1, Ordering::SeqCst);
        self.gate.pass();
        let (delay, failure) = {
            let data = lock!(self.data);
            (data.delay, data.failure.clone())
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match failure {
            Some(msg) => Err(Error::Unreachable(msg)),
            None => Ok(()),
        }
    }
}

impl Source for MockSource {
    fn status(&self) -> Result<StatusInfo, Error> {
        Ok(status_info("192.0.2.254", live_meta()))
    }

    fn neighbors(&self) -> Result<NeighborsResponse, Error> {
        self.enter(&self.calls.neighbors)?;
        Ok(NeighborsResponse {
            neighbors: lock!(self.data).neighbors.clone(),
            meta: live_meta(),
        })
    }

    fn routes(&self, neighbor_id: &str) -> Result<RoutePartition, Error> {
        let data = lock!(self.data);
        let of = |routes: &Vec<Route>| -> Vec<Route> {
            routes
                .iter()
                .filter(|r| r.neighbor_id == neighbor_id)
                .cloned()
                .collect()
        };
        Ok(RoutePartition {
            imported: of(&data.imported),
            filtered: of(&data.filtered),
            not_exported: Vec::new(),
            meta: live_meta(),
        })
    }

    fn routes_received(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        let mut p = self.routes(neighbor_id)?;
        p.filtered.clear();
        Ok(p)
    }

    fn routes_filtered(
        &self,
        neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        let mut p = self.routes(neighbor_id)?;
        p.imported.clear();
        Ok(p)
    }

    fn routes_not_exported(
        &self,
        _neighbor_id: &str,
    ) -> Result<RoutePartition, Error> {
        Ok(RoutePartition {
            imported: Vec::new(),
            filtered: Vec::new(),
            not_exported: Vec::new(),
            meta: live_meta(),
        })
    }

    fn all_routes(&self) -> Result<RoutePartition, Error> {
        self.enter(&self.calls.all_routes)?;
        let data = lock!(self.data);
        Ok(RoutePartition {
            imported: data.imported.clone(),
            filtered: data.filtered.clone(),
            not_exported: Vec::new(),
            meta: live_meta(),
        })
    }

    fn expire_caches(&self) -> usize {
        self.calls.expire_caches.fetch_add(1, Ordering::SeqCst);
        lock!(self.data).expired
    }
}
