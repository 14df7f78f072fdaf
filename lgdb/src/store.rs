// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-source refresh state machine shared by the stores.
//!
//! Every source moves through `Init -> Updating -> Ready`, or
//! `Updating -> Error`. Error is not terminal; the next tick tries again. At
//! most one backend call per source is in flight, including calls the store
//! stopped waiting for after a timeout. A failed refresh keeps whatever data
//! the source had, so readers see stale data rather than none.
//!
//! Data is held as `Arc` snapshots under a single `RwLock`. The backend call
//! happens outside the lock; the write lock is only taken to flip the state
//! and to swap in new data.

use crate::error::Error;
use crate::fanout::fan_out;
use crate::log::store_log;
use crate::source::{Source, SourceHandle, SourceRegistry};
use crate::types::SourceId;
use chrono::{DateTime, Utc};
use lg_common::{read_lock, write_lock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread::Builder;
use std::time::Duration;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Init,
    Updating,
    Ready,
    Error,
}

impl Display for StoreState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Updating => "updating",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoreStatus {
    pub state: StoreState,

    /// Completion time of the last successful refresh.
    pub last_refresh: Option<DateTime<Utc>>,

    /// Set by a failed refresh and cleared by the next successful one.
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Default for StoreStatus {
    fn default() -> Self {
        Self {
            state: StoreState::Init,
            last_refresh: None,
            last_error: None,
            last_error_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// A refresh of the source, or an abandoned call to it, was already in
    /// flight.
    Skipped,
    Failed,
}

struct Entry<T> {
    data: Arc<T>,
    status: StoreStatus,

    /// Set while a backend call runs, cleared by the fetch thread itself.
    /// Outlives a timed out refresh.
    busy: Arc<AtomicBool>,
}

/// Clears a source's busy flag when the fetch thread finishes, even if the
/// fetch panics.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-source data of a store plus its refresh status.
pub(crate) struct SourceTable<T> {
    entries: RwLock<BTreeMap<SourceId, Entry<T>>>,
    timeout: Duration,
    log: Logger,
}

impl<T: Default + Send + Sync + 'static> SourceTable<T> {
    pub fn new(sources: &SourceRegistry, timeout: Duration, log: Logger) -> Self {
        let entries = sources
            .ids()
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Entry {
                        data: Arc::new(T::default()),
                        status: StoreStatus::default(),
                        busy: Arc::new(AtomicBool::new(false)),
                    },
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
            timeout,
            log,
        }
    }

    pub fn snapshot(&self, id: &SourceId) -> Option<Arc<T>> {
        read_lock!(self.entries).get(id).map(|e| e.data.clone())
    }

    pub fn status(&self, id: &SourceId) -> Option<StoreStatus> {
        read_lock!(self.entries).get(id).map(|e| e.status.clone())
    }

    /// Status and data of a source read under one lock acquisition.
    pub fn entry(&self, id: &SourceId) -> Option<(StoreStatus, Arc<T>)> {
        read_lock!(self.entries)
            .get(id)
            .map(|e| (e.status.clone(), e.data.clone()))
    }

    /// Move a source to Updating and mark it busy. Returns None if a refresh
    /// is under way or an earlier call to the backend has not returned yet.
    fn begin(&self, id: &SourceId) -> Result<Option<BusyGuard>, Error> {
        let mut entries = write_lock!(self.entries);
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| Error::SourceNotFound(id.clone()))?;
        if entry.status.state == StoreState::Updating
            || entry.busy.swap(true, Ordering::SeqCst)
        {
            return Ok(None);
        }
        entry.status.state = StoreState::Updating;
        Ok(Some(BusyGuard(entry.busy.clone())))
    }

    fn finish(&self, id: &SourceId, result: Result<T, Error>) -> RefreshOutcome {
        let mut entries = write_lock!(self.entries);
        let Some(entry) = entries.get_mut(id) else {
            return RefreshOutcome::Failed;
        };
        let now = Utc::now();
        match result {
            Ok(data) => {
                entry.data = Arc::new(data);
                entry.status.state = StoreState::Ready;
                entry.status.last_refresh = Some(now);
                entry.status.last_error = None;
                entry.status.last_error_at = None;
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                entry.status.state = StoreState::Error;
                entry.status.last_error = Some(e.to_string());
                entry.status.last_error_at = Some(now);
                RefreshOutcome::Failed
            }
        }
    }

    /// Refresh one source with `fetch`, bounded by the table's timeout.
    pub fn refresh(
        &self,
        handle: &SourceHandle,
        fetch: fn(&dyn Source) -> Result<T, Error>,
    ) -> Result<RefreshOutcome, Error> {
        let Some(busy) = self.begin(&handle.id)? else {
            store_log!(self.log, debug,
                "refresh of source {} already in flight", handle.id;
                "source" => handle.id.to_string()
            );
            return Ok(RefreshOutcome::Skipped);
        };

        let result = call_with_timeout(handle, self.timeout, busy, fetch);
        if let Err(e) = &result {
            store_log!(self.log, warn,
                "refresh of source {} failed: {}", handle.id, e;
                "source" => handle.id.to_string()
            );
        }
        Ok(self.finish(&handle.id, result))
    }

    /// Refresh every source concurrently and wait for all of them.
    pub fn refresh_all(
        &self,
        sources: &SourceRegistry,
        fetch: fn(&dyn Source) -> Result<T, Error>,
    ) -> Vec<(SourceId, RefreshOutcome)> {
        fan_out(sources.iter(), |handle| {
            let outcome = match self.refresh(handle, fetch) {
                Ok(outcome) => outcome,
                Err(e) => {
                    store_log!(self.log, error,
                        "refresh of source {} not started: {}", handle.id, e;
                        "source" => handle.id.to_string()
                    );
                    RefreshOutcome::Failed
                }
            };
            (handle.id.clone(), outcome)
        })
    }
}

/// Run `fetch` against the source on a separate thread and give up after
/// `timeout`. An abandoned call runs to completion in the background and its
/// result is discarded. `busy` is released when the call returns, not when
/// the wait ends.
fn call_with_timeout<T: Send + 'static>(
    handle: &SourceHandle,
    timeout: Duration,
    busy: BusyGuard,
    fetch: fn(&dyn Source) -> Result<T, Error>,
) -> Result<T, Error> {
    let source = handle.source.clone();
    let (tx, rx) = sync_channel(1);
    Builder::new()
        .name(format!("fetch-{}", handle.id))
        .spawn(move || {
            let result = fetch(source.as_ref());
            drop(busy);
            let _ = tx.send(result);
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::InternalCommunication(format!(
                "fetch from source {} exited without a result",
                handle.id
            )))
        }
    }
}
