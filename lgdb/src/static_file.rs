// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A [`RouteBackend`] serving a JSON dump of a route server from disk.
//!
//! The dump is re-read on every query, so replacing the file is enough to
//! change what the backend reports. Responses are stamped with the
//! configured cache TTL.

use crate::error::Error;
use crate::multi_table::RouteBackend;
use crate::types::{
    Neighbor, NeighborsResponse, PipeInfo, ResponseMeta, Route, RoutesResponse,
    StatusInfo,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dump {
    pub status: DumpStatus,
    pub neighbors: Vec<Neighbor>,
    pub pipes: Vec<DumpPipe>,

    /// Routes by neighbor id.
    pub routes: BTreeMap<String, NeighborRoutes>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpStatus {
    pub router_id: String,
    pub version: String,
    pub last_reboot: Option<DateTime<Utc>>,
    pub last_reconfig: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpPipe {
    pub name: String,
    pub table: String,
    pub imported: u64,

    /// Routes the pipe rejected, for all neighbors of its table.
    #[serde(default)]
    pub filtered: Vec<Route>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborRoutes {
    pub received: Vec<Route>,
    pub filtered: Vec<Route>,
    pub not_exported: Vec<Route>,
}

pub struct StaticFileBackend {
    path: PathBuf,
    ttl: Duration,
}

impl StaticFileBackend {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self { path, ttl }
    }

    fn load(&self) -> Result<Dump, Error> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Unreachable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            Error::Malformed(format!("{}: {e}", self.path.display()))
        })
    }

    fn meta(&self) -> ResponseMeta {
        ResponseMeta::new(self.ttl)
    }

    fn routes_of<F>(
        &self,
        neighbor: &Neighbor,
        pick: F,
    ) -> Result<RoutesResponse, Error>
    where
        F: FnOnce(NeighborRoutes) -> Vec<Route>,
    {
        let routes = self
            .load()?
            .routes
            .remove(&neighbor.id)
            .map(pick)
            .unwrap_or_default();
        Ok(RoutesResponse {
            routes,
            meta: self.meta(),
        })
    }

    fn pipe(&self, pipe: &PipeInfo) -> Result<Option<DumpPipe>, Error> {
        Ok(self.load()?.pipes.into_iter().find(|p| p.name == pipe.name))
    }
}

impl RouteBackend for StaticFileBackend {
    fn status(&self) -> Result<StatusInfo, Error> {
        let status = self.load()?.status;
        Ok(StatusInfo {
            router_id: status.router_id,
            version: status.version,
            server_time: Utc::now(),
            last_reboot: status.last_reboot,
            last_reconfig: status.last_reconfig,
            message: status.message,
            meta: self.meta(),
        })
    }

    fn neighbors(&self) -> Result<NeighborsResponse, Error> {
        Ok(NeighborsResponse {
            neighbors: self.load()?.neighbors,
            meta: self.meta(),
        })
    }

    fn pipes(&self) -> Result<Vec<PipeInfo>, Error> {
        Ok(self
            .load()?
            .pipes
            .into_iter()
            .map(|p| PipeInfo {
                name: p.name,
                table: p.table,
                imported: p.imported,
            })
            .collect())
    }

    fn received(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error> {
        self.routes_of(neighbor, |r| r.received)
    }

    fn filtered(&self, neighbor: &Neighbor) -> Result<RoutesResponse, Error> {
        self.routes_of(neighbor, |r| r.filtered)
    }

    fn pipe_filtered(&self, pipe: &PipeInfo) -> Result<RoutesResponse, Error> {
        Ok(RoutesResponse {
            routes: self.pipe(pipe)?.map(|p| p.filtered).unwrap_or_default(),
            meta: self.meta(),
        })
    }

    fn pipe_filtered_count(
        &self,
        pipe: &PipeInfo,
        neighbor: &Neighbor,
    ) -> Result<u64, Error> {
        let Some(pipe) = self.pipe(pipe)? else {
            return Ok(0);
        };
        let count = pipe
            .filtered
            .iter()
            .filter(|r| r.neighbor_id == neighbor.id)
            .count();
        Ok(count as u64)
    }

    fn not_exported(
        &self,
        neighbor: &Neighbor,
    ) -> Result<RoutesResponse, Error> {
        self.routes_of(neighbor, |r| r.not_exported)
    }
}
