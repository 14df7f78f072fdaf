// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The looking-glass database (lgdb).
//!
//! lgdb aggregates routing state from a federation of route-server
//! backends. Every configured backend is a [`source::Source`]. The
//! [`neighbors::NeighborsStore`] and [`routes::RoutesStore`] poll all sources
//! on an interval and keep the last good view of each one in memory, so that
//! lookups across the federation are answered locally even when individual
//! backends are slow or down.

pub mod cache;
pub mod communities;
pub mod config;
pub mod error;
pub mod fanout;
pub mod housekeeping;
pub mod multi_table;
pub mod neighbors;
pub mod reconcile;
pub mod routes;
pub mod source;
pub mod static_file;
pub mod store;
pub mod types;

mod log;

#[cfg(test)]
mod proptest;

#[cfg(test)]
mod test;

pub use communities::CommunityRegistry;
pub use neighbors::NeighborsStore;
pub use routes::RoutesStore;
pub use source::{Source, SourceHandle, SourceRegistry};
pub use types::*;

pub const COMPONENT_LGDB: &str = "lgdb";
pub const MOD_STORE: &str = "store";
pub const MOD_SOURCE: &str = "source";
pub const MOD_HOUSEKEEPING: &str = "housekeeping";

/// Interval between refreshes of the neighbor and route stores, and between
/// housekeeping runs, unless configured otherwise.
pub const DEFAULT_REFRESH_INTERVAL: std::time::Duration =
    std::time::Duration::from_secs(5 * 60);

/// Upper bound on a single backend call made from a refresh tick.
pub const DEFAULT_SOURCE_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(30);

/// Maximum number of responses held per cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;
