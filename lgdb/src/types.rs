// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, TimeDelta, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

/// Identity of a configured route-server backend. Stable for the lifetime of
/// the process.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Up,
    Down,
    Start,
    Passive,
    Disabled,
    #[default]
    Unknown,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Start => "start",
            Self::Passive => "passive",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Per-category route counts of a neighbor. `accepted` is the number of
/// routes the neighbor's protocol imported into its table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(default)]
pub struct RouteCounters {
    pub received: u64,
    pub filtered: u64,
    pub exported: u64,
    pub preferred: u64,
    pub accepted: u64,
    pub pipe_filtered: u64,
}

/// A BGP peering session as seen by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Neighbor {
    pub id: String,
    pub address: IpAddr,
    pub asn: u32,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub routes: RouteCounters,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default)]
    pub last_error: Option<String>,

    /// The routing table this neighbor's protocol imports into. Neighbors
    /// sharing a table may also share a pipe into the master table.
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// A standard or large BGP community, rendered colon separated.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(transparent)]
pub struct Community(pub Vec<u32>);

impl Display for Community {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|x| x.to_string()).collect();
        write!(f, "{}", parts.join(":"))
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct ExtCommunity {
    pub kind: String,
    pub admin: String,
    pub value: String,
}

impl Display for ExtCommunity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.admin, self.value)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(default)]
pub struct BgpInfo {
    pub origin: String,
    pub as_path: Vec<u32>,
    pub next_hop: Option<IpAddr>,
    pub communities: Vec<Community>,
    pub ext_communities: Vec<ExtCommunity>,
    pub large_communities: Vec<Community>,
    pub local_pref: u32,
    pub med: u32,
}

/// One routing table entry. Routes are never modified after they have been
/// fetched from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Route {
    pub id: String,
    pub neighbor_id: String,
    pub network: String,
    pub gateway: IpAddr,

    /// The peer the route was learnt from, when it differs from the gateway
    /// (e.g. on route servers with next-hop rewriting disabled).
    #[serde(default)]
    pub learnt_from: Option<IpAddr>,

    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub metric: u32,
    #[serde(default)]
    pub bgp: BgpInfo,
    #[serde(default)]
    pub age_secs: u64,
    #[serde(default)]
    pub route_type: Vec<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Which side of the reconciled partition a looked up route came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Imported,
    Filtered,
}

/// A route denormalized with its owning neighbor and source. Built at query
/// time, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LookupRoute {
    pub route: Route,
    pub state: RouteState,
    pub neighbor: Option<Neighbor>,
    pub source_id: SourceId,
    pub source_name: String,
    pub community_labels: BTreeMap<String, String>,
}

/// Cache bookkeeping attached to every backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMeta {
    pub as_of: DateTime<Utc>,
    pub cache_until: DateTime<Utc>,
    pub result_from_cache: bool,
}

impl ResponseMeta {
    /// Metadata for a response fetched now that may be cached for `ttl`.
    /// A TTL past the end of representable time is clamped to it; one that
    /// does not fit a `TimeDelta` at all is treated as zero.
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::zero());
        Self {
            as_of: now,
            cache_until: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            result_from_cache: false,
        }
    }

    /// Remaining validity; zero or negative once lapsed.
    pub fn ttl(&self) -> TimeDelta {
        self.cache_until - Utc::now()
    }
}

/// Anything that can live in a [`crate::cache::ResponseCache`].
pub trait Expires {
    /// Time remaining until the value lapses. Non-positive values mean the
    /// value must be treated as absent.
    fn ttl(&self) -> TimeDelta;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusInfo {
    pub router_id: String,
    pub version: String,
    pub server_time: DateTime<Utc>,
    pub last_reboot: Option<DateTime<Utc>>,
    pub last_reconfig: Option<DateTime<Utc>>,
    pub message: String,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NeighborsResponse {
    pub neighbors: Vec<Neighbor>,
    pub meta: ResponseMeta,
}

/// A flat list of routes as returned by a single backend query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutesResponse {
    pub routes: Vec<Route>,
    pub meta: ResponseMeta,
}

/// The reconciled imported/filtered routes of one neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutePair {
    pub imported: Vec<Route>,
    pub filtered: Vec<Route>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutePartition {
    pub imported: Vec<Route>,
    pub filtered: Vec<Route>,
    pub not_exported: Vec<Route>,
    pub meta: ResponseMeta,
}

impl From<RoutePair> for RoutePartition {
    fn from(value: RoutePair) -> Self {
        Self {
            imported: value.imported,
            filtered: value.filtered,
            not_exported: Vec::new(),
            meta: value.meta,
        }
    }
}

/// A pipe from a per-peer table into the shared master table, with the
/// number of routes it let through.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct PipeInfo {
    pub name: String,
    pub table: String,
    pub imported: u64,
}

/// A backend response carrying [`ResponseMeta`].
pub trait Response: Expires {
    fn meta(&self) -> &ResponseMeta;
    fn meta_mut(&mut self) -> &mut ResponseMeta;
}

macro_rules! impl_response {
    ($($ty:ty),*) => {
        $(
            impl Expires for $ty {
                fn ttl(&self) -> TimeDelta {
                    self.meta.ttl()
                }
            }

            impl Response for $ty {
                fn meta(&self) -> &ResponseMeta {
                    &self.meta
                }

                fn meta_mut(&mut self) -> &mut ResponseMeta {
                    &mut self.meta
                }
            }
        )*
    };
}

impl_response!(
    StatusInfo,
    NeighborsResponse,
    RoutesResponse,
    RoutePair,
    RoutePartition
);
