// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route reconciliation.
//!
//! A route server in multi-table mode imports each peer into its own table
//! and then pipes every peer table into a shared master table. Policy can
//! reject a route at either stage: in the peer protocol (stage 1) or in the
//! pipe (stage 2). Backends report what a peer announced (received routes)
//! and what was rejected (filtered routes) through separate queries, and the
//! stage 2 query is table wide rather than per peer. This module turns those
//! observations into an authoritative imported/filtered partition for one
//! neighbor, and attributes pipe filtered counts to neighbors for the
//! neighbor summary.

use crate::error::Error;
use crate::types::{Neighbor, PipeInfo, Route};
use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

/// Sort a combined filtered set by network for deterministic output. The
/// sort is stable, so stage 1 routes stay ahead of stage 2 routes for the
/// same network.
pub fn sort_by_network(routes: &mut [Route]) {
    routes.sort_by(|a, b| a.network.cmp(&b.network));
}

/// The peer address and learnt-from address of a neighbor, as observed on
/// its first received route. Learnt-from falls back to the peer address.
pub fn peer_identity(received: &[Route]) -> Option<(IpAddr, IpAddr)> {
    let first = received.first()?;
    Some((first.gateway, first.learnt_from.unwrap_or(first.gateway)))
}

/// Narrow a (possibly table wide) filtered set down to the routes of one
/// peer.
pub fn narrow_to_peer(
    filtered: Vec<Route>,
    peer: IpAddr,
    learnt_from: IpAddr,
) -> Vec<Route> {
    filtered
        .into_iter()
        .filter(|r| r.gateway == peer || r.learnt_from == Some(learnt_from))
        .collect()
}

/// Received routes that do not also appear, by id, in `filtered`. A route
/// reported as both received and filtered was rejected.
pub fn without_filtered(received: Vec<Route>, filtered: &[Route]) -> Vec<Route> {
    let rejected: HashSet<&str> =
        filtered.iter().map(|r| r.id.as_str()).collect();
    received
        .into_iter()
        .filter(|r| !rejected.contains(r.id.as_str()))
        .collect()
}

/// Reconcile one neighbor's received routes against its combined filtered
/// routes. Returns `(imported, filtered)`. `filtered` is expected to be
/// sorted already.
pub fn reconcile(
    received: Vec<Route>,
    filtered: Vec<Route>,
) -> (Vec<Route>, Vec<Route>) {
    let Some((peer, learnt_from)) = peer_identity(&received) else {
        return (Vec::new(), Vec::new());
    };
    let filtered = narrow_to_peer(filtered, peer, learnt_from);
    let imported = without_filtered(received, &filtered);
    (imported, filtered)
}

/// How pipe filtered routes of one table were attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// The pipe passed every route of the table.
    NothingFiltered,
    /// The table has one neighbor, which gets the whole delta.
    SingleNeighbor,
    /// The pipe passed nothing, every neighbor lost all its routes.
    EverythingFiltered,
    /// Counts were obtained per neighbor from the backend.
    PerNeighborQuery,
}

/// Attribute routes filtered in pipes to the neighbors of the piped tables
/// and adjust their counters: `accepted -= delta`, `filtered += delta`,
/// `pipe_filtered = delta`.
///
/// `count_filtered` is only called when several neighbors share a table and
/// the pipe passed some but not all of the table's routes; aggregate counts
/// cannot tell them apart in that case.
///
/// Returns the attribution chosen for each table that has a pipe.
pub fn attribute_pipe_filtered<F>(
    neighbors: &mut [Neighbor],
    pipes: &[PipeInfo],
    mut count_filtered: F,
) -> Result<BTreeMap<String, Attribution>, Error>
where
    F: FnMut(&PipeInfo, &Neighbor) -> Result<u64, Error>,
{
    let by_table: BTreeMap<String, Vec<usize>> = neighbors
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.table.clone().map(|t| (t, i)))
        .into_group_map()
        .into_iter()
        .collect();

    let mut result = BTreeMap::new();
    for (table, members) in by_table {
        let Some(pipe) = pipes.iter().find(|p| p.table == table) else {
            continue;
        };
        let table_imported: u64 =
            members.iter().map(|i| neighbors[*i].routes.accepted).sum();

        let attribution = if pipe.imported == table_imported {
            Attribution::NothingFiltered
        } else if members.len() == 1 {
            let delta = table_imported.saturating_sub(pipe.imported);
            apply_delta(&mut neighbors[members[0]], delta);
            Attribution::SingleNeighbor
        } else if pipe.imported == 0 {
            for i in &members {
                let delta = neighbors[*i].routes.accepted;
                apply_delta(&mut neighbors[*i], delta);
            }
            Attribution::EverythingFiltered
        } else {
            for i in &members {
                let delta = count_filtered(pipe, &neighbors[*i])?;
                apply_delta(&mut neighbors[*i], delta);
            }
            Attribution::PerNeighborQuery
        };
        result.insert(table, attribution);
    }
    Ok(result)
}

fn apply_delta(n: &mut Neighbor, delta: u64) {
    n.routes.accepted = n.routes.accepted.saturating_sub(delta);
    n.routes.filtered = n.routes.filtered.saturating_add(delta);
    n.routes.pipe_filtered = delta;
}
