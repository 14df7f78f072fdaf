// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human readable labels for BGP communities.
//!
//! Rules are keyed by colon separated community parts, e.g. `65535:666` or
//! `65000:1:2`. Any part may be the wildcard `*`, which matches any value at
//! that position. A rule only ever matches queries of the same arity. Labels
//! of wildcard rules may refer to the matched values as `$0`, `$1`, ... in
//! the order the wildcards appear.

use crate::error::Error;
use crate::types::Route;
use std::collections::BTreeMap;

pub const WILDCARD: &str = "*";

/// IANA registered well-known communities.
const WELL_KNOWN: &[(&str, &str)] = &[
    ("65535:0", "graceful_shutdown"),
    ("65535:1", "accept_own"),
    ("65535:2", "route_filter_translated_v4"),
    ("65535:3", "route_filter_v4"),
    ("65535:4", "route_filter_translated_v6"),
    ("65535:5", "route_filter_v6"),
    ("65535:6", "llgr_stale"),
    ("65535:7", "no_llgr"),
    ("65535:8", "accept_own_nexthop"),
    ("65535:666", "blackhole"),
    ("65535:65281", "no_export"),
    ("65535:65282", "no_advertise"),
    ("65535:65283", "no_export_subconfed"),
    ("65535:65284", "nopeer"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    label: Option<String>,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn find<'a>(
        &'a self,
        parts: &[String],
        matched: &mut Vec<String>,
    ) -> Option<&'a str> {
        let Some((head, rest)) = parts.split_first() else {
            return self.label.as_deref();
        };
        if let Some(child) = self.children.get(head) {
            if let Some(label) = child.find(rest, matched) {
                return Some(label);
            }
        }
        if let Some(child) = self.children.get(WILDCARD) {
            matched.push(head.clone());
            if let Some(label) = child.find(rest, matched) {
                return Some(label);
            }
            matched.pop();
        }
        None
    }

    fn collect(&self, prefix: &mut Vec<String>, out: &mut Vec<(String, String)>) {
        if let Some(label) = &self.label {
            out.push((prefix.join(":"), label.clone()));
        }
        for (part, child) in &self.children {
            prefix.push(part.clone());
            child.collect(prefix, out);
            prefix.pop();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityRegistry {
    root: Node,
}

impl Default for CommunityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunityRegistry {
    /// A registry holding the well-known communities.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (key, label) in WELL_KNOWN {
            // Well-known keys are valid by construction.
            let _ = registry.set(key, label);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            root: Node::default(),
        }
    }

    /// The well-known communities overlaid with `rules`.
    pub fn with_rules<'a, I>(rules: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut registry = Self::new();
        for (key, label) in rules {
            registry.set(key, label)?;
        }
        Ok(registry)
    }

    /// Insert or overwrite the rule for `key`.
    pub fn set(&mut self, key: &str, label: &str) -> Result<(), Error> {
        let parts = parse_key(key)?;
        let mut node = &mut self.root;
        for part in parts {
            node = node.children.entry(part).or_default();
        }
        node.label = Some(label.to_string());
        Ok(())
    }

    /// Resolve a community to its label. Exact parts take precedence over
    /// wildcards at every position.
    pub fn lookup(&self, key: &str) -> Result<String, Error> {
        let parts = parse_key(key)?;
        let mut matched = Vec::new();
        let label = self
            .root
            .find(&parts, &mut matched)
            .ok_or_else(|| Error::CommunityNotFound(key.to_string()))?;
        Ok(expand(label, &matched))
    }

    /// A new registry with the rules of `self` overridden by those of
    /// `other`.
    pub fn merge(&self, other: &CommunityRegistry) -> CommunityRegistry {
        let mut merged = self.clone();
        for (key, label) in other.entries() {
            // Keys coming out of a registry were validated going in.
            let _ = merged.set(&key, &label);
        }
        merged
    }

    /// All rules as `(key, label)`, ordered by key parts.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.root.collect(&mut Vec::new(), &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels for every community carried by `route` that has one, keyed by
    /// the rendered community.
    pub fn labels_for(&self, route: &Route) -> BTreeMap<String, String> {
        let bgp = &route.bgp;
        bgp.communities
            .iter()
            .chain(bgp.large_communities.iter())
            .map(|c| c.to_string())
            .chain(bgp.ext_communities.iter().map(|c| c.to_string()))
            .filter_map(|key| {
                self.lookup(&key).ok().map(|label| (key, label))
            })
            .collect()
    }
}

fn parse_key(key: &str) -> Result<Vec<String>, Error> {
    let parts: Vec<String> =
        key.split(':').map(|p| p.trim().to_string()).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidCommunity(key.to_string()));
    }
    Ok(parts)
}

fn expand(label: &str, matched: &[String]) -> String {
    let mut out = label.to_string();
    // Highest index first so $1 does not clobber the prefix of $10.
    for (i, value) in matched.iter().enumerate().rev() {
        out = out.replace(&format!("${i}"), value);
    }
    out
}
