// Avalanche: Predictive Fast Reroute for BGP Withdrawal Bursts
// Copyright (C) 2021  Tibor Schneider
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! # Per-Peer RIB
//!
//! The routing information base of a single peering session: a plain mapping from prefix to the
//! AS path currently used to reach it. Both mutations return the previously stored path, which
//! the pipeline needs to keep the topology graphs in sync.

use std::collections::HashMap;

/// Routing information base of one peer.
#[derive(Debug, Default)]
pub struct RibPeer {
    rib: HashMap<String, Vec<u32>>,
}

impl RibPeer {
    /// Create an empty RIB.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the AS path for a prefix and return the previously stored path (empty if the prefix
    /// was unknown).
    pub fn update(&mut self, prefix: &str, as_path: &[u32]) -> Vec<u32> {
        self.rib.insert(prefix.to_string(), as_path.to_vec()).unwrap_or_default()
    }

    /// Delete a prefix and return the last AS path known for it (empty if the prefix was
    /// unknown).
    pub fn withdraw(&mut self, prefix: &str) -> Vec<u32> {
        self.rib.remove(prefix).unwrap_or_default()
    }

    /// The AS path currently stored for a prefix.
    pub fn get(&self, prefix: &str) -> Option<&Vec<u32>> {
        self.rib.get(prefix)
    }

    /// Number of prefixes in the RIB.
    pub fn len(&self) -> usize {
        self.rib.len()
    }

    /// Returns `true` if the RIB contains no prefix.
    pub fn is_empty(&self) -> bool {
        self.rib.is_empty()
    }

    /// Iterate over all (prefix, AS path) entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<u32>)> {
        self.rib.iter()
    }

    /// Iterate over all prefixes.
    pub fn prefixes(&self) -> impl Iterator<Item = &String> {
        self.rib.keys()
    }
}
