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

//! # Global RIB
//!
//! Aggregates the advertisements of every peer into one ordered route set per prefix. The best
//! route (primary) is the first of the set, the second best (backup) the next one. The order is
//! a strict total order: shorter AS path first, ties broken by ascending peer IP, remaining
//! ties by element-wise AS-path comparison preferring the smaller earlier AS. Two routes of
//! equal length and equal peer IP but distinct paths are therefore never considered equal.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// One route towards a prefix, as learned from one peer.
#[derive(Debug, Clone, Eq)]
pub struct BgpRoute {
    /// The destination prefix.
    pub prefix: String,
    /// IP address of the peer advertising the route.
    pub peer_ip: String,
    /// AS path of the route.
    pub as_path: Vec<u32>,
    /// The AS-path code bits the peer pipeline attached to the advertisement.
    pub partial_vmac: String,
}

impl BgpRoute {
    /// Create a new route.
    pub fn new(prefix: &str, peer_ip: &str, as_path: Vec<u32>, partial_vmac: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            peer_ip: peer_ip.to_string(),
            as_path,
            partial_vmac: partial_vmac.to_string(),
        }
    }

    /// The AS path rendered as a space-separated string.
    pub fn as_path_text(&self) -> String {
        self.as_path.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ")
    }

    /// Returns `true` if the AS path contains the link as a consecutive pair, in either
    /// direction.
    pub fn traverses_link(&self, as_link: (u32, u32)) -> bool {
        self.as_path.windows(2).any(|w| {
            (w[0], w[1]) == as_link || (w[1], w[0]) == as_link
        })
    }
}

impl PartialEq for BgpRoute {
    fn eq(&self, other: &Self) -> bool {
        self.peer_ip == other.peer_ip && self.as_path == other.as_path
    }
}

impl Ord for BgpRoute {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.as_path.len().cmp(&other.as_path.len()) {
            Ordering::Equal => {}
            o => return o,
        }
        match self.peer_ip.cmp(&other.peer_ip) {
            Ordering::Equal => {}
            o => return o,
        }
        for (a, b) in self.as_path.iter().zip(other.as_path.iter()) {
            match a.cmp(b) {
                Ordering::Equal => {}
                o => return o,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for BgpRoute {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The outcome of one global-RIB mutation: the primary and backup routes before and after, and
/// the route this peer contributed before (on announce) or just withdrew (on withdraw).
#[derive(Debug, Clone, Default)]
pub struct RouteChange {
    /// Primary route before the mutation.
    pub previous_primary: Option<BgpRoute>,
    /// Primary route after the mutation.
    pub new_primary: Option<BgpRoute>,
    /// The route this peer previously advertised (announce) or just withdrew (withdraw).
    pub peer_route: Option<BgpRoute>,
    /// Backup route before the mutation.
    pub previous_backup: Option<BgpRoute>,
    /// Backup route after the mutation.
    pub new_backup: Option<BgpRoute>,
}

/// The global routing information base: one ordered route set per prefix, plus a per-peer view.
#[derive(Debug, Default)]
pub struct RibGlobal {
    rib: HashMap<String, BTreeSet<BgpRoute>>,
    rib_peer: HashMap<String, HashMap<String, BgpRoute>>,
}

impl RibGlobal {
    /// Create an empty global RIB.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an advertisement: replace whatever this peer advertised for the prefix before,
    /// and report the primary/backup routes before and after.
    pub fn announce(&mut self, route: BgpRoute) -> RouteChange {
        let mut change = RouteChange::default();
        let prefix = route.prefix.clone();

        let routes = self.rib.entry(prefix.clone()).or_insert_with(BTreeSet::new);
        change.previous_primary = routes.iter().next().cloned();
        change.previous_backup = routes.iter().nth(1).cloned();

        let peer_routes =
            self.rib_peer.entry(route.peer_ip.clone()).or_insert_with(HashMap::new);
        if let Some(previous) = peer_routes.remove(&prefix) {
            routes.remove(&previous);
            change.peer_route = Some(previous);
        }

        routes.insert(route.clone());
        peer_routes.insert(prefix, route);

        change.new_primary = routes.iter().next().cloned();
        change.new_backup = routes.iter().nth(1).cloned();
        change
    }

    /// Process a withdrawal: remove the route this peer advertised for the prefix (if any), and
    /// report the primary/backup routes before and after.
    pub fn withdraw(&mut self, peer_ip: &str, prefix: &str) -> RouteChange {
        let mut change = RouteChange::default();

        let withdrawn = match self.rib_peer.get_mut(peer_ip).and_then(|p| p.remove(prefix)) {
            Some(route) => route,
            None => return change,
        };
        if self.rib_peer.get(peer_ip).map(|p| p.is_empty()).unwrap_or(false) {
            self.rib_peer.remove(peer_ip);
        }

        if let Some(routes) = self.rib.get_mut(prefix) {
            change.previous_primary = routes.iter().next().cloned();
            change.previous_backup = routes.iter().nth(1).cloned();

            routes.remove(&withdrawn);
            if routes.is_empty() {
                self.rib.remove(prefix);
            } else {
                change.new_primary = routes.iter().next().cloned();
                change.new_backup = routes.iter().nth(1).cloned();
            }
        }

        change.peer_route = Some(withdrawn);
        change
    }

    /// The ordered route set of a prefix.
    pub fn routes(&self, prefix: &str) -> Option<&BTreeSet<BgpRoute>> {
        self.rib.get(prefix)
    }

    /// The current primary route of a prefix.
    pub fn primary(&self, prefix: &str) -> Option<&BgpRoute> {
        self.rib.get(prefix).and_then(|r| r.iter().next())
    }

    /// The current backup route of a prefix.
    pub fn backup(&self, prefix: &str) -> Option<&BgpRoute> {
        self.rib.get(prefix).and_then(|r| r.iter().nth(1))
    }

    /// Find the backup route of a prefix that avoids a given AS link: the first route from a
    /// different peer whose AS path contains neither (u, v) nor (v, u) as a consecutive pair.
    /// When every alternate route contains the link (or with `traditional` set), the first
    /// different-peer route wins.
    pub fn get_backup_avoiding_aslink(
        &self,
        peer_ip: &str,
        prefix: &str,
        as_link: (u32, u32),
        traditional: bool,
    ) -> Option<&BgpRoute> {
        let routes = self.rib.get(prefix)?;

        let mut selected = None;
        let mut best_aspath = None;

        for route in routes.iter() {
            if route.peer_ip != peer_ip {
                if best_aspath.is_none() {
                    best_aspath = Some(route);
                    if traditional {
                        break;
                    }
                }
                if !route.traverses_link(as_link) {
                    selected = Some(route);
                    break;
                }
            }
        }

        if selected.is_none() || traditional {
            best_aspath
        } else {
            selected
        }
    }

    /// Returns `true` if the peer still advertises some route for the prefix.
    pub fn backup_available(&self, prefix: &str, backup_peer: &str) -> bool {
        self.rib
            .get(prefix)
            .map(|routes| routes.iter().any(|r| r.peer_ip == backup_peer))
            .unwrap_or(false)
    }

    /// Number of prefixes with at least one route.
    pub fn len(&self) -> usize {
        self.rib.len()
    }

    /// Returns `true` if no prefix has a route.
    pub fn is_empty(&self) -> bool {
        self.rib.is_empty()
    }
}
