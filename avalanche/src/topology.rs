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

//! # AS Topology Graph
//!
//! Directed graph over AS numbers, weighted by the number of stored AS paths traversing each
//! edge. Two instances exist per peer: one counting the paths currently in the RIB, and one
//! counting the paths of the withdrawals inside the sliding window.
//!
//! Every edge additionally keeps a per-depth counter, where the depth of an edge is the 1-based
//! position of its destination along the AS path. Edges are later encoded into codes at a
//! specific path position, so failures must be predicted together with the depth at which they
//! appear along each affected prefix.
//!
//! The graph maintains two watermark sets: the nodes whose outgoing (resp. incoming) path count
//! reached `w_threshold`. Membership changes at the instant a counter crosses the threshold,
//! which gives the burst predictor an O(1) enumeration of the heavy nodes.

use itertools::Itertools;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Attributes of one AS-level edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeInfo {
    /// Number of stored AS paths traversing this edge.
    pub prefix_counter: f64,
    /// Number of stored AS paths traversing this edge, per depth (1-based position of the edge
    /// destination along the path).
    pub depth: BTreeMap<usize, u64>,
    /// The prefixes whose paths traverse this edge. Only filled when prefix tracking is enabled.
    pub prefixes: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NodeCounters {
    out_prefixes: u64,
    in_prefixes: u64,
}

/// Directed AS-level topology weighted by path counters.
#[derive(Debug)]
pub struct AsTopology {
    graph: DiGraphMap<u32, EdgeInfo>,
    nodes: HashMap<u32, NodeCounters>,
    nodes_forward: BTreeSet<u32>,
    nodes_backward: BTreeSet<u32>,
    w_threshold: u64,
    silent: bool,
}

impl AsTopology {
    /// Create an empty topology. `w_threshold` is the path count at which a node enters the
    /// watermark sets. With `silent` set, the per-edge prefix sets are not tracked.
    pub fn new(w_threshold: u64, silent: bool) -> Self {
        Self {
            graph: DiGraphMap::new(),
            nodes: HashMap::new(),
            nodes_forward: BTreeSet::new(),
            nodes_backward: BTreeSet::new(),
            w_threshold,
            silent,
        }
    }

    /// Register an AS path. Walks all consecutive pairs, incrementing the node and edge
    /// counters and creating missing nodes and edges on the way.
    pub fn add(&mut self, as_path: &[u32], prefix: Option<&str>) {
        for (i, (u, v)) in as_path.iter().copied().tuple_windows().enumerate() {
            let out = self.nodes.entry(u).or_default();
            out.out_prefixes += 1;
            if out.out_prefixes == self.w_threshold {
                self.nodes_forward.insert(u);
            }
            let inc = self.nodes.entry(v).or_default();
            inc.in_prefixes += 1;
            if inc.in_prefixes == self.w_threshold {
                self.nodes_backward.insert(v);
            }

            if !self.graph.contains_edge(u, v) {
                self.graph.add_edge(u, v, EdgeInfo::default());
            }
            if let Some(info) = self.graph.edge_weight_mut(u, v) {
                info.prefix_counter += 1.0;
                *info.depth.entry(i + 1).or_insert(0) += 1;
                if !self.silent {
                    if let Some(p) = prefix {
                        info.prefixes.insert(p.to_string());
                    }
                }
            }
        }
    }

    /// Unregister an AS path. Mirrors [`AsTopology::add`] and garbage-collects edges whose
    /// counter dropped to zero as well as isolated nodes.
    pub fn remove(&mut self, as_path: &[u32], prefix: Option<&str>) {
        for (i, (u, v)) in as_path.iter().copied().tuple_windows().enumerate() {
            if let Some(out) = self.nodes.get_mut(&u) {
                out.out_prefixes = out.out_prefixes.saturating_sub(1);
                if out.out_prefixes + 1 == self.w_threshold {
                    self.nodes_forward.remove(&u);
                }
            }
            if let Some(inc) = self.nodes.get_mut(&v) {
                inc.in_prefixes = inc.in_prefixes.saturating_sub(1);
                if inc.in_prefixes + 1 == self.w_threshold {
                    self.nodes_backward.remove(&v);
                }
            }

            let mut drop_edge = false;
            if let Some(info) = self.graph.edge_weight_mut(u, v) {
                info.prefix_counter -= 1.0;
                if let Some(d) = info.depth.get_mut(&(i + 1)) {
                    *d -= 1;
                    if *d == 0 {
                        info.depth.remove(&(i + 1));
                    }
                }
                if !self.silent {
                    if let Some(p) = prefix {
                        info.prefixes.remove(p);
                    }
                }
                drop_edge = info.prefix_counter <= 0.0;
            }
            if drop_edge {
                self.graph.remove_edge(u, v);
                self.gc_node(u);
                self.gc_node(v);
            }
        }
    }

    fn gc_node(&mut self, n: u32) {
        let isolated = self.graph.neighbors_directed(n, Direction::Outgoing).next().is_none()
            && self.graph.neighbors_directed(n, Direction::Incoming).next().is_none();
        if isolated {
            self.graph.remove_node(n);
            if self.nodes.get(&n).map(|c| *c == NodeCounters::default()).unwrap_or(false) {
                self.nodes.remove(&n);
            }
        }
    }

    /// The smallest depth at which the edge (u, v) has a positive count.
    pub fn get_depth(&self, from_node: u32, to_node: u32) -> Option<usize> {
        self.graph
            .edge_weight(from_node, to_node)
            .and_then(|info| info.depth.keys().next().copied())
    }

    /// The attributes of the edge (u, v), if present.
    pub fn edge(&self, from_node: u32, to_node: u32) -> Option<&EdgeInfo> {
        self.graph.edge_weight(from_node, to_node)
    }

    /// The path counter of the edge (u, v), or 0 if the edge does not exist.
    pub fn prefix_counter(&self, from_node: u32, to_node: u32) -> f64 {
        self.graph.edge_weight(from_node, to_node).map(|info| info.prefix_counter).unwrap_or(0.0)
    }

    /// Returns `true` if the edge (u, v) is present.
    pub fn contains_edge(&self, from_node: u32, to_node: u32) -> bool {
        self.graph.contains_edge(from_node, to_node)
    }

    /// Returns `true` if the node is present.
    pub fn contains_node(&self, node: u32) -> bool {
        self.graph.contains_node(node)
    }

    /// All direct successors of a node, in ascending AS order.
    pub fn successors(&self, node: u32) -> Vec<u32> {
        let mut succ: Vec<u32> = self.graph.neighbors_directed(node, Direction::Outgoing).collect();
        succ.sort_unstable();
        succ
    }

    /// All direct predecessors of a node, in ascending AS order.
    pub fn predecessors(&self, node: u32) -> Vec<u32> {
        let mut pred: Vec<u32> = self.graph.neighbors_directed(node, Direction::Incoming).collect();
        pred.sort_unstable();
        pred
    }

    /// The prefixes currently traversing the edge (u, v). Empty when prefix tracking is
    /// disabled.
    pub fn edge_prefixes(&self, from_node: u32, to_node: u32) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .graph
            .edge_weight(from_node, to_node)
            .map(|info| info.prefixes.iter().cloned().collect())
            .unwrap_or_default();
        prefixes.sort();
        prefixes
    }

    /// The set of nodes whose outgoing path counter reached the threshold.
    pub fn nodes_forward(&self) -> &BTreeSet<u32> {
        &self.nodes_forward
    }

    /// The set of nodes whose incoming path counter reached the threshold.
    pub fn nodes_backward(&self) -> &BTreeSet<u32> {
        &self.nodes_backward
    }

    /// Number of paths traversing `node` as the source of some edge.
    pub fn out_prefixes(&self, node: u32) -> u64 {
        self.nodes.get(&node).map(|c| c.out_prefixes).unwrap_or(0)
    }

    /// Number of paths traversing `node` as the destination of some edge.
    pub fn in_prefixes(&self, node: u32) -> u64 {
        self.nodes.get(&node).map(|c| c.in_prefixes).unwrap_or(0)
    }

    /// Iterate over all edges with their attributes.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32, &EdgeInfo)> {
        self.graph.all_edges()
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
