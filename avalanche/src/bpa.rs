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

//! # BPA — Burst Prediction Algorithm
//!
//! Given the graph of still-reachable paths `G` and the graph of recently withdrawn paths `G_W`,
//! find the set of AS edges whose removal best explains the observed withdrawals.
//!
//! For a candidate edge set, the true positives are the withdrawn paths traversing the set, the
//! false positives the still-reachable paths traversing it, and the false negatives the observed
//! withdrawals it does not explain. The search objective is the weighted Fowlkes-Mallows score,
//! the (weighted) geometric mean of precision and recall.
//!
//! The forward search ranks, for every heavy source node, the outgoing edges by their individual
//! score and greedily admits them while the score of the growing set strictly improves, breaking
//! on the first non-improvement. This break is what keeps the result a small, stable subset:
//! without it the search degenerates into a full-neighborhood sum whose score always falls once
//! enough false-positive-heavy edges are included. The backward search is the mirror image over
//! heavy destination nodes.

use crate::topology::AsTopology;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors of the burst predictor.
#[derive(Debug, Error, PartialEq)]
pub enum PredictionError {
    /// There is no withdrawal to explain, so no score can be computed.
    #[error("the observation window contains no withdrawal")]
    EmptyWindow,
}

/// The burst prediction algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BpaAlgorithm {
    /// Aggregate all outgoing edges of the peer ASes, without any search.
    Naive,
    /// The best single edge over all heavy source nodes.
    Single,
    /// Greedy forward and backward search, keeping the better of the two passes.
    Multiple,
}

impl FromStr for BpaAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "naive" => Ok(Self::Naive),
            "bpa-single" => Ok(Self::Single),
            "bpa-multiple" => Ok(Self::Multiple),
            _ => Err(crate::Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for BpaAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Naive => write!(f, "naive"),
            Self::Single => write!(f, "bpa-single"),
            Self::Multiple => write!(f, "bpa-multiple"),
        }
    }
}

/// Result of one prediction cycle: the inferred failed edge set and its score. The counts are
/// -1 when they are unknown (forward/backward tie in `bpa-multiple`).
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The set of AS edges inferred to have failed.
    pub edges: BTreeSet<(u32, u32)>,
    /// The Fowlkes-Mallows score of the edge set.
    pub score: f64,
    /// Withdrawn paths explained by the edge set.
    pub true_pos: i64,
    /// Still-reachable paths traversing the edge set.
    pub false_pos: i64,
    /// Observed withdrawals the edge set does not explain.
    pub false_neg: i64,
}

/// Compute the Fowlkes-Mallows score from the true-positive, false-positive and false-negative
/// counts. Precision and recall can be weighted with `w_p` and `w_r`. The score is undefined for
/// `tp == 0` and is then reported as 0.
pub fn fowlkes_mallows(tp: f64, fp: f64, fn_count: f64, w_p: f64, w_r: f64) -> f64 {
    if tp <= 0.0 {
        return 0.0;
    }
    ((w_p * (tp / (tp + fp)).ln() + w_r * (tp / (tp + fn_count)).ln()) / (w_p + w_r)).exp()
}

// running score of a greedily grown edge set
#[derive(Debug, Clone, Default)]
struct Candidate {
    edges: BTreeSet<(u32, u32)>,
    score: f64,
    tp: f64,
    fp: f64,
    fn_count: f64,
}

impl Candidate {
    fn into_prediction(self) -> Prediction {
        Prediction {
            edges: self.edges,
            score: self.score,
            true_pos: self.tp as i64,
            false_pos: self.fp as i64,
            false_neg: self.fn_count as i64,
        }
    }
}

/// Aggregate all outgoing edges of `from_node` (in either graph) into one candidate set and
/// score it.
pub fn find_best_fmscore_naive(
    g: &AsTopology,
    g_w: &AsTopology,
    w_nb: f64,
    from_node: u32,
    w_p: f64,
    w_r: f64,
) -> Prediction {
    let mut to_nodes: BTreeSet<u32> = g.successors(from_node).into_iter().collect();
    to_nodes.extend(g_w.successors(from_node));

    let mut current = Candidate::default();
    for to_node in to_nodes {
        current.edges.insert((from_node, to_node));
        current.tp += g_w.prefix_counter(from_node, to_node);
        current.fp += g.prefix_counter(from_node, to_node);
    }
    current.fn_count = w_nb - current.tp;
    current.score = fowlkes_mallows(current.tp, current.fp, current.fn_count, w_p, w_r);
    current.into_prediction()
}

/// Find the single edge with the highest score over all heavy source nodes of `g_w`. The first
/// maximum encountered wins.
pub fn find_best_fmscore_single(
    g: &AsTopology,
    g_w: &AsTopology,
    w_nb: f64,
    w_p: f64,
    w_r: f64,
) -> Prediction {
    let mut best = Candidate::default();

    for &from_node in g_w.nodes_forward() {
        for to_node in g_w.successors(from_node) {
            let tp = g_w.prefix_counter(from_node, to_node);
            let fp = g.prefix_counter(from_node, to_node);
            let fn_count = w_nb - tp;
            let score = fowlkes_mallows(tp, fp, fn_count, w_p, w_r);

            if best.score < score {
                let mut edges = BTreeSet::new();
                edges.insert((from_node, to_node));
                best = Candidate { edges, score, tp, fp, fn_count };
            }
        }
    }

    best.into_prediction()
}

// Rank the scored neighbors descending and greedily admit them while the set score strictly
// improves. With `opti`, break on the first non-improvement.
fn grow_greedy(
    edge_of: impl Fn(u32) -> (u32, u32),
    ranked: Vec<(u32, f64, f64)>, // (neighbor, tp, fp) sorted by individual score
    w_nb: f64,
    w_p: f64,
    w_r: f64,
    opti: bool,
) -> Candidate {
    let mut current = Candidate::default();

    for (ngh, tp, fp) in ranked {
        let new_tp = current.tp + tp;
        let new_fp = current.fp + fp;
        let new_fn = w_nb - new_tp;

        if fowlkes_mallows(new_tp, new_fp, new_fn, w_p, w_r) > current.score {
            current.edges.insert(edge_of(ngh));
            current.tp = new_tp;
            current.fp = new_fp;
            current.fn_count = new_fn;
            current.score = fowlkes_mallows(new_tp, new_fp, new_fn, w_p, w_r);
        } else if opti {
            break;
        }
    }

    current
}

// Merge the candidate of one node into the best seen so far. On a strictly better score the
// candidate replaces the best; on an exact tie the edge sets are united and the counts become
// unknown.
fn merge_best(best: &mut Candidate, current: Candidate) {
    if best.score < current.score {
        *best = current;
    } else if best.score == current.score {
        best.edges.extend(current.edges);
        best.tp = -1.0;
        best.fp = -1.0;
        best.fn_count = -1.0;
    }
}

/// Find the edge set with the highest score among all sets sharing a common source node, over
/// the heavy source nodes of `g_w`.
pub fn find_best_fmscore_forward(
    g: &AsTopology,
    g_w: &AsTopology,
    w_nb: f64,
    w_p: f64,
    w_r: f64,
    opti: bool,
) -> Prediction {
    let mut best = Candidate::default();

    for &from_node in g_w.nodes_forward() {
        let mut ranked: Vec<(u32, f64, f64, f64)> = Vec::new();
        for to_node in g_w.successors(from_node) {
            let tp = g_w.prefix_counter(from_node, to_node);
            let fp = g.prefix_counter(from_node, to_node);
            let fn_count = w_nb - tp;
            if tp > 0.0 {
                ranked.push((to_node, tp, fp, fowlkes_mallows(tp, fp, fn_count, w_p, w_r)));
            }
        }
        ranked.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(Ordering::Equal));

        let current = grow_greedy(
            |to| (from_node, to),
            ranked.into_iter().map(|(n, tp, fp, _)| (n, tp, fp)).collect(),
            w_nb,
            w_p,
            w_r,
            opti,
        );
        merge_best(&mut best, current);
    }

    best.into_prediction()
}

/// Find the edge set with the highest score among all sets sharing a common destination node,
/// over the heavy destination nodes of `g_w`.
pub fn find_best_fmscore_backward(
    g: &AsTopology,
    g_w: &AsTopology,
    w_nb: f64,
    w_p: f64,
    w_r: f64,
    opti: bool,
) -> Prediction {
    let mut best = Candidate::default();

    for &to_node in g_w.nodes_backward() {
        let mut ranked: Vec<(u32, f64, f64, f64)> = Vec::new();
        for from_node in g_w.predecessors(to_node) {
            let tp = g_w.prefix_counter(from_node, to_node);
            let fp = g.prefix_counter(from_node, to_node);
            let fn_count = w_nb - tp;
            ranked.push((from_node, tp, fp, fowlkes_mallows(tp, fp, fn_count, w_p, w_r)));
        }
        ranked.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(Ordering::Equal));

        let current = grow_greedy(
            |from| (from, to_node),
            ranked.into_iter().map(|(n, tp, fp, _)| (n, tp, fp)).collect(),
            w_nb,
            w_p,
            w_r,
            opti,
        );
        merge_best(&mut best, current);
    }

    best.into_prediction()
}

/// Run one prediction cycle with the selected algorithm. `w_nb` is the total observed
/// withdrawal count of the burst, including the withdrawals that already expired from the
/// sliding window but are retained by the active burst.
pub fn predict(
    algo: BpaAlgorithm,
    g: &AsTopology,
    g_w: &AsTopology,
    w_nb: f64,
    w_p: f64,
    w_r: f64,
    peer_as_set: &HashSet<u32>,
) -> Result<Prediction, PredictionError> {
    if w_nb <= 0.0 {
        return Err(PredictionError::EmptyWindow);
    }

    match algo {
        BpaAlgorithm::Multiple => {
            let forward = find_best_fmscore_forward(g, g_w, w_nb, w_p, w_r, true);
            let backward = find_best_fmscore_backward(g, g_w, w_nb, w_p, w_r, true);

            if forward.score > backward.score {
                Ok(forward)
            } else if backward.score > forward.score {
                Ok(backward)
            } else {
                // both passes agree on the score: keep the union and mark the counts unknown
                let mut edges = forward.edges;
                edges.extend(backward.edges);
                Ok(Prediction {
                    edges,
                    score: forward.score,
                    true_pos: -1,
                    false_pos: -1,
                    false_neg: -1,
                })
            }
        }
        BpaAlgorithm::Single => Ok(find_best_fmscore_single(g, g_w, w_nb, w_p, w_r)),
        BpaAlgorithm::Naive => {
            let mut edges = BTreeSet::new();
            let mut tp = 0.0;
            let mut fp = 0.0;
            let mut peer_ases: Vec<u32> = peer_as_set.iter().copied().collect();
            peer_ases.sort_unstable();
            for peer_as in peer_ases {
                let partial = find_best_fmscore_naive(g, g_w, w_nb, peer_as, w_p, w_r);
                edges.extend(partial.edges);
                tp += partial.true_pos as f64;
                fp += partial.false_pos as f64;
            }
            let fn_count = w_nb - tp;
            Ok(Prediction {
                edges,
                score: fowlkes_mallows(tp, fp, fn_count, w_p, w_r),
                true_pos: tp as i64,
                false_pos: fp as i64,
                false_neg: fn_count as i64,
            })
        }
    }
}
