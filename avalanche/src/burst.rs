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

//! # Burst Record
//!
//! A burst is a detected surge of withdrawals at one peer, most likely caused by a remote
//! failure. The record keeps the ground truth (the prefixes actually withdrawn while the burst
//! was active), the predictions (the failed edges and the prefixes inferred from them), and the
//! withdrawals that expired from the sliding window while the burst was active.
//!
//! Two append-only files accompany every burst: `<peer>_<start>_real` with the ground truth and
//! `<peer>_<start>_predicted` with the prediction history. A summary line is appended to
//! `bursts_info` when the burst closes.

use crate::bgp::{BgpMessage, MessageQueue, MessageType};
use crate::bpa::{BpaAlgorithm, Prediction};
use crate::topology::AsTopology;
use std::collections::{BTreeSet, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

/// State of one detected withdrawal burst.
#[derive(Debug)]
pub struct Burst {
    /// Identifier of the peer this burst belongs to.
    pub peer_id: String,
    /// Time at which the burst was detected.
    pub start_time: u64,
    /// Size of the observation window in seconds.
    pub duration: u64,
    /// Timestamp of the last full second the burst was known to be active.
    pub last_ts: u64,
    /// Withdrawals that expired from the sliding window while this burst was active.
    pub deleted_from_queue: Vec<BgpMessage>,
    /// Prefixes predicted to be affected (only the ones that can be rerouted).
    pub predicted_prefixes: HashSet<String>,
    /// Prefixes actually withdrawn during the burst.
    pub real_prefixes: HashSet<String>,
    /// The failed AS edges predicted so far.
    pub as_edges: BTreeSet<(u32, u32)>,
    /// Whether a prediction has been run for this burst.
    pub prediction_done: bool,
    silent: bool,
    ts_100th_w: f64,
    info_path: PathBuf,
    real_out: LineWriter<File>,
    predicted_out: LineWriter<File>,
}

impl Burst {
    /// Open a new burst record. The current content of the withdrawal window is dumped into the
    /// ground-truth file, and the timestamp of its 101st entry (or of its head, for smaller
    /// windows) is recorded as the first-withdrawal-time estimate.
    pub fn new(
        peer_id: &str,
        start_time: f64,
        duration: u64,
        outdir: &Path,
        w_queue: &MessageQueue,
        silent: bool,
    ) -> io::Result<Self> {
        let start = start_time as u64;
        let ts_100th_w = if w_queue.len() > 100 {
            w_queue.get(100).map(|m| m.time).unwrap_or(start_time)
        } else {
            w_queue.get(0).map(|m| m.time).unwrap_or(start_time)
        };

        let mut real_out = LineWriter::new(File::create(
            outdir.join(format!("{}_{}_real", peer_id, start)),
        )?);
        let mut predicted_out = LineWriter::new(File::create(
            outdir.join(format!("{}_{}_predicted", peer_id, start)),
        )?);

        writeln!(predicted_out, "# Started burst!\n#100thTS\t{}", ts_100th_w)?;
        writeln!(real_out, "# Started burst!\n#100thTS\t{}", ts_100th_w)?;

        for msg in w_queue.iter() {
            writeln!(
                real_out,
                "{}|{}|B|{}",
                msg.prefix.as_deref().unwrap_or(""),
                msg.time,
                join_path(&msg.as_path)
            )?;
        }

        Ok(Self {
            peer_id: peer_id.to_string(),
            start_time: start,
            duration,
            last_ts: start,
            deleted_from_queue: Vec::new(),
            predicted_prefixes: HashSet::new(),
            real_prefixes: HashSet::new(),
            as_edges: BTreeSet::new(),
            prediction_done: false,
            silent,
            ts_100th_w,
            info_path: outdir.join("bursts_info"),
            real_out,
            predicted_out,
        })
    }

    /// Close the burst: flush both log files and append the summary line to `bursts_info`.
    pub fn stop(mut self) -> io::Result<()> {
        self.real_out.flush()?;
        self.predicted_out.flush()?;

        let mut info = OpenOptions::new().create(true).append(true).open(&self.info_path)?;
        writeln!(
            info,
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.peer_id,
            self.start_time,
            self.last_ts,
            self.duration,
            self.real_prefixes.len(),
            self.ts_100th_w
        )
    }

    /// Record one update received while the burst is active. Withdrawn prefixes enter the
    /// ground-truth set; the log line is tagged `B` or `A` depending on whether the first
    /// prediction already happened.
    pub fn add_real_prefix(
        &mut self,
        time: f64,
        prefix: &str,
        mtype: MessageType,
        old_as_path: &[u32],
    ) -> io::Result<()> {
        if !self.silent {
            let tag = if self.prediction_done { 'A' } else { 'B' };
            match mtype {
                MessageType::Withdrawal => {
                    if !self.real_prefixes.contains(prefix) {
                        writeln!(
                            self.real_out,
                            "{}|{}|W|{}|{}",
                            prefix,
                            time as i64,
                            tag,
                            join_path(old_as_path)
                        )?;
                    }
                }
                MessageType::Announcement => {
                    writeln!(
                        self.real_out,
                        "{}|{}|A|{}|{}",
                        prefix,
                        time as i64,
                        tag,
                        join_path(old_as_path)
                    )?;
                }
                _ => {}
            }
        }

        if mtype == MessageType::Withdrawal {
            self.real_prefixes.insert(prefix.to_string());
        }
        Ok(())
    }

    /// Record a predicted prefix. Only prefixes that are encoded at the failing depth (and can
    /// therefore be rerouted by the data plane) enter the predicted set.
    pub fn add_predicted_prefix(
        &mut self,
        time: f64,
        prefix: &str,
        encoded: bool,
        depth: usize,
    ) -> io::Result<()> {
        if !self.silent && !self.predicted_prefixes.contains(prefix) {
            if encoded {
                self.predicted_prefixes.insert(prefix.to_string());
            }
            writeln!(
                self.predicted_out,
                "PREFIX|{}|{}|{}|{}|{}",
                prefix,
                time as i64,
                self.real_prefixes.len(),
                if encoded { 'Y' } else { 'N' },
                depth
            )?;
        }
        Ok(())
    }

    /// Record a withdrawal that the prediction confirmed after the fact. `origin` tells where
    /// the withdrawal was found: `D` for the burst's kept list, `Q` for the sliding window.
    pub fn log_confirmed(&mut self, time: f64, prefix: &str, origin: char) -> io::Result<()> {
        writeln!(
            self.predicted_out,
            "PREFIX|{}|{}|{}|?|{}",
            prefix,
            time as i64,
            self.real_prefixes.len(),
            origin
        )
    }

    /// Merge a predicted edge set into the burst, returning the edges that were not predicted
    /// before. Every new edge is logged together with its distance from the vantage point.
    pub fn add_edges(
        &mut self,
        time: f64,
        edges: &BTreeSet<(u32, u32)>,
        g_w: &AsTopology,
    ) -> io::Result<Vec<(u32, u32)>> {
        let mut new_edges = Vec::new();
        for &(u, v) in edges {
            if self.as_edges.insert((u, v)) {
                if !self.silent {
                    let depth =
                        g_w.get_depth(u, v).map(|d| d as i64).unwrap_or(-1);
                    writeln!(
                        self.predicted_out,
                        "EDGE|{},{}|{}|{}|{}",
                        u,
                        v,
                        time as i64,
                        self.real_prefixes.len(),
                        depth
                    )?;
                }
                new_edges.push((u, v));
            }
        }
        Ok(new_edges)
    }

    /// Write one prediction summary line (`label` is `PREDICTION`, `PREDICTION_END` or
    /// `PREDICTION_END_CLOSE`), in the canonical TP, FP, FN order.
    pub fn log_prediction(
        &mut self,
        label: &str,
        algo: BpaAlgorithm,
        prediction: &Prediction,
    ) -> io::Result<()> {
        writeln!(
            self.predicted_out,
            "{}|{}|{}|{}|{}|{}|{}",
            label,
            algo,
            self.real_prefixes.len(),
            prediction.score,
            prediction.true_pos,
            prediction.false_pos,
            prediction.false_neg
        )
    }

    /// Write the predicted edge list together with the smallest depth at which any of the edges
    /// appears in the withdrawal graph (-1 if none does).
    pub fn log_prediction_edges(
        &mut self,
        label: &str,
        edges: &BTreeSet<(u32, u32)>,
        g_w: &AsTopology,
    ) -> io::Result<()> {
        let mut depth: Option<usize> = None;
        let edge_list = edges
            .iter()
            .map(|&(u, v)| {
                if let Some(d) = g_w.get_depth(u, v) {
                    depth = Some(depth.map(|cur| cur.min(d)).unwrap_or(d));
                }
                format!("{}-{}", u, v)
            })
            .collect::<Vec<_>>()
            .join(",");
        writeln!(
            self.predicted_out,
            "{}|{}|{}",
            label,
            edge_list,
            depth.map(|d| d as i64).unwrap_or(-1)
        )
    }

    /// Number of unique withdrawn prefixes observed during this burst.
    pub fn uniq_withdrawals(&self) -> usize {
        self.real_prefixes.len()
    }
}

fn join_path(as_path: &[u32]) -> String {
    as_path.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ")
}
