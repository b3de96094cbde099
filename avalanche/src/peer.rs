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

//! # Peer Pipeline
//!
//! One pipeline per peering session, fed strictly in order through its own channel. The
//! pipeline maintains the peer RIB, the two topology graphs (reachable paths and windowed
//! withdrawals), the sliding withdrawal window, the encoding, and the burst state machine:
//!
//! - **Idle -> Active** when the window holds `burst_start` withdrawals.
//! - **Active -> Active** on every record; at each 1-second tick the window is refreshed (the
//!   evicted records move to the burst's kept list) and the end condition is evaluated.
//! - **Active -> Idle** at the first tick with fewer than `burst_end` windowed withdrawals: the
//!   final prediction runs, the kept withdrawals leave the withdrawal graph, and the burst is
//!   closed.
//!
//! The per-peer wall clock is the timestamp of the last processed record. Ticks advance one
//! second at a time from the previous timestamp to the current one, so window eviction and the
//! burst end condition honor every intervening second even under bursty arrivals.

use crate::bgp::{BgpMessage, MessageQueue, MessageType};
use crate::bpa::{self, Prediction};
use crate::burst::Burst;
use crate::config::Settings;
use crate::encoding::Encoding;
use crate::rib::RibPeer;
use crate::topology::AsTopology;
use crate::Error;
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::os::unix::net::UnixStream;

// mid-burst prediction cycles stop being scheduled beyond this burst size
const MAX_SCHEDULED_BURST_SIZE: usize = 12505;

/// The state of one peer pipeline.
pub struct Peer {
    settings: Settings,
    /// Identifier of the peer (collector and peer IP).
    pub peer_id: String,
    /// IP address of the peer.
    pub peer_ip: String,
    /// AS number of the peer.
    pub peer_as: u32,
    /// All first-hop ASes observed on this session (input of the naive predictor).
    pub peer_as_set: HashSet<u32>,
    /// The peer RIB.
    pub rib: RibPeer,
    /// Topology of the paths currently in the RIB.
    pub g: AsTopology,
    /// Topology of the withdrawn paths inside the sliding window.
    pub g_w: AsTopology,
    /// The sliding window of withdrawals.
    pub w_queue: MessageQueue,
    /// The encoding, once initialized.
    pub encoding: Option<Encoding>,
    /// The active burst, if any.
    pub burst: Option<Burst>,
    last_ts: u64,
    last_log_write: f64,
    next_bpa_execution: usize,
    rib_conn: Option<UnixStream>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("peer_id", &self.peer_id)
            .field("peer_as", &self.peer_as)
            .field("rib", &self.rib.len())
            .field("w_queue", &self.w_queue.len())
            .finish()
    }
}

impl Peer {
    /// Bind a new pipeline from the first record of the session. The peer AS is corrected from
    /// the first AS of the path when the two disagree, and the connection to the global RIB is
    /// established.
    pub fn new(first_msg: &BgpMessage, settings: Settings) -> Self {
        let peer_id = first_msg.peer_id.clone();
        let peer_ip = peer_id.rsplit('-').next().unwrap_or(&peer_id).to_string();
        let mut peer_as = first_msg.peer_as.unwrap_or(0);

        info!("Peer_{}_(AS{})_started.", peer_id, peer_as);

        if let Some(&first_as) = first_msg.as_path.first() {
            if peer_as != first_as {
                warn!(
                    "Peer AS {} and first AS {} in AS path do not match. Setting first AS as peer AS.",
                    peer_as, first_as
                );
                peer_as = first_as;
            }
        }

        let rib_conn = match UnixStream::connect(&settings.rib_socket) {
            Ok(stream) => {
                info!("Peer_{}_(AS{}) connected with the global RIB.", peer_id, peer_as);
                Some(stream)
            }
            Err(e) => {
                error!("Peer_{} cannot reach the global RIB: {}", peer_id, e);
                None
            }
        };

        Self {
            g: AsTopology::new(1, settings.silent),
            g_w: AsTopology::new(settings.burst_start as u64, settings.silent),
            w_queue: MessageQueue::new(settings.win_size),
            peer_id,
            peer_ip,
            peer_as,
            peer_as_set: HashSet::new(),
            rib: RibPeer::new(),
            encoding: None,
            burst: None,
            last_ts: first_msg.time as u64,
            last_log_write: 0.0,
            next_bpa_execution: settings.min_bpa_burst_size,
            rib_conn,
            settings,
        }
    }

    /// Process one record. Returns `false` when the session is closed and the pipeline must
    /// terminate.
    pub fn handle_message(&mut self, mut msg: BgpMessage) -> Result<bool, Error> {
        if msg.peer_id != self.peer_id {
            error!("received a record for peer {} on the queue of {}", msg.peer_id, self.peer_id);
        }

        // the displaced path (announcements) or the resolved path (withdrawals)
        let mut old_as_path: Vec<u32> = Vec::new();

        match msg.mtype {
            MessageType::Announcement => {
                old_as_path = self.handle_announcement(&msg)?;
            }
            MessageType::Withdrawal => {
                old_as_path = self.handle_withdrawal(&mut msg)?;
            }
            MessageType::Close => {
                self.close(&msg)?;
                return Ok(false);
            }
            MessageType::Info => {
                info!("{}", msg);
            }
        }

        // advance the per-peer clock one second at a time, so that window eviction and the
        // burst end condition honor every intervening second
        if self.burst.is_some() {
            while self.last_ts < msg.time as u64 {
                self.last_ts += 1;

                let tick = self.last_ts;
                if let Some(burst) = self.burst.as_mut() {
                    burst
                        .deleted_from_queue
                        .extend(self.w_queue.refresh_iter(tick as f64));
                }

                if self.w_queue.len() < self.settings.burst_end {
                    self.close_burst(&msg)?;
                    break;
                } else if let Some(burst) = self.burst.as_mut() {
                    burst.last_ts = tick;
                }
            }
        }

        if self.burst.is_none() {
            let evicted: Vec<BgpMessage> = self.w_queue.refresh_iter(msg.time).collect();
            for w in evicted {
                self.g_w.remove(&w.as_path, None);
            }
        }

        self.last_ts = msg.time as u64;

        if let (Some(burst), Some(prefix)) = (self.burst.as_mut(), msg.prefix.as_deref()) {
            if !msg.as_path.is_empty() {
                burst.add_real_prefix(msg.time, prefix, msg.mtype, &old_as_path)?;
            }
        }

        if self.burst.is_none() && self.w_queue.len() >= self.settings.burst_start {
            self.burst = Some(Burst::new(
                &self.peer_id,
                msg.time,
                self.settings.win_size,
                &self.settings.bursts_dir,
                &self.w_queue,
                self.settings.silent,
            )?);
            self.next_bpa_execution = self.settings.min_bpa_burst_size;
            info!(
                "{}\t{}\t{}\tBurst started",
                msg.time as i64,
                self.rib.len(),
                self.w_queue.len()
            );
        }

        if msg.time > self.last_log_write || msg.time - self.last_log_write >= 3600.0 {
            info!("{}\t{}\t{}", msg.time as i64, self.rib.len(), self.w_queue.len());
            self.last_log_write = msg.time;
        }

        // periodic prediction schedule
        if let Some(burst) = self.burst.as_ref() {
            let total = burst.uniq_withdrawals() + self.settings.burst_start;
            if total >= self.settings.min_bpa_burst_size && total > self.next_bpa_execution {
                if self.settings.bpa_freq > 0 && total < MAX_SCHEDULED_BURST_SIZE {
                    self.next_bpa_execution += self.settings.bpa_freq;
                } else {
                    self.next_bpa_execution = usize::MAX;
                }
                self.run_bpa_cycle(msg.time)?;
            }
        }

        Ok(true)
    }

    /// Orderly teardown on server shutdown: close an active burst and the RIB connection.
    pub fn teardown(mut self) {
        if let Some(burst) = self.burst.take() {
            if let Err(e) = burst.stop() {
                error!("cannot close the burst record: {}", e);
            }
        }
        self.rib_conn = None;
        info!("Peer_{} terminated.", self.peer_id);
    }

    fn handle_announcement(&mut self, msg: &BgpMessage) -> Result<Vec<u32>, Error> {
        let prefix = match msg.prefix.as_deref() {
            Some(prefix) => prefix.to_string(),
            None => return Ok(Vec::new()),
        };
        if let Some(&first_as) = msg.as_path.first() {
            self.peer_as_set.insert(first_as);
        }

        let old_as_path = self.rib.update(&prefix, &msg.as_path);
        self.g.remove(&old_as_path, Some(&prefix));
        self.g.add(&msg.as_path, Some(&prefix));

        if let Some(encoding) = self.encoding.as_mut() {
            encoding.advertisement(&old_as_path, &msg.as_path, &self.g);
            if self.settings.global_rib_enabled {
                self.send_advertisement(&prefix, msg.time)?;
            }
        } else if self.rib.len() >= self.settings.run_encoding_threshold {
            self.init_encoding(msg.time)?;
        }

        Ok(old_as_path)
    }

    fn handle_withdrawal(&mut self, msg: &mut BgpMessage) -> Result<Vec<u32>, Error> {
        let prefix = match msg.prefix.as_deref() {
            Some(prefix) => prefix.to_string(),
            None => return Ok(Vec::new()),
        };

        // the encoding covers the full table before the first withdrawal is processed
        if self.encoding.is_none() {
            self.init_encoding(msg.time)?;
        }

        msg.as_path = self.rib.withdraw(&prefix);
        self.g.remove(&msg.as_path, Some(&prefix));
        self.g_w.add(&msg.as_path, None);

        if !msg.as_path.is_empty() {
            self.w_queue.push(msg.clone());
        }

        let old_as_path = msg.as_path.clone();
        if let Some(encoding) = self.encoding.as_mut() {
            encoding.withdraw(&old_as_path, &self.g);
        }

        if self.settings.global_rib_enabled {
            self.send_withdrawal(&prefix, msg.time)?;
        }

        Ok(old_as_path)
    }

    fn close(&mut self, msg: &BgpMessage) -> Result<(), Error> {
        if self.burst.is_some() {
            let prediction = self.run_prediction();
            if let Some(burst) = self.burst.as_mut() {
                match prediction {
                    Ok(prediction) => {
                        burst.log_prediction(
                            "PREDICTION_END_CLOSE",
                            self.settings.bpa_algo,
                            &prediction,
                        )?;
                        burst.log_prediction_edges(
                            "PREDICTION_END_EDGE",
                            &prediction.edges,
                            &self.g_w,
                        )?;
                    }
                    Err(e) => error!("BPA has failed: {}", e),
                }
            }
            if let Some(burst) = self.burst.take() {
                burst.stop()?;
            }
        }

        if self.settings.global_rib_enabled {
            let prefixes: Vec<String> = self.rib.prefixes().cloned().collect();
            for prefix in prefixes {
                self.send_withdrawal(&prefix, -1.0)?;
            }
        }

        info!("Received CLOSE at {}. Cleaning the peer.", msg.time as i64);
        Ok(())
    }

    // the burst end condition was reached on a tick: run the final prediction and close
    fn close_burst(&mut self, msg: &BgpMessage) -> Result<(), Error> {
        let prediction = self.run_prediction();
        if let Some(burst) = self.burst.as_mut() {
            match prediction {
                Ok(prediction) => {
                    burst.log_prediction(
                        "PREDICTION_END",
                        self.settings.bpa_algo,
                        &prediction,
                    )?;
                    burst.log_prediction_edges(
                        "PREDICTION_END_EDGE",
                        &prediction.edges,
                        &self.g_w,
                    )?;
                }
                Err(e) => error!("BPA has failed: {}", e),
            }
        }

        if let Some(burst) = self.burst.take() {
            for w in burst.deleted_from_queue.iter() {
                self.g_w.remove(&w.as_path, None);
            }
            burst.stop()?;
        }

        info!(
            "{}\t{}\t{}\tBurst finished",
            msg.time as i64,
            self.rib.len(),
            self.w_queue.len()
        );
        Ok(())
    }

    fn run_prediction(&mut self) -> Result<Prediction, Error> {
        let w_nb = self.w_queue.len()
            + self.burst.as_ref().map(|b| b.deleted_from_queue.len()).unwrap_or(0);
        if let Some(burst) = self.burst.as_mut() {
            burst.prediction_done = true;
        }
        Ok(bpa::predict(
            self.settings.bpa_algo,
            &self.g,
            &self.g_w,
            w_nb as f64,
            self.settings.p_w,
            self.settings.r_w,
            &self.peer_as_set,
        )?)
    }

    // one mid-burst prediction cycle: record the predicted prefixes, inform the global RIB
    // about the failed links, and log the prediction
    fn run_bpa_cycle(&mut self, time: f64) -> Result<(), Error> {
        let prediction = match self.run_prediction() {
            Ok(prediction) => prediction,
            Err(e) => {
                error!("BPA has failed: {}", e);
                return Ok(());
            }
        };

        if !self.settings.silent {
            self.record_predicted_prefixes(time, &prediction.edges)?;
        }

        if self.encoding.is_some() {
            for &(u, v) in prediction.edges.iter() {
                self.send_fast_reroute(u, v)?;
            }
        }

        if let Some(burst) = self.burst.as_mut() {
            burst.log_prediction("PREDICTION", self.settings.bpa_algo, &prediction)?;
            burst.log_prediction_edges("PREDICTION_EDGE", &prediction.edges, &self.g_w)?;
        }
        Ok(())
    }

    // enqueue every prefix whose path traverses a newly predicted edge, and confirm the
    // withdrawals already observed for it
    fn record_predicted_prefixes(
        &mut self,
        time: f64,
        edges: &BTreeSet<(u32, u32)>,
    ) -> Result<(), Error> {
        let encoding = match self.encoding.as_ref() {
            Some(encoding) => encoding,
            None => return Ok(()),
        };
        let burst = match self.burst.as_mut() {
            Some(burst) => burst,
            None => return Ok(()),
        };

        let new_edges = burst.add_edges(time, edges, &self.g_w)?;
        for (u, v) in new_edges {
            for prefix in self.g.edge_prefixes(u, v) {
                if let Some(as_path) = self.rib.get(&prefix) {
                    if let Some((encoded, depth)) = encoding.prefix_is_encoded(as_path, u, v) {
                        burst.add_predicted_prefix(time, &prefix, encoded, depth)?;
                    }
                }
            }

            let confirmed_kept: Vec<(f64, String)> = burst
                .deleted_from_queue
                .iter()
                .filter(|w| path_traverses(&w.as_path, u, v))
                .filter_map(|w| w.prefix.clone().map(|p| (w.time, p)))
                .collect();
            for (w_time, prefix) in confirmed_kept {
                burst.log_confirmed(w_time, &prefix, 'D')?;
            }

            for w in self.w_queue.iter() {
                if path_traverses(&w.as_path, u, v) {
                    if let Some(prefix) = w.prefix.as_deref() {
                        burst.log_confirmed(w.time, prefix, 'Q')?;
                    }
                }
            }
        }
        Ok(())
    }

    // one fast-reroute message per depth at which the failed edge is encoded
    fn send_fast_reroute(&self, u: u32, v: u32) -> Result<(), Error> {
        let encoding = match self.encoding.as_ref() {
            Some(encoding) => encoding,
            None => return Ok(()),
        };

        let mut depth_set: BTreeSet<usize> = BTreeSet::new();
        if let Some(info) = self.g_w.edge(u, v) {
            depth_set.extend(info.depth.keys());
        }
        if let Some(info) = self.g.edge(u, v) {
            depth_set.extend(info.depth.keys());
        }

        for d in depth_set {
            if !encoding.is_encoded(d, u, v) {
                continue;
            }

            let mut vmac_partial = String::new();
            let mut bitmask_partial = String::new();
            for i in 2..encoding.max_depth() + 2 {
                if i == d {
                    if let Some(m) = encoding.mapping(i) {
                        vmac_partial.push_str(&m.get_mapping_string(u));
                        bitmask_partial.push_str(&"1".repeat(m.nb_bits()));
                    }
                } else if i == d + 1 {
                    if let Some(m) = encoding.mapping(i) {
                        vmac_partial.push_str(&m.get_mapping_string(v));
                        bitmask_partial.push_str(&"1".repeat(m.nb_bits()));
                    }
                } else if let Some(m) = encoding.mapping(i) {
                    vmac_partial.push_str(&"0".repeat(m.nb_bits()));
                    bitmask_partial.push_str(&"0".repeat(m.nb_bits()));
                }
            }

            if self.settings.global_rib_enabled {
                self.send_line(&format!(
                    "FR|{}|{}|{}|{}|{}",
                    self.peer_ip, vmac_partial, bitmask_partial, d, self.last_ts
                ))?;
            }
        }
        Ok(())
    }

    fn init_encoding(&mut self, time: f64) -> Result<(), Error> {
        let mut encoding = Encoding::new(
            &self.peer_id,
            &self.settings.encoding_dir,
            self.settings.nb_bits_aspath,
            self.settings.encoding_min_percentile,
            true,
        )?;
        encoding.compute_encoding(&self.g);
        info!(
            "{}\t{}\t{}\tEncoding computed!",
            time as i64,
            self.rib.len(),
            self.w_queue.len()
        );
        self.encoding = Some(encoding);

        if self.settings.global_rib_enabled {
            let prefixes: Vec<String> = self.rib.prefixes().cloned().collect();
            for prefix in prefixes {
                self.send_advertisement(&prefix, time)?;
            }
        }
        Ok(())
    }

    fn send_advertisement(&self, prefix: &str, time: f64) -> Result<(), Error> {
        let (as_path, vmac) = match (self.rib.get(prefix), self.encoding.as_ref()) {
            (Some(as_path), Some(encoding)) => {
                (as_path.clone(), encoding.build_vmac(as_path))
            }
            _ => return Ok(()),
        };
        let as_path_text =
            as_path.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ");
        self.send_line(&format!(
            "{}|{}|{}|{}|{}",
            self.peer_ip, prefix, time, as_path_text, vmac
        ))
    }

    fn send_withdrawal(&self, prefix: &str, time: f64) -> Result<(), Error> {
        self.send_line(&format!("{}|{}|{}", self.peer_ip, prefix, time))
    }

    fn send_line(&self, line: &str) -> Result<(), Error> {
        if let Some(stream) = self.rib_conn.as_ref() {
            let mut stream = stream;
            stream.write_all(line.as_bytes())?;
            stream.write_all(b"\n")?;
        }
        Ok(())
    }
}

fn path_traverses(as_path: &[u32], u: u32, v: u32) -> bool {
    as_path.windows(2).any(|w| (w[0] == u && w[1] == v) || (w[0] == v && w[1] == u))
}

/// The entry point of one peer thread: bind the pipeline on the first record, then process the
/// feed in order until the session closes or the server shuts down.
pub fn run_peer(rx: Receiver<BgpMessage>, settings: Settings) {
    let mut peer: Option<Peer> = None;

    while let Ok(msg) = rx.recv() {
        if peer.is_none() {
            peer = Some(Peer::new(&msg, settings.clone()));
        }
        if let Some(p) = peer.as_mut() {
            match p.handle_message(msg) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => error!("peer pipeline error: {}", e),
            }
        }
    }

    // the feed server went away: tear the pipeline down in order
    if let Some(p) = peer {
        p.teardown();
    }
}

/// The entry point of one validation peer thread: only the RIB and a sliding window over all
/// resolved updates are maintained, recording burst ground truth for offline evaluation.
pub fn run_peer_validation(rx: Receiver<BgpMessage>, settings: Settings) {
    let mut rib = RibPeer::new();
    let mut u_queue = MessageQueue::new(settings.win_size);
    let mut burst: Option<Burst> = None;
    let mut last_log_write: Option<f64> = None;
    let mut peer_id: Option<String> = None;

    while let Ok(mut msg) = rx.recv() {
        if peer_id.is_none() {
            peer_id = Some(msg.peer_id.clone());
            last_log_write = Some(msg.time);
            info!("Peer_{}_(AS{})_started.", msg.peer_id, msg.peer_as.unwrap_or(0));
        }

        match (msg.mtype, msg.prefix.clone()) {
            (MessageType::Announcement, Some(prefix)) => {
                // the record keeps the displaced path, i.e. the route that just died
                msg.as_path = rib.update(&prefix, &msg.as_path);
                if !msg.as_path.is_empty() {
                    u_queue.push(msg.clone());
                }
            }
            (MessageType::Withdrawal, Some(prefix)) => {
                msg.as_path = rib.withdraw(&prefix);
                if !msg.as_path.is_empty() {
                    u_queue.push(msg.clone());
                }
            }
            _ => info!("{}", msg),
        }

        if let Some(log_ts) = last_log_write.as_mut() {
            while *log_ts < msg.time {
                u_queue.refresh(*log_ts);
                info!("{} {} {}", *log_ts as i64, rib.len(), u_queue.len());
                *log_ts += 1.0;
            }
        }

        if burst.is_some() {
            if u_queue.len() < settings.burst_end {
                if let Some(b) = burst.take() {
                    if let Err(e) = b.stop() {
                        error!("cannot close the burst record: {}", e);
                    }
                }
            } else if let (Some(b), Some(prefix)) = (burst.as_mut(), msg.prefix.as_deref()) {
                if let Err(e) = b.add_real_prefix(msg.time, prefix, msg.mtype, &msg.as_path) {
                    error!("cannot record the update: {}", e);
                }
            }
        }

        if burst.is_none() && u_queue.len() > settings.burst_start {
            match Burst::new(
                msg.peer_id.as_str(),
                msg.time,
                settings.win_size,
                &settings.bursts_dir,
                &u_queue,
                settings.silent,
            ) {
                Ok(b) => burst = Some(b),
                Err(e) => error!("cannot open the burst record: {}", e),
            }
        }
    }

    if let Some(b) = burst {
        if let Err(e) = b.stop() {
            error!("cannot close the burst record: {}", e);
        }
    }
}
