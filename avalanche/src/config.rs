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

//! Runtime settings shared by the server, the peer pipelines and the global RIB service.

use crate::bpa::BpaAlgorithm;
use std::path::PathBuf;

/// All runtime parameters of the system. The CLI binary fills this from its arguments; every
/// peer pipeline gets its own clone.
#[derive(Debug, Clone)]
pub struct Settings {
    /// TCP port the BGP feed server listens on.
    pub port: u16,
    /// Size of the sliding withdrawal window, in seconds.
    pub win_size: u64,
    /// Number of windowed withdrawals at which a burst starts.
    pub burst_start: usize,
    /// Number of windowed withdrawals below which a burst ends.
    pub burst_end: usize,
    /// Minimum burst size before the prediction starts running.
    pub min_bpa_burst_size: usize,
    /// Number of new withdrawals between two prediction cycles (0 disables re-runs).
    pub bpa_freq: usize,
    /// Weight of the precision in the Fowlkes-Mallows score.
    pub p_w: f64,
    /// Weight of the recall in the Fowlkes-Mallows score.
    pub r_w: f64,
    /// The burst prediction algorithm to run.
    pub bpa_algo: BpaAlgorithm,
    /// Number of bits of the tag reserved for the AS-path codes.
    pub nb_bits_aspath: usize,
    /// Number of bits of the tag reserved for each next hop (primary or backup).
    pub nb_bits_nexthop: usize,
    /// Number of RIB entries after which the encoding is computed (it is always computed when
    /// the first withdrawal arrives).
    pub run_encoding_threshold: usize,
    /// Whether the global RIB is maintained and fed by the peers.
    pub global_rib_enabled: bool,
    /// Run the ground-truth-only validation pipeline instead of the full one.
    pub bpa_validation: bool,
    /// Skip all per-burst file output, making the pipeline as fast as possible.
    pub silent: bool,
    /// Directory for the per-burst ground-truth and prediction logs.
    pub bursts_dir: PathBuf,
    /// Directory for the log files.
    pub log_dir: PathBuf,
    /// Directory for the per-peer encoding status files.
    pub encoding_dir: PathBuf,
    /// Path of the Unix socket between the peers and the global RIB.
    pub rib_socket: PathBuf,
    /// Maximum number of concurrently tracked peers.
    pub peer_limit: usize,
    /// Percentile of the accepted edge weights used as the encoding admission threshold.
    pub encoding_min_percentile: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            win_size: 10,
            burst_start: 1500,
            burst_end: 9,
            min_bpa_burst_size: 2500,
            bpa_freq: 2500,
            p_w: 1.0,
            r_w: 3.0,
            bpa_algo: BpaAlgorithm::Multiple,
            nb_bits_aspath: 28,
            nb_bits_nexthop: 3,
            run_encoding_threshold: 1_000_000,
            global_rib_enabled: true,
            bpa_validation: false,
            silent: false,
            bursts_dir: PathBuf::from("bursts"),
            log_dir: PathBuf::from("log"),
            encoding_dir: PathBuf::from("encoding"),
            rib_socket: Settings::rib_socket_for_port(3000),
            peer_limit: 500,
            encoding_min_percentile: 5.0,
        }
    }
}

impl Settings {
    /// The Unix socket path used for a given server port.
    pub fn rib_socket_for_port(port: u16) -> PathBuf {
        PathBuf::from(format!("/tmp/socket_tmp_{}", port))
    }
}
