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

#![deny(missing_docs)]

//! # Avalanche: Predictive Fast Reroute for BGP Withdrawal Bursts
//!
//! This library predicts, in real time, which IP prefixes will be affected by a remote
//! inter-domain routing failure, long before the slow BGP convergence has revealed the full set
//! of withdrawn prefixes. It consumes a live stream of BGP updates from one or more peering
//! sessions, and, when a surge of withdrawals is detected, infers the most likely set of failed
//! AS-level links and tags every affected prefix so that a programmable forwarding plane can
//! deflect its traffic to a pre-computed backup next hop.
//!
//! ## Structure
//!
//! - **[`bgp`]**: the canonical BGP update record, the feed-dialect parser, and the sliding
//!   time-window queue of recent withdrawals.
//!
//! - **[`rib`]**: the per-peer routing information base, a prefix to AS-path mapping whose
//!   mutations return the displaced path.
//!
//! - **[`topology`]**: the weighted AS-level graph with per-depth prefix counters and the
//!   watermark sets of heavy sources and sinks. Each peer owns two instances: the paths in its
//!   RIB, and the paths of the windowed withdrawals.
//!
//! - **[`bpa`]**: the burst prediction algorithm, searching for the edge set that best explains
//!   the observed withdrawals under the weighted Fowlkes-Mallows score.
//!
//! - **[`burst`]**: the burst record, keeping ground truth and predictions of one withdrawal
//!   surge, together with its append-only log files.
//!
//! - **[`encoding`]**: the bounded-width bitfield mapping assigning short codes to the
//!   most-traversed ASes at each AS-path depth, so that prefixes can be tagged and failed edges
//!   matched by wildcard patterns in the data plane.
//!
//! - **[`peer`]**: the per-peer pipeline tying the above together, including the burst state
//!   machine and the periodic prediction schedule.
//!
//! - **[`global_rib`]**: the global routing information base, aggregating the advertisements of
//!   all peers into one ordered route set per prefix.
//!
//! - **[`vnh`]**: the virtual next-hop allocator, issuing a virtual IP and MAC per prefix and
//!   building the wildcard rules of the forwarding plane.
//!
//! - **[`rib_service`]**: the Unix-socket service hosting the global RIB and the virtual
//!   next-hop allocator.
//!
//! - **[`server`]**: the TCP feed server and the supervisor of the per-peer pipeline threads.
//!
//! ## Concurrency model
//!
//! One thread per peer, each running a single-threaded event loop over its own ordered channel;
//! one thread for the global RIB, one per feed connection. No mutable state is ever shared
//! between peers; the only cross-thread transfers are the per-peer channels and the Unix-domain
//! stream towards the global RIB.

pub mod bgp;
pub mod bpa;
pub mod burst;
pub mod config;
pub mod encoding;
pub mod global_rib;
pub mod peer;
pub mod rib;
pub mod rib_service;
pub mod server;
pub mod topology;
pub mod vnh;

mod error;
mod test;

pub use config::Settings;
pub use error::Error;
