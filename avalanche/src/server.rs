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

//! # Feed Server and Peer Supervisor
//!
//! Accepts the BGP text stream over TCP, parses each line into a record, and routes it to the
//! ordered queue of the record's peer. The supervisor map holds, per peer, the channel sender
//! and the join handle of the pipeline thread. New peers beyond the configured limit are
//! refused with a log line. A feed line containing `EXIT` triggers the same orderly teardown as
//! a termination signal.

use crate::bgp::{self, BgpMessage};
use crate::config::Settings;
use crate::peer::{run_peer, run_peer_validation};
use crate::rib_service;
use crate::Error;
use crossbeam_channel::{unbounded, Sender};
use log::{error, info, warn};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

// one running peer pipeline: its ordered queue and its thread
struct PeerHandle {
    sender: Sender<BgpMessage>,
    handle: JoinHandle<()>,
}

type PeerMap = Arc<Mutex<HashMap<String, PeerHandle>>>;

/// Write the header line of the burst bookkeeping file.
fn write_bursts_info_header(settings: &Settings) -> Result<(), Error> {
    fs::create_dir_all(&settings.bursts_dir)?;
    let mut info = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(settings.bursts_dir.join("bursts_info"))?;
    writeln!(
        info,
        "#\tw_threshold:\t{},{}\t{}\t{}\t{}\t{}\t{}",
        settings.burst_start,
        settings.burst_end,
        settings.win_size,
        settings.min_bpa_burst_size,
        settings.bpa_freq,
        settings.p_w,
        settings.r_w
    )?;
    Ok(())
}

// route one record to its peer pipeline, spawning the pipeline if the peer is new
fn dispatch(msg: BgpMessage, peers: &PeerMap, settings: &Settings) {
    let mut peers = match peers.lock() {
        Ok(peers) => peers,
        Err(_) => return,
    };

    if !peers.contains_key(&msg.peer_id) {
        // reap the pipelines that terminated on CLOSE
        peers.retain(|_, p| !p.handle.is_finished());

        if peers.len() >= settings.peer_limit {
            warn!("{}", Error::PeerLimitReached(settings.peer_limit));
            return;
        }

        info!("Starting new peer {}", msg.peer_id);
        let (tx, rx) = unbounded();
        let peer_settings = settings.clone();
        let handle = if settings.bpa_validation {
            thread::spawn(move || run_peer_validation(rx, peer_settings))
        } else {
            thread::spawn(move || run_peer(rx, peer_settings))
        };
        peers.insert(msg.peer_id.clone(), PeerHandle { sender: tx, handle });
    }

    if let Some(peer) = peers.get(&msg.peer_id) {
        let peer_id = msg.peer_id.clone();
        if peer.sender.send(msg).is_err() {
            info!("Peer {} disconnected", peer_id);
            peers.remove(&peer_id);
        }
    }
}

// drain the supervisor map and wait for the pipelines to tear down
fn shutdown(peers: &PeerMap) {
    let drained: Vec<(String, PeerHandle)> = match peers.lock() {
        Ok(mut peers) => peers.drain().collect(),
        Err(_) => return,
    };
    for (peer_id, peer) in drained {
        drop(peer.sender);
        if peer.handle.join().is_err() {
            error!("peer {} panicked during teardown", peer_id);
        }
    }
}

// read one feed connection line by line
fn read_feed(stream: TcpStream, peers: PeerMap, settings: Settings) {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };

        match bgp::parse(&line) {
            Ok(Some(msg)) => dispatch(msg, &peers, &settings),
            Ok(None) => {}
            Err(e) => {
                if line.contains("EXIT") {
                    info!("Received EXIT. Exiting.");
                    shutdown(&peers);
                    std::process::exit(1);
                }
                error!("{}", Error::ParseError(e));
            }
        }
    }

    info!("Disconnected from {}", peer_addr);
}

/// Run the feed server: start the global RIB service, then accept feed connections forever and
/// dispatch their records to the per-peer pipelines.
pub fn run(settings: Settings) -> Result<(), Error> {
    write_bursts_info_header(&settings)?;

    let rib_settings = settings.clone();
    thread::spawn(move || {
        if let Err(e) = rib_service::run(&rib_settings) {
            error!("global RIB service failed: {}", e);
        }
    });
    info!("Started the global RIB.");

    let listener = TcpListener::bind(("0.0.0.0", settings.port))?;
    info!("Waiting for new connections on port {}...", settings.port);

    let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                info!(
                    "New connection from {}",
                    stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| "unknown".to_string())
                );
                let peers = Arc::clone(&peers);
                let settings = settings.clone();
                thread::spawn(move || read_feed(stream, peers, settings));
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }

    shutdown(&peers);
    Ok(())
}
