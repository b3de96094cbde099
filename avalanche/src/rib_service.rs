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

//! # Global RIB Service
//!
//! Unix-domain stream server receiving the per-peer egress (advertisements, withdrawals and
//! fast-reroute requests), feeding the global RIB and the virtual next-hop allocator, and
//! emitting the resulting routing decisions on stdout.
//!
//! Each accepted connection gets a reader thread that only parses lines into commands; a single
//! consumer owns and mutates the RIB state, so no lock is ever taken on it. Fast-reroute rules
//! expire after five minutes of feed time, driven by the timestamps of the incoming messages
//! rather than the wall clock.

use crate::bgp::ParseError;
use crate::config::Settings;
use crate::global_rib::{BgpRoute, RibGlobal};
use crate::vnh::{FileProgrammer, FlowProgrammer, FlowsQueue, VirtualNextHops};
use crate::Error;
use crossbeam_channel::{unbounded, Receiver, Sender};
use ipnet::Ipv4Net;
use log::{error, info};
use std::fs;
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::thread;

/// Lifetime of an installed fast-reroute rule, in seconds of feed time.
const BACKUP_RULE_LIFETIME: i64 = 60 * 5;

/// The IP pool the virtual next hops are allocated from.
const VNH_POOL: &str = "2.0.0.128/25";

/// One parsed command from a peer pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RibCommand {
    /// `peer_ip|prefix|ts|aspath|vmac` -- a tagged advertisement.
    Advertisement {
        /// Advertising peer.
        peer_ip: String,
        /// The destination prefix.
        prefix: String,
        /// Timestamp of the advertisement.
        ts: f64,
        /// The AS path of the route.
        as_path: Vec<u32>,
        /// The AS-path code bits.
        vmac: String,
    },
    /// `peer_ip|prefix|ts` -- a plain withdrawal.
    Withdrawal {
        /// Withdrawing peer.
        peer_ip: String,
        /// The withdrawn prefix.
        prefix: String,
        /// Timestamp of the withdrawal.
        ts: f64,
    },
    /// `FR|peer_ip|vmac|bitmask|depth|ts` -- install wildcard backup rules.
    FastReroute {
        /// Peer predicting the failure.
        peer_ip: String,
        /// AS-path code bits of the failed link.
        vmac: String,
        /// Bitmask with ones over the code bits.
        bitmask: String,
        /// Depth of the failed link.
        depth: usize,
        /// Timestamp of the prediction.
        ts: i64,
    },
}

/// Parse one line of peer egress into a [`RibCommand`].
pub fn parse_command(line: &str) -> Result<RibCommand, ParseError> {
    let line = line.trim_end_matches('\n');
    let fields: Vec<&str> = line.split('|').collect();

    if fields[0] == "FR" {
        if fields.len() < 6 {
            return Err(ParseError::MissingFields(line.to_string()));
        }
        return Ok(RibCommand::FastReroute {
            peer_ip: fields[1].to_string(),
            vmac: fields[2].to_string(),
            bitmask: fields[3].to_string(),
            depth: fields[4]
                .parse()
                .map_err(|_| ParseError::MissingFields(line.to_string()))?,
            ts: fields[5]
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidTimestamp(line.to_string()))?
                as i64,
        });
    }

    if fields.len() >= 5 {
        let as_path = if fields[3].is_empty() {
            Vec::new()
        } else {
            fields[3]
                .split(' ')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<u32>())
                .collect::<Result<Vec<u32>, _>>()
                .map_err(|_| ParseError::InvalidAsNumber(line.to_string()))?
        };
        Ok(RibCommand::Advertisement {
            peer_ip: fields[0].to_string(),
            prefix: fields[1].to_string(),
            ts: fields[2]
                .parse()
                .map_err(|_| ParseError::InvalidTimestamp(line.to_string()))?,
            as_path,
            vmac: fields[4].to_string(),
        })
    } else if fields.len() >= 3 {
        Ok(RibCommand::Withdrawal {
            peer_ip: fields[0].to_string(),
            prefix: fields[1].to_string(),
            ts: fields[2]
                .parse()
                .map_err(|_| ParseError::InvalidTimestamp(line.to_string()))?,
        })
    } else {
        Err(ParseError::MissingFields(line.to_string()))
    }
}

/// The state owned by the single consumer thread.
pub struct GlobalRibService {
    rib: RibGlobal,
    vnh: VirtualNextHops,
    flows: FlowsQueue,
}

impl GlobalRibService {
    /// Create the service state, with the default file-backed forwarding-plane programmer.
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let pool: Ipv4Net = VNH_POOL.parse().map_err(|_| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid virtual next-hop pool",
            ))
        })?;
        let programmer: Box<dyn FlowProgrammer + Send> =
            Box::new(FileProgrammer::new(Path::new("."))?);
        Ok(Self {
            rib: RibGlobal::new(),
            vnh: VirtualNextHops::new(
                settings.nb_bits_nexthop,
                pool,
                Path::new("virtual_nexthops"),
                Path::new("mapping"),
                programmer,
            )?,
            flows: FlowsQueue::new(BACKUP_RULE_LIFETIME),
        })
    }

    /// Apply one command to the RIB state, printing the routing decisions on stdout.
    pub fn apply(&mut self, cmd: RibCommand) -> Result<(), Error> {
        match cmd {
            RibCommand::FastReroute { peer_ip, vmac, bitmask, depth, ts } => {
                for flow in self.vnh.insert_backup_rules(&peer_ip, depth, &vmac, &bitmask)? {
                    self.flows.push(ts, flow);
                }
            }
            RibCommand::Advertisement { peer_ip, prefix, ts, as_path, vmac } => {
                self.expire_rules(ts as i64)?;
                let change =
                    self.rib.announce(BgpRoute::new(&prefix, &peer_ip, as_path, &vmac));
                if let Some(new_primary) = change.new_primary {
                    let (vnh_ip, vnh_mac) = self.vnh.get_vnh(&self.rib, &prefix)?;
                    println!(
                        "A|{}|{}|({})|{}",
                        prefix,
                        vnh_ip.unwrap_or_default(),
                        vnh_mac.unwrap_or_default(),
                        new_primary.as_path_text()
                    );
                }
            }
            RibCommand::Withdrawal { peer_ip, prefix, ts } => {
                self.expire_rules(ts as i64)?;
                let change = self.rib.withdraw(&peer_ip, &prefix);
                if let Some(new_primary) = change.new_primary {
                    let (vnh_ip, vnh_mac) = self.vnh.get_vnh(&self.rib, &prefix)?;
                    println!(
                        "A|{}|{}|({})|{}",
                        prefix,
                        vnh_ip.unwrap_or_default(),
                        vnh_mac.unwrap_or_default(),
                        new_primary.as_path_text()
                    );
                } else if change.previous_primary.is_some() {
                    println!("W|{}", prefix);
                }
            }
        }
        Ok(())
    }

    fn expire_rules(&mut self, ts: i64) -> Result<(), Error> {
        let expired: Vec<String> = self.flows.refresh_iter(ts).collect();
        for flow in expired {
            self.vnh.delete_rule(&flow)?;
        }
        Ok(())
    }
}

// read one peer connection, forwarding parsed commands to the consumer
fn read_connection(stream: std::os::unix::net::UnixStream, tx: Sender<RibCommand>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            Err(e) => error!("cannot parse peer egress: {}", e),
        }
    }
    info!("one peer has disconnected");
}

/// Run the global RIB service: bind the Unix socket, accept peer connections, and consume
/// their commands until the process terminates.
pub fn run(settings: &Settings) -> Result<(), Error> {
    let socket_path = settings.rib_socket.clone();
    if socket_path.exists() {
        fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!("global RIB listening on {:?}", socket_path);

    let (tx, rx): (Sender<RibCommand>, Receiver<RibCommand>) = unbounded();

    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    info!("new connection to the global RIB");
                    let tx = tx.clone();
                    thread::spawn(move || read_connection(stream, tx));
                }
                Err(e) => {
                    error!("global RIB accept failed: {}", e);
                    break;
                }
            }
        }
    });

    let mut service = GlobalRibService::new(settings)?;
    while let Ok(cmd) = rx.recv() {
        if let Err(e) = service.apply(cmd) {
            error!("global RIB error: {}", e);
        }
    }
    Ok(())
}
