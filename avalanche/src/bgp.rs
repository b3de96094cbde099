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

//! # BGP update records
//!
//! This module contains the canonical in-memory representation of one BGP update, the parser
//! mapping the four recognized feed dialects onto it, and the sliding time-window queue used to
//! keep track of the recently received withdrawals.
//!
//! Records arrive as pipe-delimited ASCII lines, one record per line. The dialect is recognized
//! by the first and third fields. AS paths are de-prepended (consecutive duplicates collapsed)
//! before entering the pipeline, and any record whose path contains a non-adjacent loop is
//! dropped.

use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Error while parsing a single feed line into a [`BgpMessage`].
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The line does not contain enough pipe-delimited fields for its dialect.
    #[error("record has too few fields: {0}")]
    MissingFields(String),
    /// An AS number field could not be parsed.
    #[error("invalid AS number in record: {0}")]
    InvalidAsNumber(String),
    /// The timestamp field could not be parsed.
    #[error("invalid timestamp in record: {0}")]
    InvalidTimestamp(String),
    /// The line does not belong to any recognized feed dialect.
    #[error("unknown feed dialect: {0}")]
    UnknownDialect(String),
}

/// The type of a BGP update record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A route announcement (or a table-dump entry replayed as one)
    Announcement,
    /// A route withdrawal
    Withdrawal,
    /// Synthetic end-of-session marker
    Close,
    /// Informational record (C-BGP only)
    Info,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announcement => write!(f, "A"),
            Self::Withdrawal => write!(f, "W"),
            Self::Close => write!(f, "CLOSE"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

/// Provenance of a record, i.e. the feed dialect it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// RIPE / RouteViews update dumps
    Bgp4mp,
    /// Routing table dumps (replayed as announcements)
    TableDump2,
    /// C-BGP simulator traces
    Cbgp,
    /// Live BGPStream elements
    BgpStream,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bgp4mp => write!(f, "BGP4MP"),
            Self::TableDump2 => write!(f, "TABLE_DUMP2"),
            Self::Cbgp => write!(f, "CBGP"),
            Self::BgpStream => write!(f, "BGPSTREAM"),
        }
    }
}

/// Canonical in-memory BGP update record.
#[derive(Debug, Clone)]
pub struct BgpMessage {
    /// Type of the update
    pub mtype: MessageType,
    /// Peer identifier (collector and peer IP)
    pub peer_id: String,
    /// AS number of the peer (unknown for some withdrawal dialects)
    pub peer_as: Option<u32>,
    /// Timestamp in seconds
    pub time: f64,
    /// The prefix this update is about (absent for session markers)
    pub prefix: Option<String>,
    /// The de-prepended AS path. Empty for withdrawals until the RIB resolves it.
    pub as_path: Vec<u32>,
    /// Feed dialect this record was parsed from
    pub dialect: Dialect,
}

impl fmt::Display for BgpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.as_path.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" ");
        match &self.prefix {
            Some(p) => write!(
                f,
                "{}|{}|{}|{}|{}|{}|{}",
                self.dialect,
                self.mtype,
                self.peer_id,
                self.peer_as.map(|a| a.to_string()).unwrap_or_default(),
                self.time,
                p,
                path
            ),
            None => write!(
                f,
                "{}|{}|{}|{}|{}|{}",
                self.dialect,
                self.mtype,
                self.peer_id,
                self.peer_as.map(|a| a.to_string()).unwrap_or_default(),
                self.time,
                path
            ),
        }
    }
}

/// Remove duplicate ASes caused by AS-path prepending and check for loops. Returns the
/// de-prepended AS path, or an empty path if any AS appears twice non-consecutively.
pub fn clean_aspath(as_path: &[u32]) -> Vec<u32> {
    let mut prev = None;
    let mut seen = std::collections::HashSet::new();
    let mut cleaned = Vec::with_capacity(as_path.len());

    for &asn in as_path {
        if Some(asn) != prev {
            if !seen.insert(asn) {
                return Vec::new();
            }
            cleaned.push(asn);
        }
        prev = Some(asn);
    }
    cleaned
}

fn parse_aspath(field: &str, line: &str) -> Result<Vec<u32>, ParseError> {
    let raw = field
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| ParseError::InvalidAsNumber(line.to_string()))?;
    Ok(clean_aspath(&raw))
}

fn parse_time(field: &str, line: &str) -> Result<f64, ParseError> {
    field.parse::<f64>().map_err(|_| ParseError::InvalidTimestamp(line.to_string()))
}

fn parse_asn(field: &str, line: &str) -> Result<u32, ParseError> {
    field.parse::<u32>().map_err(|_| ParseError::InvalidAsNumber(line.to_string()))
}

fn field<'a>(fields: &[&'a str], idx: usize, line: &str) -> Result<&'a str, ParseError> {
    fields.get(idx).copied().ok_or_else(|| ParseError::MissingFields(line.to_string()))
}

/// Parse one feed line into a [`BgpMessage`].
///
/// Returns `Ok(None)` for comment lines, for record subtypes the pipeline does not consume, and
/// for announcements whose AS path contains a non-adjacent loop (those records are dropped).
pub fn parse(line: &str) -> Result<Option<BgpMessage>, ParseError> {
    let line = line.trim_end_matches('\n');
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 3 {
        return Err(ParseError::UnknownDialect(line.to_string()));
    }

    if fields[1] == "BGP4" {
        // c-bgp trace: <router>|BGP4|<time>|<type>|<peer_ip>|...
        let peer_id = format!("{}-{}", fields[0], field(&fields, 4, line)?);
        let time = parse_time(fields[2], line)?;
        match field(&fields, 3, line)? {
            "A" => {
                let as_path = parse_aspath(field(&fields, 7, line)?, line)?;
                if as_path.is_empty() {
                    return Ok(None);
                }
                Ok(Some(BgpMessage {
                    mtype: MessageType::Announcement,
                    peer_id,
                    peer_as: Some(as_path[0]),
                    time,
                    prefix: Some(field(&fields, 6, line)?.to_string()),
                    as_path,
                    dialect: Dialect::Cbgp,
                }))
            }
            "W" => Ok(Some(BgpMessage {
                mtype: MessageType::Withdrawal,
                peer_id,
                peer_as: None,
                time,
                prefix: Some(field(&fields, 6, line)?.to_string()),
                as_path: Vec::new(),
                dialect: Dialect::Cbgp,
            })),
            "CLOSE" => Ok(Some(BgpMessage {
                mtype: MessageType::Close,
                peer_id,
                peer_as: None,
                time,
                prefix: None,
                as_path: Vec::new(),
                dialect: Dialect::Cbgp,
            })),
            "INFO" => Ok(Some(BgpMessage {
                mtype: MessageType::Info,
                peer_id,
                peer_as: None,
                time,
                prefix: Some(format!(
                    "{}_{}",
                    field(&fields, 6, line)?,
                    field(&fields, 7, line)?
                )),
                as_path: Vec::new(),
                dialect: Dialect::Cbgp,
            })),
            _ => Ok(None),
        }
    } else if fields[0] == "BGP4MP" {
        // RIPE update dumps: BGP4MP|<time>|<type>|<peer_ip>|<peer_as>|<prefix>|<aspath>
        let time = parse_time(fields[1], line)?;
        match fields[2] {
            "A" => {
                let as_path = parse_aspath(field(&fields, 6, line)?, line)?;
                if as_path.is_empty() {
                    return Ok(None);
                }
                Ok(Some(BgpMessage {
                    mtype: MessageType::Announcement,
                    peer_id: field(&fields, 3, line)?.to_string(),
                    peer_as: Some(parse_asn(field(&fields, 4, line)?, line)?),
                    time,
                    prefix: Some(field(&fields, 5, line)?.to_string()),
                    as_path,
                    dialect: Dialect::Bgp4mp,
                }))
            }
            "W" => Ok(Some(BgpMessage {
                mtype: MessageType::Withdrawal,
                peer_id: field(&fields, 3, line)?.to_string(),
                peer_as: Some(parse_asn(field(&fields, 4, line)?, line)?),
                time,
                prefix: Some(field(&fields, 5, line)?.to_string()),
                as_path: Vec::new(),
                dialect: Dialect::Bgp4mp,
            })),
            "CLOSE" => Ok(Some(BgpMessage {
                mtype: MessageType::Close,
                peer_id: field(&fields, 3, line)?.to_string(),
                peer_as: Some(parse_asn(field(&fields, 4, line)?, line)?),
                time,
                prefix: None,
                as_path: Vec::new(),
                dialect: Dialect::Bgp4mp,
            })),
            _ => Ok(None),
        }
    } else if fields[0] == "TABLE_DUMP2" {
        // routing table entries are replayed as announcements
        if fields[2] == "B" {
            // table dumps occasionally contain AS sets; those paths are kept empty
            let as_path = parse_aspath(field(&fields, 6, line)?, line).unwrap_or_default();
            Ok(Some(BgpMessage {
                mtype: MessageType::Announcement,
                peer_id: field(&fields, 3, line)?.to_string(),
                peer_as: Some(parse_asn(field(&fields, 4, line)?, line)?),
                time: parse_time(fields[1], line)?,
                prefix: Some(field(&fields, 5, line)?.to_string()),
                as_path,
                dialect: Dialect::TableDump2,
            }))
        } else {
            Ok(None)
        }
    } else if fields[0] == "BGPSTREAM" {
        // BGPSTREAM|<collector>|<type>|<peer_ip>|<peer_as>|<time>|<prefix>|<aspath>
        let peer_id = format!("{}-{}", fields[1], field(&fields, 3, line)?);
        let peer_as = parse_asn(field(&fields, 4, line)?, line)?;
        let time = parse_time(field(&fields, 5, line)?, line)?;
        match fields[2] {
            "A" | "R" => {
                let as_path = parse_aspath(field(&fields, 7, line)?, line)?;
                if as_path.is_empty() {
                    return Ok(None);
                }
                Ok(Some(BgpMessage {
                    mtype: MessageType::Announcement,
                    peer_id,
                    peer_as: Some(peer_as),
                    time,
                    prefix: Some(field(&fields, 6, line)?.to_string()),
                    as_path,
                    dialect: Dialect::BgpStream,
                }))
            }
            "W" => Ok(Some(BgpMessage {
                mtype: MessageType::Withdrawal,
                peer_id,
                peer_as: Some(peer_as),
                time,
                prefix: Some(field(&fields, 6, line)?.to_string()),
                as_path: Vec::new(),
                dialect: Dialect::BgpStream,
            })),
            "CLOSE" => Ok(Some(BgpMessage {
                mtype: MessageType::Close,
                peer_id,
                peer_as: Some(peer_as),
                time,
                prefix: None,
                as_path: Vec::new(),
                dialect: Dialect::BgpStream,
            })),
            _ => Ok(None),
        }
    } else {
        Err(ParseError::UnknownDialect(line.to_string()))
    }
}

/// Time-ordered FIFO of BGP records, dropping records older than the configured window.
#[derive(Debug)]
pub struct MessageQueue {
    window: u64,
    queue: VecDeque<BgpMessage>,
}

impl MessageQueue {
    /// Create an empty queue with the given window size in seconds.
    pub fn new(window: u64) -> Self {
        Self { window, queue: VecDeque::new() }
    }

    /// Append a record at the tail of the queue.
    pub fn push(&mut self, msg: BgpMessage) {
        self.queue.push_back(msg);
    }

    /// Remove all records at the head of the queue that have expired at time `ts`.
    pub fn refresh(&mut self, ts: f64) {
        let window = self.window as f64;
        while self.queue.front().map(|m| ts - m.time > window).unwrap_or(false) {
            self.queue.pop_front();
        }
    }

    /// Remove all records at the head of the queue that have expired at time `ts`, yielding the
    /// expired records, so that an active burst can retain them.
    pub fn refresh_iter<'a>(&'a mut self, ts: f64) -> impl Iterator<Item = BgpMessage> + 'a {
        let window = self.window as f64;
        let queue = &mut self.queue;
        std::iter::from_fn(move || {
            if queue.front().map(|m| ts - m.time > window).unwrap_or(false) {
                queue.pop_front()
            } else {
                None
            }
        })
    }

    /// Number of records currently inside the window.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no record is inside the window.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Access the record at the given position (0 = oldest).
    pub fn get(&self, idx: usize) -> Option<&BgpMessage> {
        self.queue.get(idx)
    }

    /// Iterate over the queued records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BgpMessage> {
        self.queue.iter()
    }
}
