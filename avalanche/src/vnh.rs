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

//! # Virtual Next Hops
//!
//! Issues, per prefix, a virtual next-hop IP out of a configured pool and a virtual MAC
//! encoding the primary next hop, one pre-computed backup next hop per AS-path depth, and the
//! AS-path code bits of the advertisement. The data plane matches the MAC with wildcard rules:
//! a predicted failure at depth d only needs one rule over the d-th backup field to deflect all
//! affected prefixes at once.
//!
//! The actual forwarding plane is external; it is driven through the [`FlowProgrammer`] seam,
//! whose default implementation records every rule in the `switch_rules` file and every expired
//! rule in `deleted_rules`.

use crate::global_rib::RibGlobal;
use ipnet::Ipv4Net;
use log::{info, warn};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, LineWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;

/// The sink consuming forwarding-plane programming commands.
pub trait FlowProgrammer {
    /// Install a flow rule (a full `ovs-ofctl add-flow` command line).
    fn add_flow(&mut self, rule: &str) -> io::Result<()>;
    /// Remove a previously installed rule, identified by its match specification.
    fn delete_flow(&mut self, match_spec: &str) -> io::Result<()>;
}

/// Default [`FlowProgrammer`] writing every command to log files instead of driving a switch.
#[derive(Debug)]
pub struct FileProgrammer {
    rules_out: LineWriter<File>,
    deleted_out: LineWriter<File>,
}

impl FileProgrammer {
    /// Open (truncate) the two rule log files inside `dir`.
    pub fn new(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            rules_out: LineWriter::new(File::create(dir.join("switch_rules"))?),
            deleted_out: LineWriter::new(File::create(dir.join("deleted_rules"))?),
        })
    }
}

impl FlowProgrammer for FileProgrammer {
    fn add_flow(&mut self, rule: &str) -> io::Result<()> {
        writeln!(self.rules_out, "{}", rule)
    }

    fn delete_flow(&mut self, match_spec: &str) -> io::Result<()> {
        writeln!(self.deleted_out, "{}", match_spec)
    }
}

/// Time-ordered FIFO of installed fast-reroute rules, expiring after a fixed lifetime of feed
/// time.
#[derive(Debug, Default)]
pub struct FlowsQueue {
    lifetime: i64,
    queue: VecDeque<(i64, String)>,
}

impl FlowsQueue {
    /// Create an empty queue whose entries expire after `lifetime` seconds.
    pub fn new(lifetime: i64) -> Self {
        Self { lifetime, queue: VecDeque::new() }
    }

    /// Append one installed rule.
    pub fn push(&mut self, ts: i64, match_spec: String) {
        self.queue.push_back((ts, match_spec));
    }

    /// Remove all expired rules, yielding their match specifications.
    pub fn refresh_iter<'a>(&'a mut self, ts: i64) -> impl Iterator<Item = String> + 'a {
        let lifetime = self.lifetime;
        let queue = &mut self.queue;
        std::iter::from_fn(move || {
            if queue.front().map(|(t, _)| ts - t > lifetime).unwrap_or(false) {
                queue.pop_front().map(|(_, f)| f)
            } else {
                None
            }
        })
    }

    /// Number of currently installed rules.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no rule is installed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// The virtual next-hop allocator and rule builder.
pub struct VirtualNextHops {
    rib_tags: HashMap<String, u32>,
    nexthop_bits: usize,
    max_depth: usize,
    vnh_pairs: HashMap<String, Ipv4Addr>,
    vnh_base: u32,
    counter: u32,
    mapping_real: HashMap<String, (String, String)>,
    vnh_out: LineWriter<File>,
    programmer: Box<dyn FlowProgrammer + Send>,
}

impl std::fmt::Debug for VirtualNextHops {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualNextHops")
            .field("nexthop_bits", &self.nexthop_bits)
            .field("known_nexthops", &self.rib_tags.len())
            .field("allocated", &self.counter)
            .finish()
    }
}

impl VirtualNextHops {
    /// Create the allocator. `ip_pool` is the prefix the virtual IPs are taken from, and
    /// `mapping_path` an optional file resolving real next-hop IPs to (real MAC, output port)
    /// pairs, one whitespace-separated triple per line.
    pub fn new(
        nexthop_bits: usize,
        ip_pool: Ipv4Net,
        vnh_path: &Path,
        mapping_path: &Path,
        programmer: Box<dyn FlowProgrammer + Send>,
    ) -> io::Result<Self> {
        let mut mapping_real = HashMap::new();
        match File::open(mapping_path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() >= 3 {
                        mapping_real.insert(
                            fields[0].to_string(),
                            (fields[1].to_string(), fields[2].to_string()),
                        );
                    }
                }
            }
            Err(_) => warn!("VNH: mapping file not available"),
        }

        Ok(Self {
            rib_tags: HashMap::new(),
            nexthop_bits,
            max_depth: 4,
            vnh_pairs: HashMap::new(),
            vnh_base: u32::from(ip_pool.network()),
            counter: 0,
            mapping_real,
            vnh_out: LineWriter::new(File::create(vnh_path)?),
            programmer,
        })
    }

    /// The virtual next hop of a prefix. Prefixes with a single route keep their real next-hop
    /// IP and carry no virtual MAC; with two or more routes, a virtual MAC is built (primary
    /// tag, one backup tag per depth, AS-path code bits) and a virtual IP is allocated for it.
    pub fn get_vnh(
        &mut self,
        rib: &RibGlobal,
        prefix: &str,
    ) -> io::Result<(Option<String>, Option<String>)> {
        let routes = match rib.routes(prefix) {
            Some(routes) => routes,
            None => return Ok((None, None)),
        };
        let primary = match routes.iter().next() {
            Some(primary) => primary,
            None => return Ok((None, None)),
        };
        if routes.len() < 2 {
            return Ok((Some(primary.peer_ip.clone()), None));
        }

        let primary_ip = primary.peer_ip.clone();
        self.ensure_tag(&primary_ip)?;
        let mut vmac = self.tag_bits(&primary_ip);

        // one backup field per depth of the primary path
        let as_path = &primary.as_path;
        for d in 0..as_path.len().saturating_sub(1).min(self.max_depth) {
            let link = (as_path[d], as_path[d + 1]);
            match rib
                .get_backup_avoiding_aslink(&primary_ip, prefix, link, false)
                .map(|r| r.peer_ip.clone())
            {
                Some(backup_ip) => {
                    self.ensure_tag(&backup_ip)?;
                    let bits = self.tag_bits(&backup_ip);
                    vmac.push_str(&bits);
                }
                None => {
                    // no alternate peer: the backup field stays all-zero
                    vmac.push_str(&"0".repeat(self.nexthop_bits));
                }
            }
        }

        while vmac.len() < self.nexthop_bits * (self.max_depth + 1) {
            vmac.push('0');
        }
        vmac.push('.');
        vmac.push_str(&primary.partial_vmac);

        if !self.vnh_pairs.contains_key(&vmac) {
            self.counter += 1;
            let ip = Ipv4Addr::from(self.vnh_base.wrapping_add(self.counter));
            let flat: String = vmac.chars().filter(|c| *c != '.').collect();
            let as_int = u64::from_str_radix(&flat, 2).unwrap_or(0);
            writeln!(self.vnh_out, "{}\t{}\t{}", ip, as_int, vmac)?;
            self.vnh_pairs.insert(vmac.clone(), ip);
        }

        let ip = self.vnh_pairs.get(&vmac).map(|ip| ip.to_string());
        Ok((ip, Some(vmac)))
    }

    /// Install the wildcard backup rules for a predicted failure: one rule per known alternate
    /// next hop, matching the primary tag, the backup tag at the failing depth, and the AS-path
    /// code bits of the failed link. Returns the match specifications of the installed rules.
    pub fn insert_backup_rules(
        &mut self,
        peer_ip: &str,
        depth: usize,
        aspath_vmac: &str,
        aspath_bitmask: &str,
    ) -> io::Result<Vec<String>> {
        let mut final_flows = Vec::new();
        if !self.rib_tags.contains_key(peer_ip) {
            return Ok(final_flows);
        }

        let mut backups: Vec<String> =
            self.rib_tags.keys().filter(|ip| ip.as_str() != peer_ip).cloned().collect();
        backups.sort();

        for backup_ip in backups {
            let mut backup_vmac = self.tag_bits(peer_ip);
            let mut backup_bitmask = "1".repeat(self.nexthop_bits);

            for i in 1..=self.max_depth {
                if i == depth {
                    backup_vmac.push_str(&self.tag_bits(&backup_ip));
                    backup_bitmask.push_str(&"1".repeat(self.nexthop_bits));
                } else {
                    backup_vmac.push_str(&"0".repeat(self.nexthop_bits));
                    backup_bitmask.push_str(&"0".repeat(self.nexthop_bits));
                }
            }

            let (real_mac, outport) = self.real_nexthop(&backup_ip);

            info!("FR|{},{}|{},{}", backup_vmac, aspath_vmac, backup_bitmask, aspath_bitmask);

            self.programmer.add_flow(&format!(
                "ovs-ofctl add-flow s1 priority=100,dl_dst={}{}/{}{},actions=mod_dl_dst:{},output:{}",
                backup_vmac, aspath_vmac, backup_bitmask, aspath_bitmask, real_mac, outport
            ))?;

            let mac = mac_from_bits(&format!("{}{}", backup_vmac, aspath_vmac));
            let mask = mac_from_bits(&format!("{}{}", backup_bitmask, aspath_bitmask));
            final_flows.push(format!("dl_dst={}/{}", mac, mask));
        }

        Ok(final_flows)
    }

    /// Remove an expired fast-reroute rule from the forwarding plane.
    pub fn delete_rule(&mut self, match_spec: &str) -> io::Result<()> {
        self.programmer.delete_flow(match_spec)
    }

    fn ensure_tag(&mut self, peer_ip: &str) -> io::Result<()> {
        if !self.rib_tags.contains_key(peer_ip) {
            let tag = self.rib_tags.len() as u32;
            self.rib_tags.insert(peer_ip.to_string(), tag);
            self.insert_primary_rule(peer_ip)?;
        }
        Ok(())
    }

    fn tag_bits(&self, peer_ip: &str) -> String {
        let tag = self.rib_tags.get(peer_ip).copied().unwrap_or(0);
        format!("{:0width$b}", tag, width = self.nexthop_bits)
    }

    fn real_nexthop(&self, peer_ip: &str) -> (String, String) {
        self.mapping_real
            .get(peer_ip)
            .cloned()
            .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()))
    }

    // the low-priority rule steering the primary tag towards the real next hop
    fn insert_primary_rule(&mut self, peer_ip: &str) -> io::Result<()> {
        let mut tag_mac = self.tag_bits(peer_ip);
        while tag_mac.len() < 48 {
            tag_mac.push('0');
        }
        let mut bitmask = "1".repeat(self.nexthop_bits);
        while bitmask.len() < 48 {
            bitmask.push('0');
        }

        let (real_mac, outport) = self.real_nexthop(peer_ip);
        self.programmer.add_flow(&format!(
            "ovs-ofctl add-flow s1 priority=10,dl_dst={}/{},actions=mod_dl_dst:{},output:{}",
            mac_from_bits(&tag_mac),
            mac_from_bits(&bitmask),
            real_mac,
            outport
        ))
    }
}

// render a bit string (48 bits or fewer, right-aligned) as a colon-separated MAC address
fn mac_from_bits(bits: &str) -> String {
    let value = u64::from_str_radix(bits, 2).unwrap_or(0);
    let hex = format!("{:012x}", value);
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_string())
        .collect::<Vec<_>>()
        .join(":")
}
