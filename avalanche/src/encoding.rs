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

//! # Encoding Engine
//!
//! Maintains one bounded-width code table ([`Mapping`]) per AS-path depth, assigning short
//! binary codes to the ASes that carry the most prefixes at that depth. Any prefix can then be
//! tagged with the concatenated codes of its path, and any failed edge can be matched by a
//! wildcard pattern over the two code fields of its depth. The code acts as a Bloom-like
//! wildcard key: completeness is traded (some edges stay unencoded) for a guaranteed small tag.
//!
//! The all-zero code is reserved to mean "not encoded" at every depth. Across all depths, the
//! total width must stay within `max_bits - 2` during construction; the final extra bit granted
//! to depths 2 and 3 may use up the remaining headroom, so `max_bits` is the hard ceiling.

use crate::topology::AsTopology;
use log::warn;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Headroom kept when growing a mapping: never over-provision beyond this many free codes.
const MAX_FREE: usize = 500;

/// Result of adding an AS number to a [`Mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The AS was inserted, growing the mapping by the given number of bits.
    Inserted(usize),
    /// The AS was already encoded; only its reference count was bumped.
    Bumped,
    /// The mapping is blocked and has no room left for a new AS.
    Blocked,
}

#[derive(Debug, Clone, Copy)]
struct CodeEntry {
    code: u32,
    from_count: u32,
    to_count: u32,
}

/// Bounded-width code table for one AS-path depth.
///
/// The table tracks its total width in bits, the set of unused codes, and per encoded AS the
/// code together with two reference counts (how often the AS is the source resp. destination
/// endpoint of an encoded edge). Code 0 is reserved for "not encoded" and is counted as an
/// occupant as soon as the table has any width.
#[derive(Debug, Default)]
pub struct Mapping {
    nb_bits: usize,
    free: BTreeSet<u32>,
    codes: HashMap<u32, CodeEntry>,
    blocked: bool,
}

impl Mapping {
    /// Create an empty mapping of width 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total width of the mapping in bits.
    pub fn nb_bits(&self) -> usize {
        self.nb_bits
    }

    /// Number of unused codes.
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of occupied codes, including the reserved all-zero code.
    pub fn occupied(&self) -> usize {
        self.codes.len() + if self.nb_bits > 0 { 1 } else { 0 }
    }

    /// Returns `true` if the AS is encoded in this mapping.
    pub fn contains(&self, asn: u32) -> bool {
        self.codes.contains_key(&asn)
    }

    /// The code of an AS, if encoded.
    pub fn code(&self, asn: u32) -> Option<u32> {
        self.codes.get(&asn).map(|e| e.code)
    }

    /// Forbid any further growth of this mapping.
    pub fn block(&mut self) {
        self.blocked = true;
    }

    /// Returns `true` if the mapping may not grow anymore.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Grow the mapping by one bit, adding the newly addressable codes to the free set. The
    /// first bit also claims code 0 as the reserved "not encoded" code.
    pub fn add_bit(&mut self) {
        self.nb_bits += 1;
        for code in 1u32 << (self.nb_bits - 1)..1u32 << self.nb_bits {
            self.free.insert(code);
        }
    }

    /// Add an AS number to the mapping, or bump its reference count if it is already encoded.
    /// A new AS requires a free code; the mapping grows by one bit when none is left (and once
    /// more to keep over-provisioning headroom), unless it is blocked.
    pub fn add(&mut self, asn: u32, from_as: bool, overprovisioning: bool) -> AddOutcome {
        if let Some(entry) = self.codes.get_mut(&asn) {
            if from_as {
                entry.from_count += 1;
            } else {
                entry.to_count += 1;
            }
            return AddOutcome::Bumped;
        }

        let mut added = 0;
        if self.free.is_empty() {
            if self.blocked {
                return AddOutcome::Blocked;
            }
            self.add_bit();
            added += 1;
        }
        if overprovisioning && self.free.len() <= self.occupied() && self.free.len() < MAX_FREE {
            if self.blocked {
                return AddOutcome::Blocked;
            }
            self.add_bit();
            added += 1;
        }

        let code = match self.free.iter().next().copied() {
            Some(code) => code,
            None => return AddOutcome::Blocked,
        };
        self.free.remove(&code);
        self.codes.insert(
            asn,
            CodeEntry {
                code,
                from_count: if from_as { 1 } else { 0 },
                to_count: if from_as { 0 } else { 1 },
            },
        );
        AddOutcome::Inserted(added)
    }

    /// How many extra bits adding this AS would require (0, 1, or 2 -- 2 only when the mapping
    /// still has width 0, since the first bit also claims the reserved code).
    pub fn is_available(&self, asn: u32, overprovisioning: bool, offset: usize) -> usize {
        if self.codes.contains_key(&asn) {
            return 0;
        }
        let free = self.free.len() as i64 - offset as i64;
        if overprovisioning {
            if free > self.occupied() as i64 + offset as i64 || free > MAX_FREE as i64 {
                0
            } else if self.nb_bits == 0 {
                2
            } else {
                1
            }
        } else if free > 0 {
            0
        } else {
            1
        }
    }

    /// Decrement the reference count of an AS. When both counts reach zero, the code is
    /// released back into the free set and `true` is returned.
    pub fn remove(&mut self, asn: u32, from_as: bool) -> bool {
        if let Some(entry) = self.codes.get_mut(&asn) {
            if from_as {
                if entry.from_count == 0 {
                    warn!("from-count of AS{} dropped below zero", asn);
                }
                entry.from_count = entry.from_count.saturating_sub(1);
            } else {
                if entry.to_count == 0 {
                    warn!("to-count of AS{} dropped below zero", asn);
                }
                entry.to_count = entry.to_count.saturating_sub(1);
            }
            if entry.from_count == 0 && entry.to_count == 0 {
                let code = entry.code;
                self.codes.remove(&asn);
                self.free.insert(code);
                return true;
            }
        }
        false
    }

    /// The fixed-width binary string of an AS code, or the all-zero string if the AS is not
    /// encoded.
    pub fn get_mapping_string(&self, asn: u32) -> String {
        match self.codes.get(&asn) {
            Some(entry) if self.nb_bits > 0 => {
                format!("{:0width$b}", entry.code, width = self.nb_bits)
            }
            _ => "0".repeat(self.nb_bits),
        }
    }
}

/// The per-peer encoding: one [`Mapping`] per depth, plus the bookkeeping to decide which edges
/// deserve a code.
#[derive(Debug)]
pub struct Encoding {
    peer_id: String,
    mappings: BTreeMap<usize, Mapping>,
    minimum: HashMap<usize, f64>,
    max_bits: usize,
    min_percentile: f64,
    encoded_aslinks: HashMap<usize, HashSet<(u32, u32)>>,
    max_depth: usize,
    status_out: Option<LineWriter<File>>,
}

impl Encoding {
    /// Create an empty encoding writing its status lines to `<outdir>/<peer_id>` (unless
    /// `output` is disabled). `max_bits` is the total tag width; 2 bits of it are kept as
    /// headroom during construction.
    pub fn new(
        peer_id: &str,
        outdir: &Path,
        max_bits: usize,
        min_percentile: f64,
        output: bool,
    ) -> io::Result<Self> {
        let status_out = if output {
            fs::create_dir_all(outdir)?;
            Some(LineWriter::new(File::create(outdir.join(peer_id))?))
        } else {
            None
        };

        Ok(Self {
            peer_id: peer_id.to_string(),
            mappings: BTreeMap::new(),
            minimum: HashMap::new(),
            max_bits,
            min_percentile,
            encoded_aslinks: HashMap::new(),
            max_depth: 4,
            status_out,
        })
    }

    /// The identifier of the peer this encoding belongs to.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The total tag width in bits.
    pub fn max_bits(&self) -> usize {
        self.max_bits
    }

    /// The deepest AS-path position considered for encoding.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The mapping of a depth, if any edge got encoded there.
    pub fn mapping(&self, depth: usize) -> Option<&Mapping> {
        self.mappings.get(&depth)
    }

    /// Iterate over the (depth, mapping) pairs in depth order.
    pub fn mappings(&self) -> impl Iterator<Item = (usize, &Mapping)> {
        self.mappings.iter().map(|(d, m)| (*d, m))
    }

    // One sorted candidate list per depth: (depth_count, from, to) ascending. Only depths in
    // [2, max_depth] are candidates (and of those, only the requested ones if any).
    fn compute_sorted_edges(
        &self,
        g: &AsTopology,
        wanted: Option<&[usize]>,
    ) -> BTreeMap<usize, VecDeque<(u64, u32, u32)>> {
        let mut lists: BTreeMap<usize, Vec<(u64, u32, u32)>> = BTreeMap::new();
        for (from_node, to_node, info) in g.edges() {
            for (&depth, &count) in info.depth.iter() {
                if depth > 1
                    && depth <= self.max_depth
                    && wanted.map(|w| w.contains(&depth)).unwrap_or(true)
                {
                    lists.entry(depth).or_default().push((count, from_node, to_node));
                }
            }
        }
        lists
            .into_iter()
            .map(|(depth, mut list)| {
                list.sort_unstable();
                (depth, list.into_iter().collect())
            })
            .collect()
    }

    /// Build the initial encoding from scratch: repeatedly pick the globally most-traversed
    /// candidate edge and encode its endpoints, as long as the two mappings fit within the
    /// remaining bit budget. Afterwards, depths 2 and 3 (the most critical ones) are granted
    /// one extra bit each, and the admission threshold of every depth is set to the configured
    /// percentile of the accepted counts.
    pub fn compute_encoding(&mut self, g: &AsTopology) {
        let started = Instant::now();

        let mut lists = self.compute_sorted_edges(g, None);

        let mut minimum_tmp: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        self.encoded_aslinks.clear();
        for &depth in lists.keys() {
            self.encoded_aslinks.insert(depth, HashSet::new());
            minimum_tmp.insert(depth, Vec::new());
        }

        self.mappings.clear();
        let mut total_bits = 0usize;

        loop {
            // find the depth holding the candidate with the highest count
            let mut best_depth = None;
            for (&d, list) in lists.iter() {
                if let Some(&(count, _, _)) = list.back() {
                    match best_depth {
                        None => best_depth = Some((d, count)),
                        Some((_, best_count)) if count > best_count => {
                            best_depth = Some((d, count))
                        }
                        _ => {}
                    }
                }
            }

            let depth = match best_depth {
                Some((d, _)) => d,
                None => {
                    // every candidate is placed: hand the leftover budget to the tightest maps
                    while total_bits < self.max_bits.saturating_sub(2) {
                        let to_increase = self
                            .mappings
                            .values_mut()
                            .min_by_key(|m| m.free_len());
                        match to_increase {
                            Some(m) => {
                                m.add_bit();
                                total_bits += 1;
                            }
                            None => break,
                        }
                    }
                    break;
                }
            };

            let (count, from_node, to_node) = match lists.get(&depth).and_then(|l| l.back()) {
                Some(&edge) => edge,
                None => break,
            };

            self.mappings.entry(depth).or_insert_with(Mapping::new);
            self.mappings.entry(depth + 1).or_insert_with(Mapping::new);

            let bits_needed = self.mappings[&depth].is_available(from_node, true, 0)
                + self.mappings[&(depth + 1)].is_available(to_node, true, 0);

            if total_bits + bits_needed <= self.max_bits.saturating_sub(2) {
                if let Some(m) = self.mappings.get_mut(&depth) {
                    if let AddOutcome::Inserted(bits) = m.add(from_node, true, true) {
                        total_bits += bits;
                    }
                }
                if let Some(m) = self.mappings.get_mut(&(depth + 1)) {
                    if let AddOutcome::Inserted(bits) = m.add(to_node, false, true) {
                        total_bits += bits;
                    }
                }
                self.encoded_aslinks.entry(depth).or_default().insert((from_node, to_node));

                if total_bits >= self.max_bits.saturating_sub(2) {
                    if let Some(m) = self.mappings.get_mut(&depth) {
                        m.block();
                    }
                    if let Some(m) = self.mappings.get_mut(&(depth + 1)) {
                        m.block();
                    }
                }

                minimum_tmp.entry(depth).or_default().push(count as f64);
            }

            if let Some(list) = lists.get_mut(&depth) {
                list.pop_back();
            }
        }

        // one more bit for the most critical depths
        if let Some(m) = self.mappings.get_mut(&2) {
            m.add_bit();
        }
        if let Some(m) = self.mappings.get_mut(&3) {
            m.add_bit();
        }

        self.minimum.clear();
        for (depth, mut counts) in minimum_tmp {
            if !counts.is_empty() {
                self.minimum.insert(depth, percentile(&mut counts, self.min_percentile));
            }
        }

        self.write_debug(&format!("C|{}", started.elapsed().as_secs_f64()));
        self.write_status("C", "");
    }

    /// Add an AS link to the encoding if its weight at this depth is high enough. Both
    /// endpoints must fit without any over-provisioning growth. Returns `true` if a new AS got
    /// encoded.
    pub fn add(&mut self, depth: usize, prev_as: u32, next_as: u32, g: &AsTopology) -> bool {
        if !(self.mappings.contains_key(&depth)
            && self.mappings.contains_key(&(depth + 1))
            && self.minimum.contains_key(&depth))
        {
            return false;
        }
        if self.mappings[&depth].contains(prev_as)
            && self.mappings[&(depth + 1)].contains(next_as)
        {
            return false;
        }

        // a full mapping is refreshed before deciding on the admission
        if self.mappings[&depth].free_len() == 0 {
            self.refresh(depth, g);
        }
        if self.mappings[&(depth + 1)].free_len() == 0 {
            self.refresh(depth + 1, g);
        }

        let count = match g.edge(prev_as, next_as).and_then(|e| e.depth.get(&depth)) {
            Some(&count) => count as f64,
            None => return false,
        };
        if self.minimum.get(&depth).map(|min| *min < count).unwrap_or(false) {
            let from_fits = self.mappings[&depth].is_available(prev_as, false, 0) == 0;
            let to_fits = self.mappings[&(depth + 1)].is_available(next_as, false, 0) == 0;

            if from_fits && to_fits {
                let added_from = match self.mappings.get_mut(&depth) {
                    Some(m) => matches!(m.add(prev_as, true, false), AddOutcome::Inserted(_)),
                    None => false,
                };
                let added_to = match self.mappings.get_mut(&(depth + 1)) {
                    Some(m) => matches!(m.add(next_as, false, false), AddOutcome::Inserted(_)),
                    None => false,
                };
                self.encoded_aslinks.entry(depth).or_default().insert((prev_as, next_as));
                return added_from || added_to;
            }
        }
        false
    }

    /// Remove an AS link from the encoding. Returns the control-plane overhead of the removal:
    /// the number of prefixes that traverse the edge at this depth and would need to be
    /// re-tagged. Removing an edge does not necessarily release code space, since the endpoints
    /// can still be referenced by other encoded edges.
    pub fn remove(&mut self, depth: usize, prev_as: u32, next_as: u32, g: &AsTopology) -> u64 {
        if !(self.mappings.contains_key(&depth) && self.mappings.contains_key(&(depth + 1))) {
            return 0;
        }
        let encoded = self
            .encoded_aslinks
            .get(&depth)
            .map(|links| links.contains(&(prev_as, next_as)))
            .unwrap_or(false);
        if !encoded {
            return 0;
        }

        if let Some(m) = self.mappings.get_mut(&depth) {
            m.remove(prev_as, true);
        }
        if let Some(m) = self.mappings.get_mut(&(depth + 1)) {
            m.remove(next_as, false);
        }
        if let Some(links) = self.encoded_aslinks.get_mut(&depth) {
            links.remove(&(prev_as, next_as));
        }

        g.edge(prev_as, next_as).and_then(|e| e.depth.get(&depth)).copied().unwrap_or(0)
    }

    /// Process a route change: withdraw the old path, then offer every link of the new path to
    /// the encoding.
    pub fn advertisement(&mut self, old_aspath: &[u32], new_aspath: &[u32], g: &AsTopology) {
        self.withdraw(old_aspath, g);

        for i in 0..new_aspath.len().saturating_sub(1) {
            self.add(i + 1, new_aspath[i], new_aspath[i + 1], g);
        }
    }

    /// Process a withdrawn path: links that are no longer represented in the topology at their
    /// depth are removed from the encoding (and only those).
    pub fn withdraw(&mut self, old_aspath: &[u32], g: &AsTopology) {
        for i in 0..old_aspath.len().saturating_sub(1) {
            let (u, v) = (old_aspath[i], old_aspath[i + 1]);
            let still_used =
                g.edge(u, v).map(|e| e.depth.contains_key(&(i + 1))).unwrap_or(false);
            if !still_used {
                self.remove(i + 1, u, v, g);
            }
        }
    }

    /// Rebuild the admission state around a full mapping. Candidate edges of the two relevant
    /// depths are visited from the least traversed upwards: while the full mapping is more than
    /// half used, edges are evicted (accumulating their control-plane overhead); the remaining
    /// counts determine the new percentile threshold. Returns the total overhead.
    pub fn refresh(&mut self, depth_targeted: usize, g: &AsTopology) -> u64 {
        let mut overhead = 0;

        self.write_status("BR", "");

        let wanted = [depth_targeted.saturating_sub(1), depth_targeted];
        let mut lists = self.compute_sorted_edges(g, Some(&wanted));

        let mut minimum_tmp: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for &depth in lists.keys() {
            minimum_tmp.insert(depth, Vec::new());
        }

        loop {
            // find the depth holding the candidate with the lowest count
            let mut best_depth = None;
            for (&d, list) in lists.iter() {
                if let Some(&(count, _, _)) = list.front() {
                    match best_depth {
                        None => best_depth = Some((d, count)),
                        Some((_, best_count)) if count < best_count => {
                            best_depth = Some((d, count))
                        }
                        _ => {}
                    }
                }
            }
            let depth = match best_depth {
                Some((d, _)) => d,
                None => break,
            };
            let (count, from_node, to_node) = match lists.get(&depth).and_then(|l| l.front()) {
                Some(&edge) => edge,
                None => break,
            };

            let (occupied, target_bits) = match self.mappings.get(&depth_targeted) {
                Some(m) => (m.occupied(), m.nb_bits()),
                None => break,
            };
            let half_capacity = if target_bits == 0 { 0 } else { 1usize << (target_bits - 1) };
            if occupied > half_capacity {
                overhead += self.remove(depth, from_node, to_node, g);
            } else if self
                .encoded_aslinks
                .get(&depth)
                .map(|links| links.contains(&(from_node, to_node)))
                .unwrap_or(false)
            {
                minimum_tmp.entry(depth).or_default().push(count as f64);
            }

            if let Some(list) = lists.get_mut(&depth) {
                list.pop_front();
            }
        }

        for (depth, mut counts) in minimum_tmp {
            if !counts.is_empty() {
                self.minimum.insert(depth, percentile(&mut counts, self.min_percentile));
            }
        }

        self.write_status("AR", &overhead.to_string());
        overhead
    }

    /// Returns `true` if the edge is encoded at the given depth. Depth 1 is the peer link
    /// itself; it is considered encoded as soon as the destination AS is encoded at depth 2.
    pub fn is_encoded(&self, depth: usize, from_as: u32, to_as: u32) -> bool {
        if depth == 1 {
            self.mappings.get(&2).map(|m| m.contains(to_as)).unwrap_or(false)
        } else {
            self.encoded_aslinks
                .get(&depth)
                .map(|links| links.contains(&(from_as, to_as)))
                .unwrap_or(false)
        }
    }

    /// Walk an AS path for the first occurrence of the edge (from_as, to_as) and report whether
    /// the edge is encoded at that position, together with the position itself. `None` when the
    /// path does not traverse the edge.
    pub fn prefix_is_encoded(
        &self,
        aspath: &[u32],
        from_as: u32,
        to_as: u32,
    ) -> Option<(bool, usize)> {
        for i in 0..aspath.len().saturating_sub(1) {
            if aspath[i] == from_as && aspath[i + 1] == to_as {
                return Some((self.is_encoded(i + 1, from_as, to_as), i + 1));
            }
        }
        warn!("path {:?} does not traverse the predicted edge ({}, {})", aspath, from_as, to_as);
        None
    }

    /// Build the AS-path part of a prefix tag: the concatenated codes of the path elements at
    /// their depths, zero-padded to the full tag width.
    pub fn build_vmac(&self, aspath: &[u32]) -> String {
        let mut vmac = String::with_capacity(self.max_bits);
        for (i, &asn) in aspath.iter().enumerate() {
            if let Some(m) = self.mappings.get(&(i + 1)) {
                vmac.push_str(&m.get_mapping_string(asn));
            }
        }
        while vmac.len() < self.max_bits {
            vmac.push('0');
        }
        vmac
    }

    fn write_debug(&mut self, line: &str) {
        if let Some(out) = self.status_out.as_mut() {
            let _ = writeln!(out, "{}", line);
        }
    }

    fn write_status(&mut self, prefix: &str, suffix: &str) {
        if self.status_out.is_none() {
            return;
        }
        let mut line = format!("{}|", prefix);
        for (&depth, m) in self.mappings.iter() {
            if depth > 1 {
                if m.nb_bits() > 0 {
                    line.push_str(&format!("{}/{}|", m.occupied(), 1u64 << m.nb_bits()));
                } else {
                    line.push_str("0/0|");
                }
            }
        }
        line.push_str(suffix);
        self.write_debug(&line);
    }
}

/// The `p`-th percentile of a sample, with linear interpolation between the closest ranks.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }
    let rank = p / 100.0 * (values.len() - 1) as f64;
    let low = rank.floor() as usize;
    let frac = rank - low as f64;
    if low + 1 < values.len() {
        values[low] + frac * (values[low + 1] - values[low])
    } else {
        values[low]
    }
}
