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

use crate::encoding::{percentile, AddOutcome, Encoding, Mapping};
use crate::topology::AsTopology;
use assert_approx_eq::assert_approx_eq;

fn new_encoding(max_bits: usize) -> Encoding {
    let dir = tempfile::tempdir().unwrap();
    Encoding::new("rrc00-1.2.3.4", dir.path(), max_bits, 5.0, false).unwrap()
}

// the topology of the encoding scenario: one dominant depth-2 edge (2, 3), two smaller ones,
// and one depth-3 edge
fn scenario_topology() -> AsTopology {
    let mut g = AsTopology::new(1, true);
    for _ in 0..50 {
        g.add(&[1, 2, 3], None);
    }
    for _ in 0..30 {
        g.add(&[1, 2, 4], None);
    }
    for _ in 0..20 {
        g.add(&[1, 5, 3], None);
    }
    for _ in 0..10 {
        g.add(&[1, 2, 3, 6], None);
    }
    g
}

#[test]
fn mapping_grows_on_demand() {
    let mut m = Mapping::new();
    assert_eq!(m.nb_bits(), 0);

    // the first insertion claims the reserved code and over-provisions
    assert_eq!(m.add(65001, true, true), AddOutcome::Inserted(2));
    assert_eq!(m.nb_bits(), 2);
    assert!(m.contains(65001));

    assert_eq!(m.add(65001, true, true), AddOutcome::Bumped);
}

#[test]
fn mapping_codes_are_distinct_and_never_zero() {
    let mut m = Mapping::new();
    let asns: Vec<u32> = (1..=8).collect();
    for &asn in &asns {
        m.add(asn, true, true);
    }

    let mut seen = std::collections::HashSet::new();
    for &asn in &asns {
        let code = m.code(asn).unwrap();
        assert_ne!(code, 0, "code 0 is reserved for unencoded ASes");
        assert!(seen.insert(code), "codes must be pairwise distinct");
    }
}

#[test]
fn mapping_string_round_trips() {
    let mut m = Mapping::new();
    for asn in 1..=5u32 {
        m.add(asn, true, true);
    }
    for asn in 1..=5u32 {
        let bits = m.get_mapping_string(asn);
        assert_eq!(bits.len(), m.nb_bits());
        assert_eq!(u32::from_str_radix(&bits, 2).unwrap(), m.code(asn).unwrap());
    }
    assert_eq!(m.get_mapping_string(999), "0".repeat(m.nb_bits()));
}

#[test]
fn mapping_is_available_counts_the_missing_bits() {
    let m = Mapping::new();
    // from width 0 the first bit also claims the reserved code
    assert_eq!(m.is_available(1, true, 0), 2);

    let mut m = Mapping::new();
    m.add(1, true, true);
    assert_eq!(m.is_available(1, true, 0), 0);
    // width 2 with one AS encoded: {2, 3} are free, no growth needed
    assert_eq!(m.is_available(2, false, 0), 0);
}

#[test]
fn mapping_release_returns_the_code() {
    let mut m = Mapping::new();
    m.add(1, true, true);
    let free_before = m.free_len();

    m.add(1, false, true);
    assert!(!m.remove(1, true), "still referenced as a destination");
    assert!(m.remove(1, false), "last reference released");
    assert!(!m.contains(1));
    assert_eq!(m.free_len(), free_before + 1);
}

#[test]
fn blocked_mapping_refuses_growth() {
    let mut m = Mapping::new();
    m.add(1, true, true);
    m.block();
    // {2, 3} are still free, so insertions without over-provisioning succeed
    assert_eq!(m.add(2, true, false), AddOutcome::Inserted(0));
    assert_eq!(m.add(3, true, false), AddOutcome::Inserted(0));
    assert_eq!(m.add(4, true, false), AddOutcome::Blocked);
}

#[test]
fn compute_encoding_respects_the_budget() {
    let g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);

    // after the +1 boost to depths 2 and 3, the hard ceiling is max_bits
    let total: usize = encoding.mappings().map(|(_, m)| m.nb_bits()).sum();
    assert!(total <= 8);

    // both critical depths got at least one bit
    assert!(encoding.mapping(2).unwrap().nb_bits() >= 1);
    assert!(encoding.mapping(3).unwrap().nb_bits() >= 1);
}

#[test]
fn compute_encoding_keeps_the_heaviest_edge() {
    let g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);

    // (2, 3) carries the most prefixes at depth 2
    assert!(encoding.is_encoded(2, 2, 3));
    // the peer link is encoded as soon as its destination is known at depth 2
    assert!(encoding.is_encoded(1, 1, 2));
}

#[test]
fn prefix_is_encoded_reports_the_depth() {
    let g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);

    let (encoded, depth) = encoding.prefix_is_encoded(&[1, 2, 3], 2, 3).unwrap();
    assert!(encoded);
    assert_eq!(depth, 2);

    assert!(encoding.prefix_is_encoded(&[1, 2, 3], 7, 8).is_none());
}

#[test]
fn advertisement_with_the_same_path_is_a_no_op() {
    let g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);

    let before: Vec<(usize, usize, usize)> =
        encoding.mappings().map(|(d, m)| (d, m.nb_bits(), m.occupied())).collect();
    let vmac_before = encoding.build_vmac(&[1, 2, 3]);

    encoding.advertisement(&[1, 2, 3], &[1, 2, 3], &g);

    let after: Vec<(usize, usize, usize)> =
        encoding.mappings().map(|(d, m)| (d, m.nb_bits(), m.occupied())).collect();
    assert_eq!(before, after);
    assert_eq!(encoding.build_vmac(&[1, 2, 3]), vmac_before);
}

#[test]
fn build_vmac_is_padded_to_the_tag_width() {
    let g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);

    let vmac = encoding.build_vmac(&[1, 2, 3]);
    assert_eq!(vmac.len(), 8);
    assert!(vmac.chars().all(|c| c == '0' || c == '1'));

    // an unencoded path yields the all-zero tag
    assert_eq!(encoding.build_vmac(&[41, 42, 43]), "0".repeat(8));
}

#[test]
fn withdraw_removes_only_unused_links() {
    let mut g = scenario_topology();
    let mut encoding = new_encoding(8);
    encoding.compute_encoding(&g);
    assert!(encoding.is_encoded(2, 2, 3));

    // the link is still used by other prefixes: withdrawing one path must keep it
    g.remove(&[1, 2, 3], None);
    encoding.withdraw(&[1, 2, 3], &g);
    assert!(encoding.is_encoded(2, 2, 3));

    // drop every remaining path over (2, 3) at depth 2
    for _ in 0..49 {
        g.remove(&[1, 2, 3], None);
    }
    for _ in 0..10 {
        g.remove(&[1, 2, 3, 6], None);
    }
    encoding.withdraw(&[1, 2, 3], &g);
    assert!(!encoding.is_encoded(2, 2, 3));
}

#[test]
fn percentile_interpolates_linearly() {
    let mut values = vec![20.0, 30.0, 60.0];
    assert_approx_eq!(percentile(&mut values, 5.0), 21.0);
    assert_approx_eq!(percentile(&mut values, 0.0), 20.0);
    assert_approx_eq!(percentile(&mut values, 100.0), 60.0);
    assert_approx_eq!(percentile(&mut vec![42.0], 5.0), 42.0);
}
