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

use crate::bgp::{BgpMessage, Dialect, MessageQueue, MessageType};
use crate::burst::Burst;
use crate::topology::AsTopology;
use maplit::btreeset;
use std::fs;

fn withdrawal(prefix: &str, time: f64, as_path: Vec<u32>) -> BgpMessage {
    BgpMessage {
        mtype: MessageType::Withdrawal,
        peer_id: "rrc00-1.2.3.4".to_string(),
        peer_as: Some(13030),
        time,
        prefix: Some(prefix.to_string()),
        as_path,
        dialect: Dialect::Bgp4mp,
    }
}

fn window() -> MessageQueue {
    let mut queue = MessageQueue::new(10);
    queue.push(withdrawal("8.8.8.0/24", 100.0, vec![1, 2, 3]));
    queue.push(withdrawal("9.9.9.0/24", 101.0, vec![1, 2, 4]));
    queue
}

#[test]
fn burst_dumps_the_window_into_the_ground_truth() {
    let dir = tempfile::tempdir().unwrap();
    let burst = Burst::new("rrc00-1.2.3.4", 101.0, 10, dir.path(), &window(), false).unwrap();
    burst.stop().unwrap();

    let real = fs::read_to_string(dir.path().join("rrc00-1.2.3.4_101_real")).unwrap();
    let mut lines = real.lines();
    assert_eq!(lines.next(), Some("# Started burst!"));
    assert_eq!(lines.next(), Some("#100thTS\t100"));
    assert_eq!(lines.next(), Some("8.8.8.0/24|100|B|1 2 3"));
    assert_eq!(lines.next(), Some("9.9.9.0/24|101|B|1 2 4"));
}

#[test]
fn burst_summary_is_appended_on_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut burst =
        Burst::new("rrc00-1.2.3.4", 101.0, 10, dir.path(), &window(), false).unwrap();
    burst
        .add_real_prefix(102.0, "7.7.7.0/24", MessageType::Withdrawal, &[1, 2, 5])
        .unwrap();
    burst.last_ts = 105;
    burst.stop().unwrap();

    let info = fs::read_to_string(dir.path().join("bursts_info")).unwrap();
    assert_eq!(info.trim_end(), "rrc00-1.2.3.4\t101\t105\t10\t1\t100");
}

#[test]
fn real_withdrawals_are_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut burst =
        Burst::new("rrc00-1.2.3.4", 101.0, 10, dir.path(), &window(), false).unwrap();

    burst
        .add_real_prefix(102.0, "7.7.7.0/24", MessageType::Withdrawal, &[1, 2, 5])
        .unwrap();
    burst
        .add_real_prefix(103.0, "7.7.7.0/24", MessageType::Withdrawal, &[1, 2, 5])
        .unwrap();
    assert_eq!(burst.uniq_withdrawals(), 1);
    burst.stop().unwrap();

    let real = fs::read_to_string(dir.path().join("rrc00-1.2.3.4_101_real")).unwrap();
    let withdrawal_lines =
        real.lines().filter(|l| l.contains("7.7.7.0/24")).count();
    assert_eq!(withdrawal_lines, 1);
}

#[test]
fn predicted_prefixes_enter_the_set_only_when_reroutable() {
    let dir = tempfile::tempdir().unwrap();
    let mut burst =
        Burst::new("rrc00-1.2.3.4", 101.0, 10, dir.path(), &window(), false).unwrap();

    burst.add_predicted_prefix(102.0, "8.8.8.0/24", true, 2).unwrap();
    burst.add_predicted_prefix(102.0, "9.9.9.0/24", false, 2).unwrap();
    assert!(burst.predicted_prefixes.contains("8.8.8.0/24"));
    assert!(!burst.predicted_prefixes.contains("9.9.9.0/24"));
    burst.stop().unwrap();

    let predicted =
        fs::read_to_string(dir.path().join("rrc00-1.2.3.4_101_predicted")).unwrap();
    assert!(predicted.contains("PREFIX|8.8.8.0/24|102|0|Y|2"));
    assert!(predicted.contains("PREFIX|9.9.9.0/24|102|0|N|2"));
}

#[test]
fn new_edges_are_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut burst =
        Burst::new("rrc00-1.2.3.4", 101.0, 10, dir.path(), &window(), false).unwrap();

    let mut g_w = AsTopology::new(1, true);
    g_w.add(&[1, 2, 3], None);

    let edges = btreeset! {(1, 2), (2, 3)};
    let first = burst.add_edges(102.0, &edges, &g_w).unwrap();
    assert_eq!(first, vec![(1, 2), (2, 3)]);

    let second = burst.add_edges(103.0, &edges, &g_w).unwrap();
    assert!(second.is_empty());

    assert_eq!(burst.as_edges, edges);
    burst.stop().unwrap();
}
