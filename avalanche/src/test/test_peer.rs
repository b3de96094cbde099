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

use crate::bgp::{BgpMessage, Dialect, MessageType};
use crate::config::Settings;
use crate::peer::Peer;
use tempfile::TempDir;

const PEER: &str = "rrc00-1.2.3.4";

fn announcement(prefix: &str, time: f64, as_path: Vec<u32>) -> BgpMessage {
    BgpMessage {
        mtype: MessageType::Announcement,
        peer_id: PEER.to_string(),
        peer_as: as_path.first().copied(),
        time,
        prefix: Some(prefix.to_string()),
        as_path,
        dialect: Dialect::Bgp4mp,
    }
}

fn withdrawal(prefix: &str, time: f64) -> BgpMessage {
    BgpMessage {
        mtype: MessageType::Withdrawal,
        peer_id: PEER.to_string(),
        peer_as: Some(1),
        time,
        prefix: Some(prefix.to_string()),
        as_path: Vec::new(),
        dialect: Dialect::Bgp4mp,
    }
}

// a small-threshold setup writing everything below a temporary directory
fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        burst_start: 2,
        burst_end: 1,
        win_size: 10,
        min_bpa_burst_size: 2500,
        run_encoding_threshold: 1_000_000,
        global_rib_enabled: false,
        bursts_dir: dir.path().join("bursts"),
        encoding_dir: dir.path().join("encoding"),
        log_dir: dir.path().join("log"),
        ..Settings::default()
    }
}

fn test_peer(dir: &TempDir) -> Peer {
    let settings = test_settings(dir);
    std::fs::create_dir_all(&settings.bursts_dir).unwrap();
    Peer::new(&announcement("8.8.8.0/24", 0.0, vec![1, 2, 3]), settings)
}

#[test]
fn announcements_fill_the_rib_and_the_topology() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    peer.handle_message(announcement("9.9.9.0/24", 0.0, vec![1, 2, 4])).unwrap();

    assert_eq!(peer.rib.len(), 2);
    assert_eq!(peer.g.prefix_counter(1, 2), 2.0);
    assert_eq!(peer.g.prefix_counter(2, 3), 1.0);
    assert!(peer.burst.is_none());
}

#[test]
fn a_replacement_route_displaces_the_old_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    peer.handle_message(announcement("8.8.8.0/24", 1.0, vec![1, 5, 3])).unwrap();

    assert_eq!(peer.rib.get("8.8.8.0/24"), Some(&vec![1, 5, 3]));
    assert!(!peer.g.contains_edge(1, 2));
    assert_eq!(peer.g.prefix_counter(1, 5), 1.0);
}

#[test]
fn two_windowed_withdrawals_start_a_burst() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    peer.handle_message(announcement("9.9.9.0/24", 0.0, vec![1, 2, 4])).unwrap();
    peer.handle_message(withdrawal("8.8.8.0/24", 0.0)).unwrap();
    assert!(peer.burst.is_none());

    peer.handle_message(withdrawal("9.9.9.0/24", 1.0)).unwrap();

    let burst = peer.burst.as_ref().expect("the burst must start at the second withdrawal");
    assert_eq!(burst.start_time, 1);
    assert_eq!(peer.w_queue.len(), 2);

    // both withdrawn paths moved into the withdrawal graph
    assert_eq!(peer.g_w.prefix_counter(1, 2), 2.0);
    assert_eq!(peer.g_w.prefix_counter(2, 3), 1.0);
    assert_eq!(peer.g_w.prefix_counter(2, 4), 1.0);
    // and left the main one
    assert_eq!(peer.g.edge_count(), 0);
}

#[test]
fn the_first_withdrawal_initializes_the_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    assert!(peer.encoding.is_none());

    peer.handle_message(withdrawal("8.8.8.0/24", 0.0)).unwrap();
    assert!(peer.encoding.is_some());
}

#[test]
fn unresolved_withdrawals_do_not_enter_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(withdrawal("6.6.6.0/24", 0.0)).unwrap();
    peer.handle_message(withdrawal("6.6.7.0/24", 1.0)).unwrap();

    assert_eq!(peer.w_queue.len(), 0);
    assert!(peer.burst.is_none());
}

#[test]
fn the_burst_closes_when_the_window_drains() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    peer.handle_message(announcement("9.9.9.0/24", 0.0, vec![1, 2, 4])).unwrap();
    peer.handle_message(withdrawal("8.8.8.0/24", 0.0)).unwrap();
    peer.handle_message(withdrawal("9.9.9.0/24", 1.0)).unwrap();
    assert!(peer.burst.is_some());

    // a quiet announcement twenty seconds later drains the window tick by tick
    peer.handle_message(announcement("7.7.7.0/24", 20.0, vec![7, 8])).unwrap();

    assert!(peer.burst.is_none());
    // the kept withdrawals were removed from the withdrawal graph on close
    assert_eq!(peer.g_w.edge_count(), 0);

    let predicted = std::fs::read_to_string(
        dir.path().join("bursts").join(format!("{}_1_predicted", PEER)),
    )
    .unwrap();
    assert!(predicted.contains("PREDICTION_END|bpa-multiple|0|1|-1|-1|-1"));
    assert!(predicted.contains("PREDICTION_END_EDGE|1-2,2-3,2-4|1"));

    let info =
        std::fs::read_to_string(dir.path().join("bursts").join("bursts_info")).unwrap();
    assert_eq!(info.lines().count(), 1);
}

#[test]
fn close_terminates_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut peer = test_peer(&dir);

    peer.handle_message(announcement("8.8.8.0/24", 0.0, vec![1, 2, 3])).unwrap();
    let keep_running = peer
        .handle_message(BgpMessage {
            mtype: MessageType::Close,
            peer_id: PEER.to_string(),
            peer_as: Some(1),
            time: 5.0,
            prefix: None,
            as_path: Vec::new(),
            dialect: Dialect::Bgp4mp,
        })
        .unwrap();
    assert!(!keep_running);
}

#[test]
fn peer_as_is_corrected_from_the_first_path() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(&dir);
    std::fs::create_dir_all(&settings.bursts_dir).unwrap();

    let mut first = announcement("8.8.8.0/24", 0.0, vec![65001, 2, 3]);
    first.peer_as = Some(13030);
    let peer = Peer::new(&first, settings);
    assert_eq!(peer.peer_as, 65001);
    assert_eq!(peer.peer_ip, "1.2.3.4");
}
