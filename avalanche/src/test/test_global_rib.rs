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

use crate::global_rib::{BgpRoute, RibGlobal};
use crate::rib_service::{parse_command, RibCommand};
use std::cmp::Ordering;

const PREFIX: &str = "1.0.0.0/24";

fn route(peer_ip: &str, as_path: Vec<u32>) -> BgpRoute {
    BgpRoute::new(PREFIX, peer_ip, as_path, "")
}

#[test]
fn shorter_paths_sort_first() {
    let short = route("2.1.1.1", vec![12, 13, 14]);
    let long = route("1.1.1.1", vec![12, 13, 14, 15]);
    assert_eq!(short.cmp(&long), Ordering::Less);
    assert_eq!(long.cmp(&short), Ordering::Greater);
}

#[test]
fn peer_ip_breaks_length_ties() {
    let a = route("1.1.1.1", vec![12, 20, 14]);
    let b = route("2.1.1.1", vec![12, 13, 14]);
    assert_eq!(a.cmp(&b), Ordering::Less);
}

#[test]
fn elementwise_compare_prefers_the_smaller_earlier_as() {
    let a = route("1.1.1.1", vec![12, 13, 14]);
    let b = route("1.1.1.1", vec![12, 20, 14]);
    assert_eq!(a.cmp(&b), Ordering::Less);
    assert_eq!(b.cmp(&a), Ordering::Greater);
}

#[test]
fn equal_length_distinct_paths_are_not_equal() {
    let a = route("1.1.1.1", vec![12, 13, 14]);
    let b = route("1.1.1.1", vec![12, 13, 15]);
    assert_ne!(a, b);
    assert_ne!(a.cmp(&b), Ordering::Equal);

    let same = route("1.1.1.1", vec![12, 13, 14]);
    assert_eq!(a, same);
    assert_eq!(a.cmp(&same), Ordering::Equal);
}

#[test]
fn announce_orders_primary_and_backup() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    rib.announce(route("2.1.1.1", vec![12, 20, 15, 14]));
    let change = rib.announce(route("3.1.1.1", vec![12, 13, 34, 14, 15, 67, 6]));

    assert_eq!(change.new_primary.unwrap().peer_ip, "1.1.1.1");
    assert_eq!(rib.primary(PREFIX).unwrap().peer_ip, "1.1.1.1");
    assert_eq!(rib.backup(PREFIX).unwrap().peer_ip, "2.1.1.1");
}

#[test]
fn announce_replaces_the_previous_route_of_the_peer() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    let change = rib.announce(route("1.1.1.1", vec![12, 13, 14, 15]));

    assert_eq!(change.peer_route.unwrap().as_path, vec![12, 13, 14]);
    assert_eq!(rib.routes(PREFIX).unwrap().len(), 1);
    assert_eq!(rib.primary(PREFIX).unwrap().as_path, vec![12, 13, 14, 15]);
}

#[test]
fn withdraw_promotes_the_backup() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    rib.announce(route("2.1.1.1", vec![12, 20, 15, 14]));

    let change = rib.withdraw("1.1.1.1", PREFIX);
    assert_eq!(change.previous_primary.unwrap().peer_ip, "1.1.1.1");
    assert_eq!(change.new_primary.unwrap().peer_ip, "2.1.1.1");
    assert_eq!(change.peer_route.unwrap().peer_ip, "1.1.1.1");

    let change = rib.withdraw("2.1.1.1", PREFIX);
    assert!(change.new_primary.is_none());
    assert!(rib.routes(PREFIX).is_none());
}

#[test]
fn withdraw_of_an_unknown_route_changes_nothing() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));

    let change = rib.withdraw("9.9.9.9", PREFIX);
    assert!(change.peer_route.is_none());
    assert!(change.previous_primary.is_none());
    assert_eq!(rib.routes(PREFIX).unwrap().len(), 1);
}

#[test]
fn backup_avoiding_an_as_link() {
    let mut rib = RibGlobal::new();
    // the full announcement sequence, with the same peer re-announcing several times
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    rib.announce(route("1.1.1.1", vec![12, 13, 14, 15]));
    rib.announce(route("2.1.1.1", vec![12, 20, 15, 14]));
    rib.announce(route("3.1.1.1", vec![12, 13, 34, 14, 15, 67, 6]));
    rib.announce(route("3.1.1.1", vec![12, 13, 12, 15, 14]));
    rib.announce(route("3.1.1.1", vec![49, 13, 34, 45, 56, 15687, 6, 16, 14]));

    // 3.1.1.1 is the only alternate whose path avoids (15, 14) in both directions
    let backup = rib.get_backup_avoiding_aslink("1.1.1.1", PREFIX, (15, 14), false).unwrap();
    assert_eq!(backup.peer_ip, "3.1.1.1");

    // the traditional selection just returns the best alternate
    let backup = rib.get_backup_avoiding_aslink("1.1.1.1", PREFIX, (15, 14), true).unwrap();
    assert_eq!(backup.peer_ip, "2.1.1.1");
}

#[test]
fn backup_falls_back_when_every_alternate_contains_the_link() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    rib.announce(route("2.1.1.1", vec![12, 20, 15, 14]));
    rib.announce(route("3.1.1.1", vec![12, 13, 34, 14, 15, 67, 6]));

    // both alternates traverse (15, 14) or (14, 15): the best alternate wins
    let backup = rib.get_backup_avoiding_aslink("1.1.1.1", PREFIX, (15, 14), false).unwrap();
    assert_eq!(backup.peer_ip, "2.1.1.1");
}

#[test]
fn backup_availability() {
    let mut rib = RibGlobal::new();
    rib.announce(route("1.1.1.1", vec![12, 13, 14]));
    assert!(rib.backup_available(PREFIX, "1.1.1.1"));
    assert!(!rib.backup_available(PREFIX, "2.1.1.1"));
    assert!(!rib.backup_available("9.0.0.0/24", "1.1.1.1"));
}

#[test]
fn traverses_link_checks_both_directions() {
    let r = route("1.1.1.1", vec![12, 13, 14, 15]);
    assert!(r.traverses_link((13, 14)));
    assert!(r.traverses_link((14, 13)));
    assert!(!r.traverses_link((12, 14)));
}

#[test]
fn parse_peer_egress_lines() {
    assert_eq!(
        parse_command("1.2.3.4|8.8.8.0/24|1452648349|13030 2914 15169|0010010000").unwrap(),
        RibCommand::Advertisement {
            peer_ip: "1.2.3.4".to_string(),
            prefix: "8.8.8.0/24".to_string(),
            ts: 1452648349.0,
            as_path: vec![13030, 2914, 15169],
            vmac: "0010010000".to_string(),
        }
    );
    assert_eq!(
        parse_command("1.2.3.4|8.8.8.0/24|1452648349").unwrap(),
        RibCommand::Withdrawal {
            peer_ip: "1.2.3.4".to_string(),
            prefix: "8.8.8.0/24".to_string(),
            ts: 1452648349.0,
        }
    );
    assert_eq!(
        parse_command("FR|1.2.3.4|00100100|11111100|2|1452648349").unwrap(),
        RibCommand::FastReroute {
            peer_ip: "1.2.3.4".to_string(),
            vmac: "00100100".to_string(),
            bitmask: "11111100".to_string(),
            depth: 2,
            ts: 1452648349,
        }
    );
    assert!(parse_command("1.2.3.4").is_err());
}
