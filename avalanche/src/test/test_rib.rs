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

use crate::rib::RibPeer;

#[test]
fn update_returns_the_displaced_path() {
    let mut rib = RibPeer::new();

    assert!(rib.update("8.8.8.0/24", &[1, 2, 3]).is_empty());
    assert_eq!(rib.update("8.8.8.0/24", &[1, 2, 4]), vec![1, 2, 3]);
    assert_eq!(rib.get("8.8.8.0/24"), Some(&vec![1, 2, 4]));
    assert_eq!(rib.len(), 1);
}

#[test]
fn withdraw_returns_the_last_known_path() {
    let mut rib = RibPeer::new();
    rib.update("8.8.8.0/24", &[1, 2, 3]);

    assert_eq!(rib.withdraw("8.8.8.0/24"), vec![1, 2, 3]);
    assert!(rib.withdraw("8.8.8.0/24").is_empty());
    assert!(rib.is_empty());
}

#[test]
fn update_then_withdraw_restores_the_rib() {
    let mut rib = RibPeer::new();
    rib.update("8.8.8.0/24", &[1, 2, 3]);

    rib.update("9.9.9.0/24", &[5, 6]);
    rib.withdraw("9.9.9.0/24");

    assert_eq!(rib.len(), 1);
    assert_eq!(rib.get("8.8.8.0/24"), Some(&vec![1, 2, 3]));
    assert_eq!(rib.get("9.9.9.0/24"), None);
}
