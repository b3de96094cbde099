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

//! Module containing all error types

use crate::bgp::ParseError;
use crate::bpa::PredictionError;
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// A feed line could not be parsed into a BGP record. The record is logged and skipped.
    #[error("Parse Error: {0}")]
    ParseError(#[from] ParseError),
    /// The burst predictor could not produce a prediction for this cycle. The burst continues.
    #[error("Prediction Error: {0}")]
    PredictionError(#[from] PredictionError),
    /// Any I/O error (sockets, burst logs, encoding status files)
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    /// The requested burst prediction algorithm does not exist.
    #[error("Unknown burst prediction algorithm: {0}")]
    UnknownAlgorithm(String),
    /// The maximum number of concurrently tracked peers is reached. The new peer is refused.
    #[error("Cannot accept new peers, limit ({0}) reached")]
    PeerLimitReached(usize),
}
