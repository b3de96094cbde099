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

//! The server listening for BGP records and predicting the prefixes affected by remote
//! failures.

use avalanche::bpa::BpaAlgorithm;
use avalanche::{server, Settings};

use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

/// The burst prediction algorithm selectable on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    /// Aggregate the outgoing edges of the peer ASes.
    Naive,
    /// The best single edge.
    #[value(name = "bpa-single")]
    BpaSingle,
    /// Greedy forward and backward search.
    #[value(name = "bpa-multiple")]
    BpaMultiple,
}

impl From<Algorithm> for BpaAlgorithm {
    fn from(algo: Algorithm) -> Self {
        match algo {
            Algorithm::Naive => BpaAlgorithm::Naive,
            Algorithm::BpaSingle => BpaAlgorithm::Single,
            Algorithm::BpaMultiple => BpaAlgorithm::Multiple,
        }
    }
}

/// This is the server listening for bgp messages.
#[derive(Debug, Parser)]
#[command(name = "avalanche")]
struct Arguments {
    /// Server port
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Size of the window (seconds)
    #[arg(long = "win_size", default_value_t = 10)]
    win_size: u64,

    /// Number of withdrawals within the window required to start and to end a burst, separated
    /// by a comma
    #[arg(long = "start_stop", default_value = "1500,9")]
    start_stop: String,

    /// Minimum burst size required to execute BPA
    #[arg(long = "min_burst_size", default_value_t = 2500)]
    min_burst_size: usize,

    /// BPA execution frequency (in number of withdrawals)
    #[arg(long = "bpa_freq", default_value_t = 2500)]
    bpa_freq: usize,

    /// Weight on the precision when computing the FM score
    #[arg(long = "p_w", default_value_t = 1.0)]
    p_w: f64,

    /// Weight on the recall when computing the FM score
    #[arg(long = "r_w", default_value_t = 3.0)]
    r_w: f64,

    /// Algorithm used for the prediction
    #[arg(long = "bpa_algo", value_enum, default_value = "bpa-multiple")]
    bpa_algo: Algorithm,

    /// Number of bits reserved for the AS path compression
    #[arg(long = "nb_bits_aspath", default_value_t = 28)]
    nb_bits_aspath: usize,

    /// Number of bits reserved for each nexthop (primary or backup)
    #[arg(long = "nb_bits_nexthop", default_value_t = 3)]
    nb_bits_nexthop: usize,

    /// Compute the encoding after this amount of routes received (the encoding is always
    /// computed when the first withdrawal arrives)
    #[arg(long = "run_encoding_threshold", default_value_t = 1_000_000)]
    run_encoding_threshold: usize,

    /// Do not maintain the global RIB. Useful to only test BPA or the encoding
    #[arg(long = "no_rib")]
    no_rib: bool,

    /// Run the ground-truth-only validation pipeline instead of the full one
    #[arg(long = "bpa_validation")]
    bpa_validation: bool,

    /// Do not write per-burst information, making the pipeline as fast as possible
    #[arg(long)]
    silent: bool,

    /// Directory where to store information about the burst predictions
    #[arg(long = "bursts_dir", default_value = "bursts")]
    bursts_dir: PathBuf,

    /// Directory where to store the logs
    #[arg(long = "log_dir", default_value = "log")]
    log_dir: PathBuf,
}

fn init_logger(log_dir: &PathBuf) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(log_dir)?;

    let pattern = "{d(%Y-%m-%d %H:%M:%S)} :: {l} :: {m}{n}";
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let roller = FixedWindowRoller::builder()
        .build(log_dir.join("main.{}.log").to_string_lossy().as_ref(), 5)?;
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(200_000_000)),
        Box::new(roller),
    );
    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(log_dir.join("main"), Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("console")
                .appender("file")
                .build(LevelFilter::Info),
        )?;
    log4rs::init_config(config)?;
    Ok(())
}

fn parse_start_stop(start_stop: &str) -> Result<(usize, usize), Box<dyn Error>> {
    let mut parts = start_stop.split(',');
    let start = parts
        .next()
        .ok_or("missing burst start threshold")?
        .trim()
        .parse::<usize>()?;
    let stop = parts
        .next()
        .ok_or("missing burst end threshold")?
        .trim()
        .parse::<usize>()?;
    Ok((start, stop))
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Arguments::parse();

    init_logger(&args.log_dir)?;

    let (burst_start, burst_end) = parse_start_stop(&args.start_stop)?;

    let settings = Settings {
        port: args.port,
        win_size: args.win_size,
        burst_start,
        burst_end,
        min_bpa_burst_size: args.min_burst_size,
        bpa_freq: args.bpa_freq,
        p_w: args.p_w,
        r_w: args.r_w,
        bpa_algo: args.bpa_algo.into(),
        nb_bits_aspath: args.nb_bits_aspath,
        nb_bits_nexthop: args.nb_bits_nexthop,
        run_encoding_threshold: args.run_encoding_threshold,
        global_rib_enabled: !args.no_rib,
        bpa_validation: args.bpa_validation,
        silent: args.silent,
        bursts_dir: args.bursts_dir,
        log_dir: args.log_dir,
        rib_socket: Settings::rib_socket_for_port(args.port),
        ..Settings::default()
    };

    // orderly teardown on SIGINT / SIGTERM
    ctrlc::set_handler(|| {
        info!("Received SIGINT. Exiting.");
        std::process::exit(1);
    })?;

    server::run(settings)?;
    Ok(())
}
