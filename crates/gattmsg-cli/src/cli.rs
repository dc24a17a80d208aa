//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exchange text messages over a BLE GATT characteristic", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Scan and list nearby peripherals
    Scan {
        /// How long to scan
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Connect to a peripheral and exchange messages from stdin
    Chat {
        /// Peer id as printed by `scan`
        peer_id: String,
        /// How long to look for the peer before giving up
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Publish the messenger service, echo every message back and send
    /// stdin lines to subscribers
    Serve,
}
