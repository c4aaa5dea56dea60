//! Command-line interface definitions and parsing

use clap::{Args, Parser, Subcommand, ValueEnum};
use rollcall_ble::BeaconScheme;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print results and events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Beacon naming scheme (overrides the configuration file)
    #[arg(long, value_enum)]
    pub scheme: Option<SchemeArg>,
}

/// Subject identity; falls back to the `[identity]` section of the configuration
#[derive(Args, Debug, Clone, Default)]
pub struct IdentityArgs {
    /// Subject id broadcast in the beacon
    #[arg(long)]
    pub id: Option<String>,

    /// Human-readable subject label
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Advertise the attendance beacon until interrupted
    Advertise {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Scan for the classroom receiver
    FindReceiver {
        /// Scan timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Check in to the receiver once found
        #[arg(long)]
        check_in: bool,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// List every nearby device (diagnostic)
    ScanAll {
        /// Scan window in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Write the subject id to a known receiver
    CheckIn {
        /// Receiver device id as reported by find-receiver or scan-all
        #[arg(long)]
        device: String,
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Show radio state and permissions
    Status,
    /// Print an example configuration file, or write it to a path
    ExampleConfig {
        /// Write the example here instead of printing it
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeArg {
    /// STUDENT_<id>, connectable, subject id in manufacturer data
    Student,
    /// ATT_<id>, scan-only
    Attendance,
}

impl From<SchemeArg> for BeaconScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Student => BeaconScheme::Student,
            SchemeArg::Attendance => BeaconScheme::Attendance,
        }
    }
}
