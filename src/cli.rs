//! Command-line surface (§6 "CLI").

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;

/// Bridge a Samsung EHS heat pump's NASA bus to MQTT, with Home Assistant
/// auto-discovery.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the bridge's YAML configuration file.
    #[arg(long)]
    pub configfile: PathBuf,

    /// Replay source in --dryrun, or capture sink for traffic otherwise.
    #[arg(long)]
    pub dumpfile: Option<PathBuf>,

    /// Consume frames from --dumpfile instead of opening a transport.
    #[arg(long, requires = "dumpfile")]
    pub dryrun: bool,

    /// Clear the retained known-devices topic on startup and exit.
    #[arg(long)]
    pub clean_known_devices: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}
