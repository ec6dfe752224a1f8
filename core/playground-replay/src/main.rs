//! playground-replay: drives a panel from a recorded transcript.
//!
//! Reads host envelopes, user actions and clock ticks (see [`transcript`]),
//! feeds them through one [`playground_core::Panel`] and writes every outbound
//! command to stdout as NDJSON. With `--summary`, the final panel view is
//! appended as one more JSON line.

mod logging;
mod replay;
mod transcript;

use std::io::{self, Read};
use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use playground_core::{load_config, Panel, WriterChannel};

use crate::replay::ReplayClock;
use crate::transcript::TranscriptError;

#[derive(Parser)]
#[command(name = "playground-replay")]
#[command(about = "Replay a host transcript through the playground panel bridge")]
#[command(version)]
struct Cli {
    /// Panel config file (defaults to ~/.playground/panel.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to a file in this directory instead of stderr
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Print the final panel view after the commands
    #[arg(long)]
    summary: bool,

    /// Transcript file, or `-` for stdin
    #[arg(value_name = "TRANSCRIPT")]
    transcript: String,
}

fn read_transcript(source: &str) -> Result<String, TranscriptError> {
    let read_error = |source_err| TranscriptError::Read {
        source_name: source.to_string(),
        source: source_err,
    };
    if source == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .map_err(read_error)?;
        Ok(text)
    } else {
        fs_err::read_to_string(source).map_err(read_error)
    }
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_dir.as_deref());

    let config = match load_config(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load panel config");
            std::process::exit(1);
        }
    };

    let steps = match read_transcript(&cli.transcript).and_then(|text| transcript::parse(&text)) {
        Ok(steps) => steps,
        Err(err) => {
            tracing::error!(error = %err, "Failed to read transcript");
            std::process::exit(1);
        }
    };

    let clock = ReplayClock::new(Utc::now());
    let shared = clock.clone();
    let mut panel = Panel::new(config, Box::new(WriterChannel::new(io::stdout())))
        .with_clock(move || shared.now());
    panel.mount();

    let stats = replay::run(&mut panel, &clock, steps);
    tracing::info!(
        applied = stats.applied,
        discarded = stats.discarded,
        faulted = stats.faulted,
        ignored = stats.ignored,
        rejected_actions = stats.rejected_actions,
        stalled = stats.stalled,
        "Replay finished"
    );

    if cli.summary {
        match serde_json::to_string(&panel.read()) {
            Ok(line) => println!("{}", line),
            Err(err) => {
                tracing::error!(error = %err, "Failed to serialize panel view");
                std::process::exit(1);
            }
        }
    }

    panel.close();
}
