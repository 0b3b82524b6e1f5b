#[macro_use]
extern crate log;

mod enable_editor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use clap::{Parser, Subcommand};
use daq_core::config::InstrumentConfig;
use daq_core::instrument_list::parse_instrument_list;
use daq_core::shutdown::{write_state, RunState};
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};

/// Spawns and supervises one daq-worker process per enabled instrument.
#[derive(Parser, Debug)]
#[command(name = "daq-supervisor", version, about)]
struct Args {
    /// Directory containing `Instrument List.txt` and instrument configuration files.
    #[arg(long, default_value = "./config")]
    config_dir: PathBuf,

    /// Run-state signal file shared with every daq-worker process.
    #[arg(long, default_value = "./logger_state.txt")]
    signal_file: PathBuf,

    /// Path to the daq-worker binary to spawn.
    #[arg(long, default_value = "daq-worker")]
    worker_bin: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Spawn a daq-worker process for every enabled instrument and supervise them until a
    /// shutdown signal arrives.
    Run,
    /// Set an instrument's `Enabled` state to true.
    Enable { instrument_name: String },
    /// Set an instrument's `Enabled` state to false.
    Disable { instrument_name: String },
    /// Write a Quit signal so every running daq-worker process exits on its next poll.
    Shutdown,
}

#[quit::main]
fn main() {
    daq_core::init_logging();

    let args = Args::parse();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start tokio runtime: {e}");
            quit::with_code(1);
        }
    };

    if let Err(e) = rt.block_on(dispatch(args)) {
        error!("{e}");
        quit::with_code(1);
    }
}

async fn dispatch(args: Args) -> anyhow::Result<()> {
    match &args.command {
        Cmd::Run => run_supervisor(&args).await,
        Cmd::Enable { instrument_name } => {
            let path = args.config_dir.join(format!("{instrument_name}.txt"));
            enable_editor::set_enabled(&path, true)?;
            info!("enabled {instrument_name}");
            Ok(())
        }
        Cmd::Disable { instrument_name } => {
            let path = args.config_dir.join(format!("{instrument_name}.txt"));
            enable_editor::set_enabled(&path, false)?;
            info!("disabled {instrument_name}");
            Ok(())
        }
        Cmd::Shutdown => {
            write_state(&args.signal_file, RunState::Quit)?;
            info!("wrote Quit to {}", args.signal_file.display());
            Ok(())
        }
    }
}

async fn run_supervisor(args: &Args) -> anyhow::Result<()> {
    write_state(&args.signal_file, RunState::Run)?;

    let list_contents =
        std::fs::read_to_string(args.config_dir.join("Instrument List.txt"))?;
    let entries = parse_instrument_list(&list_contents, &args.config_dir);

    let mut children: HashMap<String, Child> = HashMap::new();
    for entry in &entries {
        let config = match InstrumentConfig::read_from_path(&entry.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("skipping {}: {e}", entry.name);
                continue;
            }
        };
        if !config.enabled {
            info!("{} is disabled, not spawning", entry.name);
            continue;
        }

        let child = Command::new(&args.worker_bin)
            .arg("--instrument-name")
            .arg(&entry.name)
            .arg("--config-dir")
            .arg(&args.config_dir)
            .arg("--signal-file")
            .arg(&args.signal_file)
            .stdin(Stdio::null())
            .spawn()?;
        info!("spawned daq-worker for {}", entry.name);
        children.insert(entry.name.clone(), child);
    }

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }

    info!("shutting down, writing Quit to signal file");
    write_state(&args.signal_file, RunState::Quit)?;

    for (name, mut child) in children {
        match child.wait().await {
            Ok(status) => info!("{name} exited with {status}"),
            Err(e) => warn!("{name} failed while waiting for exit: {e}"),
        }
    }

    Ok(())
}
