// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use adsp_config::{BoardDescriptor, RunConfig};
use adsp_core::bridge::Bridge;
use adsp_core::interrupt::CpuState;
use adsp_core::metrics::TransferMetrics;
use adsp_core::scheduler::ThreadScheduler;
use adsp_core::system::{DspMachine, HostDevice, MachineEnv};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const EXIT_PASS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const DEFAULT_BOARD: &str = "byt";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Audio DSP emulation bridge",
    long_about = None
)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the DSP side (child) of a board.
    Dsp(SideArgs),
    /// Run the host side (parent) of a board.
    Host(SideArgs),
    /// List the built-in boards.
    Boards,
}

#[derive(Args, Debug, Clone)]
struct SideArgs {
    /// Built-in board name
    #[arg(short, long, conflicts_with = "board_file")]
    board: Option<String>,

    /// Board descriptor (YAML)
    #[arg(long)]
    board_file: Option<PathBuf>,

    /// Runtime settings (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bridge name shared by both processes
    #[arg(short, long)]
    name: Option<String>,

    /// Directory holding the shared-memory backing files
    #[arg(long)]
    shm_root: Option<PathBuf>,

    /// Directory for SSP and DMA channel data dumps
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Stop after this many seconds instead of running until the peer closes
    #[arg(long)]
    run_for: Option<u64>,

    /// Write a device snapshot (JSON) on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Dsp,
    Host,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Dsp(args) => run_side(Role::Dsp, args),
        Commands::Host(args) => run_side(Role::Host, args),
        Commands::Boards => {
            for name in BoardDescriptor::builtin_names() {
                match BoardDescriptor::builtin(name) {
                    Ok(board) => println!("{:<6} {:?}", name, board.family),
                    Err(e) => println!("{:<6} invalid: {:#}", name, e),
                }
            }
            ExitCode::from(EXIT_PASS)
        }
    }
}

/// Resolve the board and runtime settings from files and flags.
fn load_settings(args: &SideArgs) -> anyhow::Result<(BoardDescriptor, RunConfig)> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(name) = &args.name {
        config.bridge.name = name.clone();
    }
    if let Some(root) = &args.shm_root {
        config.bridge.shm_root = root.clone();
    }
    if let Some(dir) = &args.capture_dir {
        config.dma.capture_dir = Some(dir.clone());
    }
    if let Some(dir) = &config.dma.capture_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create capture dir {:?}", dir))?;
    }

    let board = match (&args.board_file, &args.board) {
        (Some(path), _) => BoardDescriptor::from_file(path)?,
        (None, Some(name)) => BoardDescriptor::builtin(name)?,
        (None, None) => BoardDescriptor::builtin(config.board.as_deref().unwrap_or(DEFAULT_BOARD))?,
    };
    Ok((board, config))
}

fn run_side(role: Role, args: SideArgs) -> ExitCode {
    let (board, config) = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    info!(
        "Starting {:?} side of board '{}' on bridge '{}'",
        role, board.name, config.bridge.name
    );

    let bridge = Arc::new(Bridge::posix(config.bridge.clone()));
    let metrics = Arc::new(TransferMetrics::new());
    let env = MachineEnv {
        scheduler: Arc::new(ThreadScheduler),
        timing: config.dma.clone(),
        cpu: Arc::new(CpuState::default()),
        observers: vec![metrics.clone()],
    };

    let machine = match build_side(role, &board, bridge.clone(), env) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            bridge.close();
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let reader = match bridge.start_reader() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start bridge reader: {}", e);
            bridge.close();
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    match args.run_for {
        Some(secs) => std::thread::sleep(Duration::from_secs(secs)),
        None => {
            if reader.join().is_err() {
                error!("Bridge reader panicked");
            }
        }
    }

    if let Some(path) = &args.snapshot {
        write_snapshot(path, &machine.snapshot());
    }
    let stats = bridge.stats();
    info!(
        "Bridge: {} sent ({} failed), {} received, {} dropped, {} stale",
        stats.sent, stats.send_failures, stats.received, stats.dropped, stats.stale
    );
    info!(
        "DMA: {} transfers, {} blocks, {} reloads, {} bytes",
        metrics.get_transfers(),
        metrics.get_blocks(),
        metrics.get_reloads(),
        metrics.get_bytes_total()
    );
    bridge.close();
    ExitCode::from(EXIT_PASS)
}

enum Machine {
    Dsp(DspMachine),
    Host(HostDevice),
}

impl Machine {
    fn snapshot(&self) -> serde_json::Value {
        match self {
            Machine::Dsp(m) => m.snapshot(),
            Machine::Host(h) => h.snapshot(),
        }
    }
}

fn build_side(
    role: Role,
    board: &BoardDescriptor,
    bridge: Arc<Bridge>,
    env: MachineEnv,
) -> anyhow::Result<Machine> {
    Ok(match role {
        Role::Dsp => Machine::Dsp(DspMachine::build(board, bridge, env)?),
        Role::Host => Machine::Host(HostDevice::build(board, bridge, env)?),
    })
}

fn write_snapshot(path: &Path, snapshot: &serde_json::Value) {
    match std::fs::File::create(path) {
        Ok(f) => {
            if let Err(e) = serde_json::to_writer_pretty(f, snapshot) {
                error!("Failed to write snapshot {:?}: {}", path, e);
            }
        }
        Err(e) => error!("Failed to create snapshot {:?}: {}", path, e),
    }
}
