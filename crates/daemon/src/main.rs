//! emudbg daemon
//!
//! Standalone binary wiring a `ServerConfig` and an in-memory `SimFacade`
//! (the real CPU/VGA/keyboard implementation is an external collaborator
//! this crate never provides) into a running `DebugServer`.

use clap::Parser;
use emudbg_common::config::ServerConfig;
use emudbg_core::{DebugServer, SimFacade};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Memory size for the standalone facade: 1 MiB, comfortably larger than
/// real-mode conventional memory's lowest segments used by the test scenarios.
const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "emudbgd")]
#[command(about = "Standalone GDB/QMP debug server for a DOS-era x86 emulator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value_os_t = emudbg_common::default_config_path())]
    config: PathBuf,

    /// GDB Remote Serial Protocol port override
    #[arg(long)]
    gdb_port: Option<u16>,

    /// QEMU Monitor Protocol port override
    #[arg(long)]
    qmp_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("emudbg daemon v{}", emudbg_common::VERSION);

    let mut config = ServerConfig::load(&cli.config)?;
    if let Some(port) = cli.gdb_port {
        config.gdb.port = port;
    }
    if let Some(port) = cli.qmp_port {
        config.qmp.port = port;
    }

    let facade: Arc<dyn emudbg_core::EmulatorFacade> = Arc::new(SimFacade::new(DEFAULT_MEMORY_SIZE));
    let server = DebugServer::new(facade);
    server.start(&config)?;

    info!(port = config.gdb.port, enabled = config.gdb.enabled, "gdb endpoint");
    info!(port = config.qmp.port, enabled = config.qmp.enabled, "qmp endpoint");

    let running = Arc::new(AtomicBool::new(true));
    let ctrlc_flag = running.clone();
    ctrlc::set_handler(move || {
        ctrlc_flag.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("shutdown signal received");
    server.stop();
    info!("daemon shutdown complete");
    Ok(())
}
