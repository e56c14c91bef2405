//! Manual test client for the GDB RSP and QMP endpoints.
//!
//! Connects to a running `emudbgd`, sends one raw command, and prints the
//! reply. Not a debugger front-end — just enough to poke the wire protocols
//! by hand while developing against them.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use emudbg_common::config::{DEFAULT_GDB_PORT, DEFAULT_QMP_PORT};
use emudbg_core::framer::encode_frame;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "emudbg")]
#[command(about = "Manual test client for the GDB RSP and QMP endpoints")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one GDB Remote Serial Protocol packet and print the reply
    Gdb {
        /// Port the GDB endpoint is listening on
        #[arg(long, default_value_t = DEFAULT_GDB_PORT)]
        port: u16,

        /// Packet payload, without the `$`/`#checksum` framing (e.g. "g", "?", "c")
        payload: String,
    },

    /// Send one QEMU Monitor Protocol JSON command and print the reply
    Qmp {
        /// Port the QMP endpoint is listening on
        #[arg(long, default_value_t = DEFAULT_QMP_PORT)]
        port: u16,

        /// Raw JSON command, e.g. {"execute":"query-status"}
        json: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gdb { port, payload } => send_gdb(&cli.host, port, &payload),
        Commands::Qmp { port, json } => send_qmp(&cli.host, port, &json),
    }
}

fn connect(host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("connecting to {host}:{port}"))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    Ok(stream)
}

fn send_gdb(host: &str, port: u16, payload: &str) -> anyhow::Result<()> {
    let mut stream = connect(host, port)?;
    let frame = encode_frame(payload.as_bytes());
    stream.write_all(&frame)?;

    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        bail!("connection closed without a reply");
    }
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}

fn send_qmp(host: &str, port: u16, json: &str) -> anyhow::Result<()> {
    let mut stream = connect(host, port)?;

    // Drain the greeting line before sending anything.
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf)?;
    println!("{}", String::from_utf8_lossy(&buf[..n]));

    let mut line = json.trim().to_string();
    line.push_str("\r\n");
    stream.write_all(line.as_bytes())?;

    let n = stream.read(&mut buf)?;
    if n == 0 {
        bail!("connection closed without a reply");
    }
    println!("{}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}
