// btuart: host tool for the UART/Bluetooth bridge
//
// Runs the bridge core against host stand-ins: a TCP socket for SPP, stdio
// for the UART, and an in-process GATT path for probing.

mod config;
mod probe;
mod socket;

use anyhow::{Context, Result};
use btuart_core::transport::ble::framing::chunk_unit;
use btuart_core::transport::ble::{ATT_HEADER_OVERHEAD, DEFAULT_MTU};
use btuart_core::{start_spp, Framer, MemoryUart, SequenceCounter, SppEvent, SppHandle};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "btuart")]
#[command(about = "UART to Bluetooth bridge: framing, SPP bridging and probes", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Frame input into notify chunks and print them
    Frame {
        /// ATT MTU to frame for
        #[arg(short, long, default_value_t = DEFAULT_MTU)]
        mtu: u16,
        /// Sequence number of the first chunk
        #[arg(short, long, default_value_t = 0)]
        seq: u8,
        /// Read from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Bridge stdin/stdout to TCP clients standing in for SPP connections
    SppServe {
        #[arg(short, long, default_value = "127.0.0.1:7777")]
        listen: String,
    },
    /// Push probe messages through the GATT path and check what arrives
    Probe {
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,
        #[arg(short, long, default_value_t = DEFAULT_MTU)]
        mtu: u16,
        /// Fraction of notifications to drop (0.0 - 1.0)
        #[arg(short, long, default_value_t = 0.0)]
        loss: f64,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every setting
    Show,
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
    Set { key: String, value: String },
    Get { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config_path = config::Config::config_file(cli.config.as_deref())?;

    match cli.command {
        Commands::Frame { mtu, seq, file } => cmd_frame(mtu, seq, file.as_deref()),
        Commands::SppServe { listen } => cmd_spp_serve(&config_path, &listen).await,
        Commands::Probe {
            count,
            mtu,
            loss,
            seed,
        } => cmd_probe(&config_path, count, mtu, loss, seed).await,
        Commands::Config { action } => cmd_config(&config_path, action),
    }
}

fn cmd_frame(mtu: u16, seq: u8, file: Option<&Path>) -> Result<()> {
    let mut data = Vec::new();
    match file {
        Some(path) => {
            data = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
        }
    }

    let max_payload = mtu.saturating_sub(ATT_HEADER_OVERHEAD);
    let unit = chunk_unit(max_payload).with_context(|| format!("MTU {} is too small", mtu))?;
    let counter = SequenceCounter::starting_at(seq);
    let framer = Framer::new(&data, max_payload, &counter)?;

    println!(
        "{} {} bytes, MTU {}, {} payload bytes per chunk",
        "Framing".bold(),
        data.len(),
        mtu,
        unit
    );
    for chunk in framer {
        println!(
            "  {} {:>4}  {}",
            (chunk.tag as char).to_string().bright_cyan(),
            chunk.payload.len(),
            hex::encode(chunk.payload).dimmed()
        );
    }
    println!("Next sequence: {}", counter.current());
    Ok(())
}

async fn cmd_spp_serve(config_path: &Path, listen: &str) -> Result<()> {
    let config = config::Config::load(config_path)?.bridge;
    let uart = Arc::new(MemoryUart::new(config.uart.clone(), config.spp.tick()));
    let handle: SppHandle<socket::TcpSocket> = start_spp(
        &config,
        uart.clone(),
        Arc::new(socket::LogStack),
        Arc::new(socket::LogIndicator),
    )?;
    let events = handle.events();
    events.send(SppEvent::Init { ok: true }).await?;
    events.send(SppEvent::Started).await?;

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    println!("{} {}", "Listening on".bold(), listen.bright_green());
    println!("  stdin → connected client, client → stdout. Ctrl-C to stop.");

    tokio::spawn(pump_stdin(uart.clone()));
    tokio::spawn(pump_stdout(uart));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("Accept failed")?;
                let socket = socket::TcpSocket::new(stream.into_std()?)?;
                eprintln!("{} {}", "Client connected:".green(), socket.peer());
                if events.send(SppEvent::ServiceOpen(socket)).await.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let stats = handle.shutdown().await?;
    eprintln!("{} {}", "Stopped:".bold(), stats);
    Ok(())
}

async fn pump_stdin(uart: Arc<MemoryUart>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 512];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                uart.inject(&buf[..n]).await;
            }
        }
    }
    tracing::debug!("stdin closed");
}

async fn pump_stdout(uart: Arc<MemoryUart>) {
    let mut stdout = tokio::io::stdout();
    loop {
        let data = uart.recv_tx().await;
        if stdout.write_all(&data).await.is_err() || stdout.flush().await.is_err() {
            break;
        }
    }
}

async fn cmd_probe(
    config_path: &Path,
    count: usize,
    mtu: u16,
    loss: f64,
    seed: Option<u64>,
) -> Result<()> {
    let config = config::Config::load(config_path)?.bridge;
    let seed = seed.unwrap_or_else(rand::random);

    println!(
        "{} {} messages, MTU {}, loss {:.0}%, seed {}",
        "Probing".bold(),
        count,
        mtu,
        loss * 100.0,
        seed
    );
    let report = probe::run(&config, count, mtu, loss, seed).await?;

    println!();
    println!("{}", "Chunks".bold());
    println!("  sent:            {}", report.bridge.chunks_sent);
    println!("  received:        {}", report.chunks_received);
    println!(
        "  out of sequence: {}",
        colour_count(report.chunks_out_of_sequence as usize)
    );
    println!("{}", "Messages".bold());
    println!("  sent:            {}", report.messages_sent);
    println!("  valid:           {}", report.messages_valid.to_string().green());
    println!("  bad:             {}", colour_count(report.messages_bad));
    println!("  dropped (gap):   {}", colour_count(report.messages_dropped as usize));
    Ok(())
}

fn colour_count(n: usize) -> ColoredString {
    if n == 0 {
        n.to_string().green()
    } else {
        n.to_string().bright_red()
    }
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = config::Config::load(config_path)?;
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            config::Config::default().save(config_path)?;
            println!("{} Wrote {}", "✓".green(), config_path.display());
        }

        ConfigAction::Path => println!("{}", config_path.display()),

        ConfigAction::Set { key, value } => {
            let mut config = config::Config::load(config_path)?;
            config.set(&key, &value)?;
            config.save(config_path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            let config = config::Config::load(config_path)?;
            match config.get(&key) {
                Some(value) => println!("{} = {}", key.bright_cyan(), value),
                None => anyhow::bail!("Unknown config key: {}", key),
            }
        }
    }
    Ok(())
}
