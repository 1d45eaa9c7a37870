//! EmberKV server entry point.
//!
//! Parses the command line, sets up logging, the storage engine and the
//! expiry sweeper, then accepts connections until Ctrl+C.

use anyhow::{bail, Context};
use emberkv::commands::CommandHandler;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Interval between expiry sweeps
    sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
            sweep_interval: ExpiryConfig::default().interval,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, PartialEq)]
enum Cli {
    Run(Config),
    Help,
    Version,
}

impl Config {
    /// Parse configuration from command-line arguments (without the program name)
    fn from_args<I>(args: I) -> anyhow::Result<Cli>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Config::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" | "-h" => {
                    config.host = args.next().context("--host requires a value")?;
                }
                "--port" | "-p" => {
                    let value = args.next().context("--port requires a value")?;
                    config.port = value
                        .parse()
                        .with_context(|| format!("invalid port number: {}", value))?;
                }
                "--sweep-interval-ms" => {
                    let value = args
                        .next()
                        .context("--sweep-interval-ms requires a value")?;
                    let ms: u64 = value
                        .parse()
                        .with_context(|| format!("invalid sweep interval: {}", value))?;
                    if ms == 0 {
                        bail!("sweep interval must be greater than zero");
                    }
                    config.sweep_interval = Duration::from_millis(ms);
                }
                "--help" => return Ok(Cli::Help),
                "--version" | "-v" => return Ok(Cli::Version),
                other => bail!("unknown argument: {}", other),
            }
        }

        Ok(Cli::Run(config))
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - A Minimal In-Memory Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>             Port to listen on (default: 6380)
        --sweep-interval-ms <MS>  Expired-key sweep interval (default: 1000)
    -v, --version                 Print version information
        --help                    Print this help message

Log verbosity is read from RUST_LOG (default: info).

EXAMPLES:
    emberkv                        # Start on 127.0.0.1:6380
    emberkv --port 7000            # Start on port 7000
    RUST_LOG=debug emberkv         # Verbose logging

CONNECTING:
    $ redis-cli -p 6380
    127.0.0.1:6380> SET name "Ariz" EX 60
    OK
    127.0.0.1:6380> GET name
    "Ariz"
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Cli::Run(config)) => config,
        Ok(Cli::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Cli::Version) => {
            println!("EmberKV version {}", emberkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            print_help();
            return Err(e);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(StorageEngine::new());
    info!(shards = 64, "Storage engine initialized");

    // Start the background expiry sweeper
    let _sweeper = ExpirySweeper::start(
        Arc::clone(&storage),
        ExpiryConfig {
            interval: config.sweep_interval,
        },
    );

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        version = emberkv::VERSION,
        address = %config.bind_address(),
        "Ready to accept connections"
    );

    tokio::select! {
        _ = accept_loop(listener, CommandHandler::new(storage), Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
