//! emberkv server binary.
//!
//! Loads configuration, recovers the store from the snapshot and WAL,
//! starts the background tasks, and serves the RESP protocol over TCP
//! until Ctrl+C.

use emberkv::commands::CommandHandler;
use emberkv::config::Config;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::lifecycle::Lifecycle;
use emberkv::persistence::{recover, Snapshotter, WalWriter};
use emberkv::storage::{recommended_shard_count, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line options; anything set here overrides the config file.
struct CliOptions {
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

impl CliOptions {
    fn parse() -> Self {
        let mut options = CliOptions {
            config_path: None,
            host: None,
            port: None,
        };

        let args: Vec<String> = std::env::args().collect();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    options.config_path = Some(PathBuf::from(require_value(&args, i)));
                    i += 2;
                }
                "--host" | "-h" => {
                    options.host = Some(require_value(&args, i).to_string());
                    i += 2;
                }
                "--port" | "-p" => {
                    options.port = Some(require_value(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid port number");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--version" | "-v" => {
                    println!("emberkv {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("error: unknown argument '{}'", other);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        options
    }
}

fn require_value(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"emberkv - a durable in-memory key-value database

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -c, --config <PATH>  YAML config file (default: ./config.yaml if present)
    -h, --host <HOST>    Bind host, overrides the config file
    -p, --port <PORT>    Bind port, overrides the config file
    -v, --version        Print version
        --help           Print this help

Connect with any Redis client:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET greeting hello EX 60
    OK
"#
    );
}

/// Resolves the effective configuration from the file and CLI flags.
fn load_config(options: &CliOptions) -> anyhow::Result<Config> {
    let mut config = match &options.config_path {
        Some(path) => Config::from_file(path)?,
        None => {
            let default_path = PathBuf::from("config.yaml");
            if default_path.exists() {
                Config::from_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(host) = &options.host {
        config.server.host = host.clone();
    }
    if let Some(port) = options.port {
        config.server.port = port;
    }
    Ok(config)
}

fn log_level(config: &Config) -> Level {
    match config.server.log_level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse();
    let config = load_config(&options)?;

    FmtSubscriber::builder()
        .with_max_level(log_level(&config))
        .with_target(false)
        .init();

    info!("emberkv {} starting", emberkv::VERSION);

    // Store first, then recovery, then the writable WAL: replay reads
    // the log before any new record can be appended to it
    let shard_count = recommended_shard_count(config.store.segments_per_cpu);
    let store = Arc::new(Store::new(shard_count));
    info!(shards = shard_count, "store initialized");

    let snapshotter = Arc::new(Snapshotter::new(&config.store.snapshot_file_path)?);
    let report = recover(&store, &snapshotter, &config.store.wal_file_path)?;
    info!(
        snapshot_keys = report.snapshot_keys,
        replayed_records = report.replayed_records,
        "recovery finished"
    );

    let wal = Arc::new(WalWriter::open(
        &config.store.wal_file_path,
        config.store.wal_directory(),
        config.store.wal_max_size_bytes,
        config.store.wal_max_files,
    )?);

    let lifecycle = Lifecycle::start(
        Arc::clone(&store),
        Arc::clone(&wal),
        Arc::clone(&snapshotter),
        &config.store,
    );

    let handler = CommandHandler::new(Arc::clone(&store), Arc::clone(&wal));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    info!(address = %config.server.bind_address(), "listening");

    tokio::select! {
        _ = accept_loop(listener, handler, stats) => {}
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
        }
    }

    // Background tasks drain, then the WAL takes its final flush
    lifecycle.shutdown().await;
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}
