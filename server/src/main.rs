//! `ddss` entry point.
//!
//! ## Commands
//!
//! - `ddss serve`: run the HTTP action and display surfaces
//! - `ddss setup <TOKEN>`: store the admin token (once)
//! - `ddss enroll|remove <DEV_TOKEN>`: toggle a device's enrollment
//! - `ddss devices`: list enrolled devices
//! - `ddss status <DEV_TOKEN>`: print a device's schedule state as JSON
//!
//! Admin commands act directly on the database with the stored admin
//! credential, so they need no token of their own.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ddss_blob::FsBlobStore;
use ddss_schd::db::DbOptions;
use ddss_schd::{DdssConfig, Role, ScheduleEngine, SqliteRecordStore};
use ddss_server::{App, http};

/// Data delivery scheduling service
#[derive(Debug, Parser)]
#[command(name = "ddss", version)]
struct Cli {
    /// Config file (default: $DDSS_CONFIG, then ~/.config/ddss/ddss.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite database (overrides `db_path`)
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve HTTP until Ctrl-C
    Serve(ServeArgs),

    /// Store the admin token; refused once initialized
    Setup { token: String },

    /// Allow a device token to act as a device
    Enroll { dev_token: String },

    /// Revoke a device token; its stored data is kept
    Remove { dev_token: String },

    /// List enrolled device tokens
    Devices,

    /// Print a device's schedule state and data slots
    Status { dev_token: String },
}

#[derive(Debug, Parser)]
struct ServeArgs {
    /// Listen address (overrides `listen`)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Worker threads (overrides `workers`)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Blob directory (overrides `blob_dir`)
    #[arg(long, value_name = "PATH")]
    blob_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut DdssConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(blob_dir) = self.blob_dir {
            config.blob_dir = blob_dir.to_string_lossy().into_owned();
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Logs on stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = DdssConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.db_path = database.to_string_lossy().into_owned();
    }

    match cli.command {
        Command::Serve(args) => {
            args.apply(&mut config);
            anyhow::ensure!(config.workers > 0, "--workers must be at least 1");
            run_server(config)
        }
        command => run_admin(&config, command),
    }
}

fn open_store(config: &DdssConfig) -> anyhow::Result<SqliteRecordStore> {
    let path = config.resolved_db_path();
    let store = SqliteRecordStore::open(
        &path,
        DbOptions {
            pool_size: config.pool_size,
            busy_timeout: config.busy_timeout(),
        },
    )?;
    tracing::info!(path = %path.display(), "Record store opened");
    Ok(store)
}

fn run_admin(config: &DdssConfig, command: Command) -> anyhow::Result<()> {
    let engine = ScheduleEngine::new(open_store(config)?);
    let gate = engine.gate();

    match command {
        Command::Setup { token } => {
            engine.setup(&gate.classify(None)?, &token)?;
            println!("Admin token stored");
        }
        Command::Enroll { dev_token } => {
            engine.enroll(&gate.operator()?, &dev_token)?;
            println!("Enrolled {dev_token}");
        }
        Command::Remove { dev_token } => {
            engine.remove(&gate.operator()?, &dev_token)?;
            println!("Removed {dev_token}");
        }
        Command::Devices => {
            for token in engine.devices(&gate.operator()?)? {
                println!("{token}");
            }
        }
        Command::Status { dev_token } => {
            gate.operator()?;
            let status = engine.status(&Role::Device(dev_token))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Serve(_) => anyhow::bail!("serve is not an admin command"),
    }
    Ok(())
}

#[tokio::main]
async fn run_server(config: DdssConfig) -> anyhow::Result<()> {
    tracing::info!("ddss v{} starting", env!("CARGO_PKG_VERSION"));

    let blobs = FsBlobStore::open(config.resolved_blob_dir())?;
    tracing::info!(path = %blobs.root().display(), "Blob store opened");
    let app = Arc::new(
        App::new(ScheduleEngine::new(open_store(&config)?), blobs)
            .with_max_body(config.max_body_bytes),
    );

    let server = Arc::new(
        tiny_http::Server::http(config.listen.as_str())
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.listen))?,
    );
    tracing::info!(
        listen = %config.listen,
        workers = config.workers,
        max_body_bytes = config.max_body_bytes,
        "Listening"
    );

    let mut workers = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let server = Arc::clone(&server);
        let app = Arc::clone(&app);
        workers.push(tokio::task::spawn_blocking(move || {
            http::serve(&server, &app, worker);
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Signal received, shutting down");

    for _ in 0..config.workers {
        server.unblock();
    }
    for handle in workers {
        handle.await?;
    }

    tracing::info!("ddss exiting cleanly");
    Ok(())
}
