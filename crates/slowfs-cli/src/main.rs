//! slowfs - Mount a slow pass-through filesystem
//!
//! Usage:
//!   slowfs /srv/data /mnt/slow                      # Mirror /srv/data at /mnt/slow
//!   slowfs /srv/data /mnt/slow --config slow.json   # Start with a delay profile
//!   slowfs /srv/data /mnt/slow --control-addr 0.0.0.0:9000
//!
//! Runs until Ctrl-C, then unmounts. Delays are changed while mounted with
//! `slowfsctl` or any HTTP client.

use anyhow::{Context, Result};
use clap::Parser;
use slowfs::fuse::{self, MountConfig};
use slowfs::{ConfigStore, ConfigTable, ControlApi, LogConfig, PassthroughFs};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

/// slowfs - A very slow file system for simulating overloaded storage
#[derive(Parser, Debug)]
#[command(name = "slowfs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backing directory to mirror
    root: PathBuf,

    /// Directory to mount on
    mountpoint: PathBuf,

    /// Address of the HTTP control API
    #[arg(long, default_value = "127.0.0.1:8080")]
    control_addr: SocketAddr,

    /// JSON delay table applied before mounting
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for delay and fault sampling, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Leave file names out of trace events
    #[arg(long)]
    hide_paths: bool,

    /// Log at debug level (overrides RUST_LOG)
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_table(path: &Path) -> Result<ConfigTable> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    ConfigTable::from_json(&json)
        .with_context(|| format!("Invalid config: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let store = Arc::new(ConfigStore::new());
    if let Some(path) = &args.config {
        store.set_all(load_table(path)?)?;
        tracing::info!(config = %path.display(), "delay table loaded");
    }

    let mut log_config = LogConfig::new();
    if args.hide_paths {
        log_config = log_config.hide_paths();
    }
    let mut builder = PassthroughFs::builder(&args.root)
        .store(Arc::clone(&store))
        .log_config(log_config);
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }
    let fs = builder
        .build()
        .with_context(|| format!("Failed to open backing root: {}", args.root.display()))?;

    let listener = TcpListener::bind(args.control_addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", args.control_addr))?;
    let (stop, stopped) = oneshot::channel::<()>();
    let control = tokio::spawn(ControlApi::new(Arc::clone(&store)).serve(listener, async {
        let _ = stopped.await;
    }));

    let mount_config = MountConfig {
        allow_other: args.allow_other,
        ..MountConfig::default()
    };
    let session = fuse::mount(
        Arc::new(fs),
        &args.mountpoint,
        &mount_config,
        tokio::runtime::Handle::current(),
    )
    .with_context(|| format!("Failed to mount on {}", args.mountpoint.display()))?;
    tracing::info!(
        root = %args.root.display(),
        mountpoint = %args.mountpoint.display(),
        "slowfs ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    tracing::info!("shutting down");

    // Unmounting joins the session thread; keep it off the async workers.
    tokio::task::spawn_blocking(move || drop(session))
        .await
        .context("Failed to unmount")?;
    let _ = stop.send(());
    control.await.context("Control server task failed")??;
    Ok(())
}
