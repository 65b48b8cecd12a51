//! CLI smoke-test entry points.
//!
//! Runs against the simulated camera (`mock` feature, on by default); the
//! vendor-backed binding plugs in through the same [`tethercap::CameraSdk`]
//! trait.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tethercap::{CameraIdentity, SessionManager, TetherConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tethercap", about = "Tethered camera capture smoke tool")]
struct Cli {
    /// Optional TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected cameras.
    List,
    /// Open a session, trigger captures and print the downloaded files.
    Capture {
        /// Port name; defaults to the first connected camera.
        #[arg(long)]
        port: Option<String>,
        /// Number of captures to trigger.
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Directory downloaded images are written into.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Shutter settle interval, e.g. "400ms".
        #[arg(long, value_parser = humantime::parse_duration)]
        settle: Option<Duration>,
    },
}

#[cfg(feature = "mock")]
fn connect_sdk() -> Result<Arc<dyn tethercap::CameraSdk>> {
    Ok(tethercap::sdk::mock::simulated_camera() as Arc<dyn tethercap::CameraSdk>)
}

#[cfg(not(feature = "mock"))]
fn connect_sdk() -> Result<Arc<dyn tethercap::CameraSdk>> {
    anyhow::bail!("no SDK backend compiled in; rebuild with --features mock")
}

fn load_config(cli: &Cli) -> Result<TetherConfig> {
    match &cli.config {
        Some(path) => TetherConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(TetherConfig::default()),
    }
}

fn pick_identity(
    manager: &SessionManager,
    port: Option<&str>,
) -> Result<CameraIdentity> {
    let devices = manager.list_devices()?;
    match port {
        Some(port) => devices
            .into_iter()
            .find(|d| d.port_name == port)
            .with_context(|| format!("no camera at port '{port}'")),
        None => devices.into_iter().next().context("no cameras connected"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    let sdk = connect_sdk()?;

    match cli.command {
        Command::List => {
            let manager = SessionManager::new(sdk, config)?;
            for identity in manager.list_devices()? {
                println!(
                    "{}\t{}\tsub-type {}",
                    identity.port_name, identity.description, identity.sub_type
                );
            }
            manager.terminate().await;
        }
        Command::Capture {
            port,
            count,
            output_dir,
            settle,
        } => {
            if let Some(dir) = output_dir {
                config.download_dir = dir;
            }
            if let Some(settle) = settle {
                config.shutter_settle = settle;
            }
            let manager = SessionManager::new(sdk, config)?;
            let identity = pick_identity(&manager, port.as_deref())?;

            manager.open(&identity).await?;
            let (tx, rx) = mpsc::channel();
            let subscription = manager
                .subscribe_to_images(
                    &identity,
                    Arc::new(move |image: &tethercap::DownloadedImage| {
                        let _ = tx.send(image.clone());
                    }),
                )
                .await?;

            for shot in 1..=count {
                tracing::info!(shot, "triggering capture");
                manager.trigger_capture(&identity).await?;
            }

            for _ in 0..count {
                match rx.recv_timeout(Duration::from_secs(10)) {
                    Ok(image) => println!(
                        "{}\t{} bytes\t{}",
                        image.path.display(),
                        image.size,
                        image.captured_at
                    ),
                    Err(_) => {
                        tracing::warn!("timed out waiting for a download");
                        break;
                    }
                }
            }

            subscription.unsubscribe();
            manager.close(&identity).await;
            manager.terminate().await;
        }
    }

    Ok(())
}
