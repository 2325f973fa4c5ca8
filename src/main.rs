use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use crate::app::CallAttendant;
use crate::config::AppConfig;
use crate::manage::Command;
use crate::modem::Modem;

mod app;
mod config;
mod database;
mod indicators;
mod manage;
mod modem;
mod screening;
mod voice_mail;

#[derive(Parser)]
#[command(name = "call-attendant", version = env!("VERSION"))]
#[command(about = "Screens incoming calls on a voice modem and takes messages")]
struct Cli {
    /// TOML config file, relative to the data path unless absolute
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Folder holding the database, messages and config [default: ~/.callattendant]
    #[arg(short, long, value_name = "DIR")]
    data_path: Option<PathBuf>,

    /// Create the data path if it doesn't exist
    #[arg(long)]
    create_folder: bool,

    /// Tracing directive, overrides the config file; RUST_LOG overrides both
    #[arg(short, long)]
    log_level: Option<String>,

    /// Manage the database instead of answering calls
    #[command(subcommand)]
    command: Option<Command>
}

fn default_data_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set, pass --data-path")?;
    Ok(PathBuf::from(home).join(".callattendant"))
}

fn prepare_data_path(data_path: &Path, create_folder: bool) -> Result<()> {
    if data_path.is_dir() {
        return Ok(());
    }
    if !create_folder {
        bail!(
            "The data path ({}) does not exist. Run with --create-folder or create it before retrying.",
            data_path.display()
        );
    }

    std::fs::create_dir_all(data_path)
        .with_context(|| format!("Failed to create data path {}", data_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_path = match cli.data_path {
        Some(data_path) => data_path,
        None => default_data_path()?
    };
    prepare_data_path(&data_path, cli.create_folder)?;

    let config = AppConfig::load(cli.config.as_deref(), &data_path)?;
    let directive = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();

    if let Some(command) = cli.command {
        return manage::run_command(command, &config).await;
    }

    info!("Starting call-attendant v{} with data path {}", env!("VERSION"), data_path.display());
    std::fs::create_dir_all(&config.voice_mail.message_folder)
        .with_context(|| format!("Failed to create message folder {}", config.voice_mail.message_folder.display()))?;
    config.validate()?;

    let modem = Modem::open(&config.modem).await.context("Failed to open voice modem")?;
    info!("Using {:?} voice modem", modem.profile().model);

    let attendant = CallAttendant::new(config, modem).await?;
    attendant.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C, running until killed: {}", e);
            std::future::pending::<()>().await;
        }
    }).await
}
