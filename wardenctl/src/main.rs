use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use warden_config::{ConfigLoad, ConfigLoader};
use warden_core::rbac::Role;

mod commands;

#[derive(Parser)]
#[command(name = "wardenctl", about = "Warden auth core operator tool")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,
    /// .env file layered beneath the process environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load configuration, run guard rails and print the effective policy
    CheckConfig {
        /// Emit the effective policy as JSON
        #[arg(long)]
        json: bool,
    },
    /// Hash a secret read from stdin with the configured pepper and cost
    HashSecret,
    /// Mint an access token signed with the configured key
    IssueToken {
        #[arg(long)]
        subject: Option<Uuid>,
        /// Role to embed; repeat for several
        #[arg(long = "role")]
        roles: Vec<Role>,
        /// Allow minting outside dev mode
        #[arg(long)]
        force: bool,
    },
    /// Verify an access token and print its claims
    InspectToken { token: String },
    /// Apply the PostgreSQL schema migrations
    #[cfg(feature = "database")]
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli {
        config,
        env_file,
        command,
    } = Cli::parse();
    let load = || load_config(config.as_ref(), env_file.as_ref());

    match command {
        Command::CheckConfig { json } => commands::check_config(&load()?, json),
        Command::HashSecret => commands::hash_secret(&load()?.config),
        Command::IssueToken {
            subject,
            roles,
            force,
        } => commands::issue_token(
            &load()?.config,
            subject.unwrap_or_else(Uuid::now_v7),
            roles.into_iter().collect(),
            force,
        ),
        Command::InspectToken { token } => commands::inspect_token(&load()?.config, &token),
        #[cfg(feature = "database")]
        Command::Migrate { database_url } => commands::migrate(&database_url).await,
    }
}

fn load_config(config: Option<&PathBuf>, env_file: Option<&PathBuf>) -> Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = env_file {
        loader = loader.with_env_file(path);
    }
    loader.load().context("failed to load warden configuration")
}
