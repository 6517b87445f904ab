#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dashboard_client::{ClientConfig, DashboardClient, LoginRedirect, RenewalTimer, Resource};
use dashboard_session::{TokenStore, now_unix_ms};
use serde_json::Value;
use tracing::info;

#[derive(Parser)]
#[command(name = "dashboard")]
#[command(about = "Session and API access for the project-management dashboard")]
pub struct DashboardCli {
    /// API base URL; overrides DASHBOARD_API_BASE_URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Session file; overrides DASHBOARD_SESSION_FILE
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the session
    Login {
        username: String,
        #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the stored session
    Status,
    /// Exchange the refresh token for a new pair
    Refresh,
    /// Fetch the signed-in user's profile
    Profile,
    /// GET an API path with the stored session
    Get { path: String },
    /// List a backend collection
    ///
    /// One of users, roles, permissions, projects, tasks, time-logs, attachments.
    List { resource: Resource },
    /// Keep the session renewed until interrupted
    Watch {
        #[arg(long)]
        interval_seconds: Option<u64>,
    },
}

/// Tells the operator how to get a session back.
#[derive(Debug, Default)]
struct CliRedirect;

impl LoginRedirect for CliRedirect {
    fn redirect_to_login(&self, login_path: &str) {
        eprintln!(
            "session ended ({login_path}); run `dashboard login <username>` to sign in again"
        );
    }
}

pub async fn run(cli: DashboardCli) -> Result<()> {
    let mut config = ClientConfig::from_env().context("load client config")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(session_file) = cli.session_file {
        config.session_file = session_file;
    }

    let tokens = TokenStore::open_file(&config.session_file)
        .with_context(|| format!("open session file {}", config.session_file.display()))?;
    let client = DashboardClient::with_redirect(config, tokens, Arc::new(CliRedirect))?;

    match cli.command {
        Commands::Login { username, password } => {
            let record = client.login(&username, &password).await?;
            println!(
                "signed in as {}",
                record.username.as_deref().unwrap_or(&username)
            );
        }
        Commands::Logout => client.logout()?,
        Commands::Status => print_status(&client),
        Commands::Refresh => {
            client.refresh_session().await?;
            println!("session refreshed");
            print_status(&client);
        }
        Commands::Profile => print_json(&serde_json::to_value(client.fetch_profile().await?)?)?,
        Commands::Get { path } => print_json(&client.get_json::<Value>(&path).await?)?,
        Commands::List { resource } => print_json(&client.list(resource).await?)?,
        Commands::Watch { interval_seconds } => watch(client, interval_seconds).await?,
    }
    Ok(())
}

async fn watch(client: DashboardClient, interval_seconds: Option<u64>) -> Result<()> {
    let period = interval_seconds.map_or_else(
        || client.config().renewal_interval(),
        |seconds| Duration::from_secs(seconds.max(1)),
    );
    let threshold = client.config().renewal_threshold_minutes;

    info!(?period, threshold_minutes = threshold, "watching session");
    let timer = RenewalTimer::spawn_with(client, period, threshold);
    tokio::signal::ctrl_c()
        .await
        .context("wait for interrupt")?;
    timer.stop();
    info!("stopped watching session");
    Ok(())
}

fn print_status(client: &DashboardClient) {
    let status = client.session_status(now_unix_ms());
    println!("authenticated: {}", status.authenticated);
    println!(
        "username: {}",
        status.username.as_deref().unwrap_or("<none>")
    );
    match status.expires_at_ms {
        Some(expires_at_ms) => {
            let remaining = (expires_at_ms - now_unix_ms()) / 1000;
            println!("access expires in: {remaining}s");
        }
        None => println!("access expires in: <unknown>"),
    }
    println!("refresh token stored: {}", status.has_refresh_token);
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
