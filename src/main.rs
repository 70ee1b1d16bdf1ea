use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use connectiondb::auth::CredentialStore;
use connectiondb::config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "connectiondb")]
#[command(author, version, about = "Contact directory backed by a spreadsheet", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web app
    Serve {
        /// Address to bind (overrides [gateway] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides [gateway] port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Set a user's password, creating the account if needed
    Passwd {
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            connectiondb::gateway::run_gateway(config).await
        }
        Command::Passwd { username } => set_password(&config, &username),
    }
}

fn set_password(config: &Config, username: &str) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        bail!("Username must not be empty");
    }

    let password = dialoguer::Password::new()
        .with_prompt(format!("New password for {username}"))
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let store = CredentialStore::open(&config.auth.users_file, config.bootstrap_account());
    store
        .set_password(username, &password)
        .with_context(|| format!("Failed to update {}", store.location()))?;
    println!("✅ Password updated for {username}");
    Ok(())
}
