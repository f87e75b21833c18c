//! bioclin - command-line access to the Bioclin API.
//!
//! Manages the stored session (login, status, logout) and runs individual
//! tool calls, printing the JSON envelope on stdout.

mod login;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bioclin_core::auth::SessionStore;
use bioclin_core::{Config, ToolDispatcher};

use login::LoginMethod;

#[derive(Parser)]
#[command(name = "bioclin", version, about = "Bioclin API session manager and tool runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store a session.
    Login {
        /// Use the browser login window.
        #[arg(long, conflicts_with = "cli")]
        browser: bool,
        /// Use username and password.
        #[arg(long)]
        cli: bool,
        /// Username (email); prompted for when missing.
        #[arg(long, short)]
        username: Option<String>,
    },
    /// Show the stored session.
    Status,
    /// Log out and delete the stored session.
    Logout,
    /// List available tools as JSON.
    Tools,
    /// Run one tool call and print the result envelope.
    Call {
        /// Tool name, e.g. bioclin_get_user_me
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g., RUST_LOG=bioclin_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Login { browser, cli, username } => {
            let method = match (browser, cli) {
                (true, _) => Some(LoginMethod::Browser),
                (_, true) => Some(LoginMethod::Credentials),
                _ => None,
            };
            login::run(&config, method, username.as_deref()).await?;
        }
        Commands::Status => status(&config)?,
        Commands::Logout => return call(&config, "bioclin_logout", Value::Null).await,
        Commands::Tools => {
            let tools = serde_json::to_string_pretty(bioclin_core::tools::TOOLS)?;
            println!("{tools}");
        }
        Commands::Call { tool, arguments } => {
            let arguments: Value =
                serde_json::from_str(&arguments).context("Tool arguments must be valid JSON")?;
            return call(&config, &tool, arguments).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn call(config: &Config, tool: &str, arguments: Value) -> Result<ExitCode> {
    let dispatcher = ToolDispatcher::from_config(config)?;
    let envelope = dispatcher.dispatch(tool, arguments).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    Ok(if envelope.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn status(config: &Config) -> Result<()> {
    let store = SessionStore::new(config.session_path()?);
    match store.load_valid()? {
        Some(session) => {
            info!(path = %store.path().display(), "session loaded");
            println!("Logged in as {}", session.user.display_name());
            println!("  Created: {}", session.created_at.to_rfc3339());
            println!("  Expires: {} ({} left)", session.expires_at.to_rfc3339(), session.remaining_display());
            println!("  Session file: {}", store.path().display());
        }
        None => {
            println!("Not logged in. Run `bioclin login`.");
        }
    }
    Ok(())
}
