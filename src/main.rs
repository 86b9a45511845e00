//! Crane CLI - package registry publishing client

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use crane::clock::TokioClock;
use crane::credentials::{CredentialStore, API_KEY_ENV};
use crane::error::{FixSuggestion, PushError};
use crane::host::HOST_ENV;
use crane::package::Package;
use crane::prompt::TerminalPrompter;
use crane::push::{PushConfig, Pusher};
use crane::transport::HttpTransport;
use crane::webauthn::WebauthnConfig;

#[derive(Parser)]
#[command(name = "crane")]
#[command(about = "Crane - publishing client for the Crane package registry")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a package archive to the registry
    Push {
        /// Path to the package archive
        package: PathBuf,

        /// Push to another registry host
        #[arg(long)]
        host: Option<String>,

        /// One-time code for multi-factor authentication
        #[arg(long)]
        otp: Option<String>,

        /// Attestation file to upload alongside the package (repeatable)
        #[arg(long = "attestation", value_name = "FILE")]
        attestations: Vec<PathBuf>,

        /// Use the named API key from the credentials file
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Push {
            package,
            host,
            otp,
            attestations,
            key,
        } => push(package, host, otp, attestations, key).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn push(
    package: PathBuf,
    host: Option<String>,
    otp: Option<String>,
    attestations: Vec<PathBuf>,
    key: Option<String>,
) -> Result<(), PushError> {
    let package = Package::load(&package)?;

    let mut store = CredentialStore::load(&credentials_path())?
        .with_env_override(std::env::var(API_KEY_ENV).ok());

    let config = PushConfig {
        host,
        env_host: std::env::var(HOST_ENV).ok().filter(|h| !h.is_empty()),
        otp,
        key_name: key,
        attestations,
        webauthn: WebauthnConfig::default(),
    };

    let transport = HttpTransport::new();
    let prompter = TerminalPrompter;
    let clock = TokioClock;

    let mut pusher = Pusher::new(&transport, &prompter, &clock, &mut store);
    let message = pusher.push(&package, &config).await?;

    println!("{}", message);
    Ok(())
}

fn credentials_path() -> PathBuf {
    let base = std::env::var("CRANE_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.crane")
    });
    PathBuf::from(base).join("credentials.yaml")
}
