mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "idx")]
#[command(about = "Sign in against an Identity Engine org from the terminal")]
#[command(version)]
pub struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long, global = true, env = "OKTA_IDX_CONFIG")]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with username and password
    Login {
        /// Username or email
        username: String,
    },
    /// Reset a forgotten password
    Recover {
        /// Username or email
        username: String,

        /// Authenticator that receives the verification code
        #[arg(short, long, default_value = "email")]
        authenticator: String,
    },
    /// Register a new user
    Register {
        /// Profile attribute, repeatable (e.g. -a firstName=Ada)
        #[arg(short = 'a', long = "attribute", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Walk any flow step by step, as the server dictates
    Interact,
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Install stderr logging, plus a file layer when asked
///
/// `RUST_LOG` wins over `-v`. The returned guard flushes the file writer on drop.
fn init_tracing(verbose: u8, log_file: Option<&PathBuf>) -> Option<WorkerGuard> {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("idx_auth={},idx={}", level, level))
    });

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "idx.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_file.as_ref());

    let client = commands::client(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { username } => commands::execute_login(&client, &username).await,
        Commands::Recover {
            username,
            authenticator,
        } => commands::execute_recover(&client, &username, &authenticator).await,
        Commands::Register { attributes } => {
            commands::execute_register(&client, attributes.into_iter().collect()).await
        }
        Commands::Interact => commands::execute_interact(&client).await,
    }
}
