//! Will.IAM server
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (0.0.0.0:4040, in-memory stores)
//! cargo run --bin will-iam
//!
//! # Start on custom host and port against PostgreSQL
//! WILL_IAM_DATABASE_URL=postgres://localhost/will_iam cargo run --bin will-iam -- --port 9090
//!
//! # Enable debug logging
//! RUST_LOG=debug cargo run --bin will-iam
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging filter
//! - `WILL_IAM_HOST`: Server host (default: 0.0.0.0)
//! - `WILL_IAM_PORT`: Server port (default: 4040)
//! - `WILL_IAM_JSON_LOGS`: Emit JSON logs
//! - `WILL_IAM_*`: Core configuration, see `IamConfig::from_env`

use anyhow::Result;
use api_server::Server;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use will_iam_authz::IamConfig;

/// Will.IAM authorization server
#[derive(Parser, Debug)]
#[command(name = "will-iam", version, about = "Will.IAM authorization server", long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "WILL_IAM_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "4040", env = "WILL_IAM_PORT")]
    port: u16,

    /// Enable JSON logging format
    #[arg(long, env = "WILL_IAM_JSON_LOGS")]
    json_logs: bool,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Will.IAM");

    let config = IamConfig::from_env();
    let server = Server::bind(&format!("{}:{}", args.host, args.port), &config).await?;

    if let Err(e) = server.run().await {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn default_filter(args: &Args) -> String {
    let log_level = args.log_level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        tracing::Level::INFO
    });
    let deps = if log_level >= tracing::Level::DEBUG {
        "debug"
    } else {
        "info"
    };
    format!(
        "api_server={lvl},will_iam={lvl},will_iam_authz={lvl},tower_http={deps},sqlx=warn",
        lvl = log_level,
        deps = deps
    )
}

/// Initialize tracing/logging subsystem
fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(args).into());

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}
