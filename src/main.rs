mod bootstrap;
mod clock;
mod config;
mod connection;
mod error;
mod indexes;
mod provision;
mod publish;
mod stats;
mod status;
mod store;
mod target;
mod verify;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bootstrap::Bootstrap;
use clock::SystemClock;
use config::{Config, Overrides};

/// Provision the MongoDB collection used by the tool-execution logger.
///
/// Connects to MongoDB, creates the log database/collection with its indexes,
/// verifies read/write access with a probe document, and writes
/// `mongo_logger_config.json` and `mongo_logger_env.sh` for the logger to pick up.
#[derive(Parser)]
#[command(name = "mongo-logger-bootstrap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bootstrap MongoDB Logger for MCP Tool Execution Tracking", long_about = None)]
struct Cli {
    /// MongoDB connection URI (default: from MONGODB_URI env var or mongodb://localhost:27017)
    #[arg(long, value_name = "URI")]
    mongo_uri: Option<String>,

    /// Use production database names instead of test names with timestamp
    #[arg(long)]
    production: bool,

    /// Only test the MongoDB connection without creating databases
    #[arg(long)]
    test_connection_only: bool,

    /// Configuration file (default: <config dir>/mongo-logger-bootstrap/config.yaml, if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory to write the configuration artifacts into (default: current directory)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            mongo_uri: self.mongo_uri.clone(),
            production: self.production,
            config_path: self.config.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

async fn execute(bootstrap: &mut Bootstrap, test_connection_only: bool) -> bool {
    if test_connection_only {
        return bootstrap.test_connection().await;
    }
    let outcome = bootstrap.run().await;
    println!("{}", outcome.summary());
    outcome.success
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongo_logger_bootstrap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(&cli.overrides())?;
    let mut bootstrap = Bootstrap::new(config, Box::new(SystemClock));

    // The run future is dropped on interrupt. Any client it created was
    // already handed to `bootstrap`, which closes it below either way.
    let success = tokio::select! {
        success = execute(&mut bootstrap, cli.test_connection_only) => success,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Bootstrap interrupted by user");
            false
        }
    };

    bootstrap.cleanup().await;

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
