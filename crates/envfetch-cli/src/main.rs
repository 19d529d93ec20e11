//! envkey-fetch -- fetch and decrypt an environment as flat JSON.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use envfetch_client::{FetchOptions, fetch_env};

#[derive(Parser)]
#[command(
    name = "envkey-fetch",
    about = "Fetch and decrypt an environment as flat JSON",
    version,
    disable_version_flag = true
)]
struct Cli {
    /// The ENVKEY credential string
    envkey: String,

    /// Enable the local disk cache
    #[arg(long)]
    cache: bool,

    /// Override the cache directory
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Client name reported to the server
    #[arg(long)]
    client_name: Option<String>,

    /// Client version reported to the server
    #[arg(long)]
    client_version: Option<String>,

    /// Number of attempts for the primary fetch
    #[arg(long, default_value_t = 3)]
    retries: u8,

    /// Base backoff between primary attempts, in seconds
    #[arg(long = "retryBackoff", default_value_t = 1.0)]
    retry_backoff: f64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    show_version: Option<bool>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = FetchOptions {
        cache_enabled: cli.cache,
        cache_dir: cli.cache_dir,
        client_name: cli.client_name,
        client_version: cli.client_version,
        timeout: Duration::from_secs_f64(cli.timeout),
        retries: cli.retries,
        retry_backoff: cli.retry_backoff,
        ..FetchOptions::default()
    };

    match fetch_env(&cli.envkey, &options).await {
        Ok(json) => println!("{json}"),
        Err(error) => {
            // Errors go to stdout for backward-compatible parsers.
            println!("error: {}", error.user_message());
            std::process::exit(1);
        }
    }
}
