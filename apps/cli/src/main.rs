//! s3pump CLI - Parallel multipart S3 transfers
//!
//! Downloads an object with ranged GETs or uploads a file as a multipart
//! upload, spreading the parts over up to 64 concurrent workers.

mod commands;
mod output;
mod progress;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use s3pump_types::{DEFAULT_REGION, DEFAULT_RETRY_COUNT, DEFAULT_WORKERS, MIN_PART_SIZE_MIB};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// s3pump - Chunked parallel S3 transfers
#[derive(Parser)]
#[command(name = "s3pump")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write the log to this file
    #[arg(short, long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download an object into a local file
    Download {
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Upload a local file as a multipart upload
    Upload {
        #[command(flatten)]
        transfer: TransferArgs,

        /// Server side encryption (AES-256)
        #[arg(short, long)]
        encryption: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Options shared by both transfer directions
#[derive(Args, Debug)]
struct TransferArgs {
    /// AWS access key
    #[arg(short = 'a', long = "accesskey", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    /// AWS secret access key
    #[arg(short = 's', long = "secretkey", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// AWS region
    #[arg(short, long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// S3-compatible endpoint URL
    #[arg(long, env = "S3PUMP_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Bucket name
    #[arg(short, long)]
    bucket: String,

    /// Key name
    #[arg(short, long)]
    key: String,

    /// Local file path
    #[arg(short, long)]
    path: PathBuf,

    /// Part size (MB)
    #[arg(long, default_value_t = MIN_PART_SIZE_MIB)]
    part: u64,

    /// Parallel transfer count, 1 to 64
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    parallel: usize,

    /// Timeout per request (sec)
    #[arg(short, long, default_value_t = 300)]
    timeout: u64,

    /// Attempts per part, including the first
    #[arg(long, default_value_t = DEFAULT_RETRY_COUNT)]
    retry_count: u32,

    /// Delay between attempts (msec)
    #[arg(long, default_value_t = 1000)]
    retry_interval: u64,
}

fn init_logging(verbose: bool, log: Option<&PathBuf>) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "s3pump=debug,s3pump_core=debug"
        } else {
            "warn"
        })
    });
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match log {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "s3pump", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(cli.verbose, cli.log.as_ref())?;

    match cli.command {
        Commands::Download { transfer } => commands::download(transfer, cli.output).await?,

        Commands::Upload {
            transfer,
            encryption,
        } => commands::upload(transfer, encryption, cli.output).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}
