//! CLI command implementations

use crate::output::{format_bytes, format_count, format_elapsed, print_output};
use crate::progress::TransferProgress;
use crate::{OutputFormat, TransferArgs};
use anyhow::{bail, Context, Result};
use chrono::Local;
use s3pump_core::{S3Store, StaticCredentials, TransferManager};
use s3pump_types::{
    ObjectLocation, TransferConfig, TransferDirection, TransferOutcome, MIB,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ============================================================================
// Transfer Commands
// ============================================================================

pub async fn download(args: TransferArgs, format: OutputFormat) -> Result<()> {
    let config = build_config(TransferDirection::Download, &args);
    let settings = Settings::new(&config, &args, None);
    settings.announce(format);

    let manager = connect(config, &args).await?;
    let progress = TransferProgress::new(matches!(format, OutputFormat::Human))
        .follow(manager.subscribe());

    let location = ObjectLocation::new(&args.bucket, &args.key);
    let result = manager.download(&location, &args.path).await;
    drop(manager);
    let _ = progress.await;

    let outcome = result.with_context(|| format!("download of {} failed", location))?;
    report(settings, outcome, format)
}

pub async fn upload(args: TransferArgs, encryption: bool, format: OutputFormat) -> Result<()> {
    let config = build_config(TransferDirection::Upload, &args);
    let settings = Settings::new(&config, &args, Some(encryption));
    settings.announce(format);

    let manager = connect(config, &args).await?;
    let progress = TransferProgress::new(matches!(format, OutputFormat::Human))
        .follow(manager.subscribe());

    let location = ObjectLocation::new(&args.bucket, &args.key);
    let result = manager.upload(&args.path, &location, encryption).await;
    drop(manager);
    let _ = progress.await;

    let outcome = result.with_context(|| format!("upload to {} failed", location))?;
    report(settings, outcome, format)
}

/// Clamp the requested part size and parallelism, then apply the rest of the
/// flags on top
fn build_config(direction: TransferDirection, args: &TransferArgs) -> TransferConfig {
    let base = match direction {
        TransferDirection::Download => TransferConfig::for_download(args.part, args.parallel),
        TransferDirection::Upload => TransferConfig::for_upload(args.part, args.parallel),
    };
    TransferConfig {
        region: args.region.clone(),
        endpoint_url: args.endpoint_url.clone(),
        retry_count: args.retry_count,
        retry_interval: Duration::from_millis(args.retry_interval),
        timeout: Duration::from_secs(args.timeout),
        ..base
    }
}

/// Static keys when both are given, the default AWS chain when neither is
fn credentials(args: &TransferArgs) -> Result<Option<StaticCredentials>> {
    match (&args.access_key, &args.secret_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(Some(StaticCredentials {
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => bail!("--accesskey was given without --secretkey"),
        (None, Some(_)) => bail!("--secretkey was given without --accesskey"),
    }
}

async fn connect(config: TransferConfig, args: &TransferArgs) -> Result<TransferManager> {
    let credentials = credentials(args)?;

    let store = S3Store::connect(&config, credentials)
        .await
        .context("failed to configure the S3 client")?;
    Ok(TransferManager::new(Arc::new(store), config)?)
}

fn report(settings: Settings, outcome: TransferOutcome, format: OutputFormat) -> Result<()> {
    let report = TransferReport {
        bits_per_second: outcome.bits_per_second(),
        megabits_per_second: outcome.megabits_per_second(),
        settings,
        outcome,
    };
    for line in report.to_string().lines() {
        info!("{}", line);
    }
    print_output(&report, format)
}

// ============================================================================
// Report
// ============================================================================

/// Effective settings of one run, echoed before the transfer starts
#[derive(Debug, Serialize)]
struct Settings {
    region: String,
    part_size: u64,
    parallel: usize,
    timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption: Option<bool>,
    bucket: String,
    key: String,
    path: String,
}

impl Settings {
    fn new(config: &TransferConfig, args: &TransferArgs, encryption: Option<bool>) -> Self {
        Self {
            region: config.region.clone(),
            part_size: config.part_size,
            parallel: config.workers,
            timeout_secs: config.timeout.as_secs(),
            encryption,
            bucket: args.bucket.clone(),
            key: args.key.clone(),
            path: args.path.display().to_string(),
        }
    }

    fn announce(&self, format: OutputFormat) {
        let text = self.to_string();
        for line in text.lines() {
            info!("{}", line);
        }
        if matches!(format, OutputFormat::Human) {
            println!("{}", text);
        }
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(50))?;
        writeln!(f, "region : {}", self.region)?;
        writeln!(f, "part size (byte) : {}", self.part_size)?;
        writeln!(f, "part size (MB) : {}", self.part_size / MIB)?;
        writeln!(f, "parallel count : {}", self.parallel)?;
        writeln!(f, "timeout (sec) : {}", self.timeout_secs)?;
        if let Some(encryption) = self.encryption {
            writeln!(f, "server side encryption (AES-256) : {}", encryption)?;
        }
        writeln!(f, "bucket name : {}", self.bucket)?;
        writeln!(f, "key name : {}", self.key)?;
        write!(f, "file path : {}", self.path)
    }
}

/// Summary of a finished transfer
#[derive(Debug, Serialize)]
struct TransferReport {
    settings: Settings,
    outcome: TransferOutcome,
    bits_per_second: f64,
    megabits_per_second: f64,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = &self.outcome;
        let arrow = match outcome.direction {
            TransferDirection::Download => format!("{} → {}", outcome.location, self.settings.path),
            TransferDirection::Upload => format!("{} → {}", self.settings.path, outcome.location),
        };

        writeln!(
            f,
            "start datetime : {}",
            outcome
                .started_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S:%3f")
        )?;
        writeln!(f, "file size (byte) : {}", format_count(outcome.bytes))?;
        writeln!(f, "{} ({}, {} part(s))", arrow, format_bytes(outcome.bytes), outcome.parts)?;
        writeln!(f, "stopwatch : {}", format_elapsed(outcome.elapsed))?;
        writeln!(f, "average rate (bps) : {:.0}", self.bits_per_second)?;
        write!(f, "average rate (Mbps) : {:.2}", self.megabits_per_second)
    }
}
