mod cache;
mod config;
mod error;
mod formatter;
mod models;
mod pipeline;
mod report;
mod slack;
mod tenable;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter;

use cache::EventCache;
use config::Config;
use pipeline::Pipeline;
use report::TracingReporter;
use slack::SlackClient;
use tenable::TenableClient;

const LOG_FILE_NAME: &str = "audit-notifier.log";

/// Polls the audit log once and relays enabled events to Slack.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Full path to the YAML configuration file
    #[arg(long, env = "AUDIT_NOTIFIER_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Overrides the cache file location from the configuration
    #[arg(long)]
    cache_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Configuration is read first so the log directory is known.
    let config = Config::load(&args.config);
    let log_dir = config.as_ref().ok().and_then(|c| c.log_dir.as_deref());
    if let Err(err) = init_logging(log_dir) {
        init_stdout_logging();
        tracing::warn!("Unable to open log file, logging to stdout: {}", err);
    }

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let allow_list = config.allow_list();
    let cache = EventCache::new(args.cache_file.unwrap_or_else(|| config.cache_file.clone()));
    let source = TenableClient::new(&config.api_base_url, &config.api_access_key, &config.api_secret_key);
    let notifier = SlackClient::new(&config.audit_logs.slack_webhook_url);

    tracing::info!(
        "Starting run with {} enabled event types, cache at {}",
        allow_list.len(),
        cache.path().display()
    );

    let pipeline = Pipeline {
        source: &source,
        notifier: &notifier,
        cache: &cache,
        allow_list: &allow_list,
        reporter: &TracingReporter,
    };

    match pipeline.run(chrono::Local::now().date_naive(), chrono::Utc::now()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Run aborted: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

fn init_logging(log_dir: Option<&Path>) -> io::Result<()> {
    let Some(log_dir) = log_dir else {
        init_stdout_logging();
        return Ok(());
    };

    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;

    tracing_subscriber::fmt()
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn init_stdout_logging() {
    tracing_subscriber::fmt()
        .with_level(true)
        .with_env_filter(env_filter())
        .init();
}
