//! Argument parsing and subcommand handlers.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use punch::alert::{AlertConfig, AlertDispatcher, WebhookConfig};
use punch::config::{self, FileConfig, DEFAULT_CONFIG_FILE};
use punch::output::{self, OutputFormat};
use punch::{check_targets, ProbeOptions, WatchConfig, WatchScheduler};

type BoxError = Box<dyn Error + Send + Sync>;

const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_INTERVAL_SECS: u64 = 5;
const WATCH_DEFAULT_RETRIES: u32 = 1;

/// Exit status when nothing was given to probe.
const EXIT_NO_TARGETS: u8 = 2;

#[derive(Parser)]
#[command(name = "punch")]
#[command(about = "Fast concurrent health checks for HTTP, TCP, DNS and TLS endpoints")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: Level,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check targets once and print the results
    Check(CheckArgs),
    /// Check targets repeatedly until interrupted
    Watch(WatchArgs),
    /// Write a sample config file
    Init {
        /// Destination (default: punch.json)
        file: Option<PathBuf>,
    },
    /// Print the version
    Version,
}

/// Flags shared by `check` and `watch`.
#[derive(Args, Debug, Default)]
pub struct ProbeArgs {
    /// Targets: URLs, bare hosts, tcp://host:port, dns://host, ssl://host:port
    pub targets: Vec<String>,

    /// Timeout per probe in seconds [default: 10]
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// HTTP method [default: GET]
    #[arg(short, long)]
    pub method: Option<String>,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Skip HTTPS certificate verification
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Do not follow redirects
    #[arg(long)]
    pub no_follow: bool,

    /// Accepted status codes, comma separated [default: any 2xx]
    #[arg(short, long = "expect", value_delimiter = ',')]
    pub expect: Vec<u16>,

    /// Extra attempts for failed HTTP probes
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Maximum probes in flight [default: 10]
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Print nothing; report through the exit code only
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    /// Seconds between cycles [default: 5]
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Send alerts to this webhook URL
    #[arg(long)]
    pub webhook: Option<String>,

    /// Seconds between repeated alerts for one target [default: 300]
    #[arg(long)]
    pub cooldown: Option<u64>,
}

pub async fn run(cli: Cli) -> Result<ExitCode, BoxError> {
    match cli.command {
        Command::Version => {
            println!("punch {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Init { file } => {
            let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            config::write_sample(&path)?;
            println!("Created {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Check(args) => {
            let file = load_file_config(cli.config)?;
            run_check(args, &file).await
        }
        Command::Watch(args) => {
            let file = load_file_config(cli.config)?;
            run_watch(args, &file).await
        }
    }
}

fn load_file_config(explicit: Option<PathBuf>) -> Result<FileConfig, BoxError> {
    Ok(config::discover(explicit.as_deref())?
        .map(|(_, cfg)| cfg)
        .unwrap_or_default())
}

async fn run_check(args: CheckArgs, file: &FileConfig) -> Result<ExitCode, BoxError> {
    let Some(targets) = resolve_targets(&args.probe, file) else {
        return Ok(no_targets());
    };
    let options = probe_options(&args.probe, file, 0)?;
    let concurrency = args.probe.concurrency.or(file.concurrency).unwrap_or(DEFAULT_CONCURRENCY);

    tracing::debug!("Checking {} targets with concurrency {}", targets.len(), concurrency);
    let results = check_targets(&targets, &options, concurrency).await;

    if !args.probe.quiet {
        print!("{}", output::render(&results, args.format)?);
    }

    if results.iter().all(|r| r.success) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run_watch(args: WatchArgs, file: &FileConfig) -> Result<ExitCode, BoxError> {
    let Some(targets) = resolve_targets(&args.probe, file) else {
        return Ok(no_targets());
    };
    let options = probe_options(&args.probe, file, WATCH_DEFAULT_RETRIES)?;
    let interval = args.interval.or(file.interval).unwrap_or(DEFAULT_INTERVAL_SECS);
    let config = WatchConfig {
        targets,
        options,
        interval: Duration::from_secs(interval),
        concurrency: args.probe.concurrency.or(file.concurrency).unwrap_or(DEFAULT_CONCURRENCY),
    };

    let cancel = CancellationToken::new();
    spawn_shutdown_handler(cancel.clone());

    let mut scheduler = WatchScheduler::new(config, cancel)?;
    let alerts = alert_config(&args, file);
    if alerts.enabled {
        tracing::info!("Alerting enabled, cooldown {:?}", alerts.cooldown);
        scheduler = scheduler.with_alerts(Arc::new(AlertDispatcher::new(alerts)?));
    }

    let quiet = args.probe.quiet;
    if !quiet {
        println!("Watching every {}s, press Ctrl-C to stop", interval);
    }
    let summary = scheduler
        .run(|results| {
            if quiet {
                return;
            }
            let now = Local::now().time();
            for result in results {
                println!("{}", output::watch_line(result, now));
            }
        })
        .await;

    if !quiet {
        println!();
        print!("{}", output::render_summary(&summary));
    }
    Ok(ExitCode::SUCCESS)
}

fn no_targets() -> ExitCode {
    eprintln!(
        "No targets given. Pass them as arguments or list them under \"urls\" in {}",
        DEFAULT_CONFIG_FILE
    );
    ExitCode::from(EXIT_NO_TARGETS)
}

/// Command-line targets win over the config file's list.
fn resolve_targets(args: &ProbeArgs, file: &FileConfig) -> Option<Vec<String>> {
    let targets = if args.targets.is_empty() {
        file.urls.clone()
    } else {
        args.targets.clone()
    };
    (!targets.is_empty()).then_some(targets)
}

/// Layer flags over file values over defaults.
fn probe_options(args: &ProbeArgs, file: &FileConfig, default_retries: u32) -> Result<ProbeOptions, BoxError> {
    let mut options = file.probe_options();
    if file.retries.is_none() {
        options.retries = default_retries;
    }

    if let Some(timeout) = args.timeout {
        options.timeout = Duration::from_secs(timeout);
    }
    if let Some(method) = &args.method {
        options.method = method.to_ascii_uppercase();
    }
    options.headers.extend(parse_headers(&args.headers)?);
    if args.data.is_some() {
        options.body = args.data.clone();
    }
    options.insecure |= args.insecure;
    if args.no_follow {
        options.follow_redirects = false;
    }
    if !args.expect.is_empty() {
        options.expected_codes = args.expect.clone();
    }
    if let Some(retries) = args.retries {
        options.retries = retries;
    }
    Ok(options)
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>, BoxError> {
    raw.iter()
        .map(|h| match h.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(format!("invalid header {:?}, expected \"Name: value\"", h).into()),
        })
        .collect()
}

fn alert_config(args: &WatchArgs, file: &FileConfig) -> AlertConfig {
    let mut alerts = file.alert_config();
    if let Some(url) = &args.webhook {
        alerts.enabled = true;
        alerts.webhook = Some(WebhookConfig::new(url));
    }
    if let Some(cooldown) = args.cooldown {
        alerts.cooldown = Duration::from_secs(cooldown);
    }
    alerts
}

/// Trip `cancel` on Ctrl-C or SIGTERM.
fn spawn_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
