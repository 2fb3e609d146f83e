//! Domain Sweep CLI Application
//!
//! Loads one shard of identifiers and runs it through the adaptive,
//! rate-limited classification engine in domain-sweep-lib.

mod ui;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{CommandFactory, Parser};
use domain_sweep_lib::{
    load_env_config, read_identifier_file, shard_path, AlertDispatcher, ConfigManager, EnvConfig,
    FileConfig, FileSinks, HttpProbe, MarkerPolicy, ProbeExecutor, RetryOrchestrator, RunReport,
    RunStats, SessionManager, SweepConfig, WebhookAlert,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Exit status after Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

/// How long pending alerts may take to go out at shutdown.
const ALERT_GRACE: Duration = Duration::from_secs(10);

/// CLI arguments for domain-sweep
#[derive(Parser, Debug)]
#[command(name = "domain-sweep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sweep a shard of domains through a rate-limited classification service")]
#[command(
    long_about = "Sweep a shard of domains through a rate-limited classification service.\n\nAdmission is token-bucket limited, concurrency follows the recent success rate, and transient failures are retried in later passes. Every domain ends up in exactly one output file."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Shard number; reads part_<NNNN>.txt from the input directory (legacy: -xx)
    #[arg(long = "shard", visible_alias = "xx", value_name = "N", help_heading = "Input")]
    pub shard: Option<String>,

    /// Read identifiers from this file instead of a shard
    #[arg(short = 'f', long = "file", value_name = "FILE", help_heading = "Input")]
    pub file: Option<PathBuf>,

    /// Directory holding the shard files
    #[arg(
        long = "input-dir",
        value_name = "DIR",
        default_value = ".",
        help_heading = "Input"
    )]
    pub input_dir: PathBuf,

    /// Print the normalized identifiers and exit without probing
    #[arg(long = "dry-run", help_heading = "Input")]
    pub dry_run: bool,

    /// Directory for success/blocked/failed/unknown files
    #[arg(short = 'o', long = "output-dir", value_name = "DIR", help_heading = "Output")]
    pub output_dir: Option<String>,

    /// Print the final report as JSON
    #[arg(short = 'j', long = "json", help_heading = "Output")]
    pub json: bool,

    /// Admission rate in requests per second
    #[arg(long = "rps", value_name = "RATE", help_heading = "Performance")]
    pub rps: Option<f64>,

    /// Starting concurrency ceiling
    #[arg(short = 'c', long = "concurrency", value_name = "N", help_heading = "Performance")]
    pub concurrency: Option<usize>,

    /// Upper bound of the concurrency ceiling
    #[arg(long = "max-concurrency", value_name = "N", help_heading = "Performance")]
    pub max_concurrency: Option<usize>,

    /// Number of retry passes after the first pass
    #[arg(long = "max-retries", value_name = "N", help_heading = "Performance")]
    pub max_retries: Option<u32>,

    /// Per-probe timeout (e.g. "15s", "500ms")
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Performance")]
    pub timeout: Option<String>,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,
}

/// Rewrite the legacy single-dash `-xx <N>` flag to `--shard <N>`.
fn normalize_legacy_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            if arg == "-xx" {
                "--shard".to_string()
            } else if let Some(value) = arg.strip_prefix("-xx=") {
                format!("--shard={}", value)
            } else {
                arg
            }
        })
        .collect()
}

#[tokio::main]
async fn main() {
    let args = Args::parse_from(normalize_legacy_args(std::env::args()));

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        eprintln!();
        eprintln!("{}", Args::command().render_usage());
        process::exit(1);
    }

    init_tracing(args.verbose);

    match run(args).await {
        Ok(report) if report.cancelled => process::exit(EXIT_INTERRUPTED),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    match (&args.shard, &args.file) {
        (None, None) => {
            return Err("You must specify a shard with --shard <N> (or -xx <N>), or a file with --file".to_string())
        }
        (Some(_), Some(_)) => {
            return Err("Cannot specify both --shard and --file".to_string());
        }
        _ => {}
    }

    if let Some(rps) = args.rps {
        if !(rps.is_finite() && rps > 0.0) {
            return Err("--rps must be a positive number".to_string());
        }
    }

    if args.concurrency == Some(0) || args.max_concurrency == Some(0) {
        return Err("Concurrency must be at least 1".to_string());
    }

    if let Some(timeout) = &args.timeout {
        if domain_sweep_lib::parse_duration_string(timeout).is_none() {
            return Err(format!(
                "Invalid timeout '{}'. Use a format like '500ms', '15s', '2m'",
                timeout
            ));
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "domain_sweep=debug,domain_sweep_lib=debug"
    } else {
        "domain_sweep=info,domain_sweep_lib=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Main sweep logic
async fn run(args: Args) -> Result<RunReport> {
    let input = input_path(&args)?;
    let identifiers = read_identifier_file(&input)
        .await
        .with_context(|| format!("cannot load identifiers from {}", input.display()))?;

    if args.dry_run {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&identifiers)?);
        } else {
            ui::print_dry_run(&identifiers);
        }
        return Ok(empty_report());
    }

    let env_config = load_env_config();
    let file_config = load_file_config(&args, &env_config)?;
    let config = build_config(&args, &file_config, &env_config)?;
    let output_dir = resolve_output_dir(&args, &file_config, &env_config);

    if identifiers.is_empty() {
        tracing::info!(input = %input.display(), "no identifiers to process");
        let report = empty_report();
        print_report(&args, &report, Duration::ZERO)?;
        return Ok(report);
    }

    let probe_config = file_config
        .probe
        .clone()
        .filter(|probe| !probe.endpoint.trim().is_empty())
        .context("no probe endpoint configured; set [probe] endpoint in the config file")?;
    let probe = HttpProbe::new(probe_config, config.probe_timeout)?;
    let policy = MarkerPolicy::new(file_config.policy.clone().unwrap_or_default());

    let session_config = file_config.session.clone().unwrap_or_default();
    let sessions = Arc::new(SessionManager::new(
        session_config.provider(config.probe_timeout)?,
    ));
    sessions
        .initialize()
        .await
        .context("failed to obtain a session")?;

    let cancel = CancellationToken::new();
    let refresh = match session_config.refresh_period()? {
        Some(period) => Some(sessions.spawn_refresh_task(period, cancel.child_token())),
        None => None,
    };

    let executor = ProbeExecutor::new(
        Arc::new(probe),
        Arc::new(policy),
        sessions,
        config.probe_timeout,
    );

    let names = file_config
        .output
        .as_ref()
        .map(|output| output.file_names())
        .unwrap_or_default();
    let sinks = FileSinks::open(&output_dir, &names)
        .await
        .with_context(|| format!("cannot open output files in {}", output_dir.display()))?;

    let alert_config = file_config.alert.clone().unwrap_or_default();
    let alerts = match WebhookAlert::from_config(&alert_config)? {
        Some(webhook) => AlertDispatcher::spawn(Arc::new(webhook), alert_config.queue_capacity),
        None => AlertDispatcher::disabled(),
    };

    spawn_interrupt_handler(cancel.clone());

    if !args.json {
        ui::print_header(&input, identifiers.len(), &config, &output_dir);
    }

    let orchestrator = RetryOrchestrator::with_executor(config, executor, Arc::new(sinks))?
        .with_alerts(alerts)
        .with_cancellation(cancel.clone());

    let started = Instant::now();
    let report = orchestrator.execute(identifiers).await;
    let elapsed = started.elapsed();

    cancel.cancel();
    if let Some(refresh) = refresh {
        let _ = refresh.await;
    }
    let delivered = orchestrator.shutdown(ALERT_GRACE).await;
    tracing::debug!(delivered, "alerts delivered");

    print_report(&args, &report, elapsed)?;
    Ok(report)
}

/// Cancel the run on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                    return;
                }
                tracing::warn!("interrupted, finishing in-flight probes");
                cancel.cancel();
            }
        }
    });
}

fn input_path(args: &Args) -> Result<PathBuf> {
    match (&args.file, &args.shard) {
        (Some(file), _) => Ok(file.clone()),
        (None, Some(shard)) => Ok(shard_path(&args.input_dir, shard)?),
        (None, None) => bail!("no input selected"),
    }
}

/// Load the config file: `--config`, then `DS_CONFIG`, then discovery.
fn load_file_config(args: &Args, env_config: &EnvConfig) -> Result<FileConfig> {
    let config_manager = ConfigManager::new(args.verbose);

    if let Some(explicit_config_path) = &args.config {
        tracing::debug!(path = %explicit_config_path, "using config file from --config");
        return config_manager
            .load_file(explicit_config_path)
            .with_context(|| format!("Failed to load config file '{}'", explicit_config_path));
    }

    if let Some(env_config_path) = &env_config.config {
        tracing::debug!(path = %env_config_path, "using config file from DS_CONFIG");
        return config_manager
            .load_file(env_config_path)
            .with_context(|| format!("Failed to load config file '{}'", env_config_path));
    }

    Ok(config_manager.discover_and_load()?)
}

/// Resolve the engine configuration.
///
/// Precedence (highest first): CLI flags, DS_* environment variables, config
/// file `[engine]` table, built-in defaults.
fn build_config(
    args: &Args,
    file_config: &FileConfig,
    env_config: &EnvConfig,
) -> Result<SweepConfig> {
    let mut config = file_config.sweep_config()?;
    env_config.apply_to(&mut config);
    apply_cli_args_to_config(&mut config, args)?;

    // A starting ceiling from flags or DS_CONCURRENCY widens the configured
    // bounds, unless a maximum was given at the same level.
    let concurrency_overridden = args.concurrency.is_some() || env_config.concurrency.is_some();
    let max_overridden = args.max_concurrency.is_some() || env_config.max_concurrency.is_some();
    if concurrency_overridden {
        if config.initial_concurrency > config.max_concurrency && !max_overridden {
            config.max_concurrency = config.initial_concurrency;
        }
        config.min_concurrency = config.min_concurrency.min(config.initial_concurrency);
    }

    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

/// Apply CLI arguments to config (highest precedence).
fn apply_cli_args_to_config(config: &mut SweepConfig, args: &Args) -> Result<()> {
    if let Some(rps) = args.rps {
        config.requests_per_second = rps;
    }
    if let Some(concurrency) = args.concurrency {
        config.initial_concurrency = concurrency;
    }
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if let Some(timeout) = &args.timeout {
        config.probe_timeout = domain_sweep_lib::parse_duration_string(timeout)
            .with_context(|| format!("Invalid timeout '{}'", timeout))?;
    }
    Ok(())
}

fn resolve_output_dir(args: &Args, file_config: &FileConfig, env_config: &EnvConfig) -> PathBuf {
    args.output_dir
        .clone()
        .or_else(|| env_config.output_dir.clone())
        .or_else(|| file_config.output.as_ref().and_then(|output| output.dir.clone()))
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(".").to_path_buf())
}

fn empty_report() -> RunReport {
    RunReport {
        succeeded: Vec::new(),
        blocked: Vec::new(),
        permanently_failed: Vec::new(),
        unknown: Vec::new(),
        unprocessed: Vec::new(),
        passes: 0,
        cancelled: false,
        stats: RunStats::new(0),
    }
}

fn print_report(args: &Args, report: &RunReport, elapsed: Duration) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        ui::print_summary(report, elapsed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_sweep_lib::{EngineConfig, OutputConfig};

    fn parse(argv: &[&str]) -> Args {
        Args::parse_from(normalize_legacy_args(argv.iter().map(|s| s.to_string())))
    }

    #[test]
    fn test_legacy_shard_flag() {
        let args = parse(&["domain-sweep", "-xx", "7"]);
        assert_eq!(args.shard.as_deref(), Some("7"));

        let args = parse(&["domain-sweep", "-xx=12"]);
        assert_eq!(args.shard.as_deref(), Some("12"));

        let args = parse(&["domain-sweep", "--xx", "3"]);
        assert_eq!(args.shard.as_deref(), Some("3"));
    }

    #[test]
    fn test_validate_args_requires_input() {
        let args = parse(&["domain-sweep"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["domain-sweep", "--shard", "1", "--file", "x.txt"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["domain-sweep", "--shard", "1"]);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_validate_args_rejects_bad_values() {
        let args = parse(&["domain-sweep", "--shard", "1", "--rps", "0"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["domain-sweep", "--shard", "1", "-c", "0"]);
        assert!(validate_args(&args).is_err());

        let args = parse(&["domain-sweep", "--shard", "1", "--timeout", "soon"]);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_input_path_from_shard() {
        let args = parse(&["domain-sweep", "--shard", "7", "--input-dir", "shards"]);
        assert_eq!(
            input_path(&args).unwrap(),
            Path::new("shards").join("part_0007.txt")
        );

        let args = parse(&["domain-sweep", "--file", "list.txt"]);
        assert_eq!(input_path(&args).unwrap(), PathBuf::from("list.txt"));
    }

    #[test]
    fn test_cli_overrides_env_and_file() {
        let file_config = FileConfig {
            engine: Some(EngineConfig {
                requests_per_second: Some(5.0),
                concurrency: Some(4),
                max_retries: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env_config = EnvConfig {
            requests_per_second: Some(8.0),
            max_retries: Some(2),
            ..Default::default()
        };
        let args = parse(&["domain-sweep", "--shard", "1", "--max-retries", "6"]);

        let config = build_config(&args, &file_config, &env_config).unwrap();
        assert_eq!(config.requests_per_second, 8.0); // env beats file
        assert_eq!(config.initial_concurrency, 4); // file beats default
        assert_eq!(config.max_retries, 6); // CLI beats env
    }

    #[test]
    fn test_large_concurrency_raises_max() {
        let args = parse(&["domain-sweep", "--shard", "1", "-c", "80"]);
        let config = build_config(&args, &FileConfig::default(), &EnvConfig::default()).unwrap();
        assert_eq!(config.initial_concurrency, 80);
        assert_eq!(config.max_concurrency, 80);
    }

    #[test]
    fn test_env_concurrency_raises_max() {
        let args = parse(&["domain-sweep", "--shard", "1"]);
        let env_config = EnvConfig {
            concurrency: Some(80),
            ..Default::default()
        };
        let config = build_config(&args, &FileConfig::default(), &env_config).unwrap();
        assert_eq!(config.initial_concurrency, 80);
        assert_eq!(config.max_concurrency, 80);

        let env_config = EnvConfig {
            concurrency: Some(80),
            max_concurrency: Some(40),
            ..Default::default()
        };
        assert!(build_config(&args, &FileConfig::default(), &env_config).is_err());
    }

    #[test]
    fn test_output_dir_precedence() {
        let file_config = FileConfig {
            output: Some(OutputConfig {
                dir: Some("from-file".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let env_config = EnvConfig {
            output_dir: Some("from-env".into()),
            ..Default::default()
        };

        let args = parse(&["domain-sweep", "--shard", "1"]);
        assert_eq!(
            resolve_output_dir(&args, &file_config, &env_config),
            PathBuf::from("from-env")
        );

        let args = parse(&["domain-sweep", "--shard", "1", "-o", "from-cli"]);
        assert_eq!(
            resolve_output_dir(&args, &file_config, &env_config),
            PathBuf::from("from-cli")
        );

        assert_eq!(
            resolve_output_dir(&args, &FileConfig::default(), &EnvConfig::default()),
            PathBuf::from("from-cli")
        );
    }
}
