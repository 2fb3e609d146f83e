//! # Domain Sweep Library
//!
//! An adaptive, rate-limited engine for classifying large identifier lists
//! against a remote service.
//!
//! Every identifier passes through a token-bucket admission gate and a
//! concurrency ceiling that follows the recent success rate. Transient
//! failures are retried in later passes, and each identifier ends up in
//! exactly one terminal sink.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domain_sweep_lib::{MemorySinks, RetryOrchestrator, SweepConfig, Verdict};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sinks = Arc::new(MemorySinks::new());
//!     let orchestrator = RetryOrchestrator::new(
//!         SweepConfig::default().with_rate(10.0),
//!         |identifier: String| async move {
//!             if identifier.contains("bad") { Verdict::Blocked } else { Verdict::Success }
//!         },
//!         sinks.clone(),
//!     )?;
//!
//!     let report = orchestrator
//!         .execute(vec!["https://a.example".into(), "https://bad.example".into()])
//!         .await;
//!     println!("{} succeeded, {} blocked", report.succeeded.len(), report.blocked.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Token bucket**: bounded request start rate with one second of burst
//! - **Adaptive concurrency**: ceiling raised or lowered from a sliding success window
//! - **Multi-pass retries**: transient failures re-run after a cool-down
//! - **Local backoff**: exponential pause on rate-limited responses
//! - **Pluggable**: probe, classification policy, sessions, sinks and alerts

pub use adjuster::{Adjustment, ThroughputAdjuster};
pub use alert::{Alert, AlertConfig, AlertDispatcher, WebhookAlert};
pub use backoff::LocalBackoff;
pub use config::{
    load_env_config, load_env_config_from, parse_duration_string, ConfigManager, EngineConfig,
    EnvConfig, FileConfig, OutputConfig,
};
pub use error::{ProbeError, SweepError};
pub use limiter::RateLimiter;
pub use orchestrator::{ProbeFn, RetryOrchestrator};
pub use policy::{ClassificationPolicy, MarkerPolicy, MarkerRule, PolicyConfig, RawResponse};
pub use pool::{Completion, PoolSummary, WorkPool};
pub use probe::{HttpProbe, HttpProbeConfig, Probe, ProbeExecutor};
pub use session::{
    HttpSessionProvider, Session, SessionConfig, SessionManager, SessionProvider,
    StaticSessionProvider,
};
pub use sink::{FileSinks, MemorySinks, SinkFileNames, VerdictSink};
pub use types::{
    AttemptRecord, RunReport, RunStats, SinkCategory, SweepConfig, UnknownDisposition, Verdict,
};
pub use utils::{
    normalize_identifier, parse_identifier_list, read_identifier_file, shard_file_name,
    shard_path,
};

// Public modules
pub mod probe;

// Internal modules - their public items are re-exported above
mod adjuster;
mod alert;
mod backoff;
mod config;
mod error;
mod limiter;
mod orchestrator;
mod policy;
mod pool;
mod session;
mod sink;
mod types;
mod utils;

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SweepError>;

// Library version and metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// Get library information for debugging or display purposes.
pub fn info() -> LibraryInfo {
    LibraryInfo {
        version: VERSION,
        author: AUTHOR,
    }
}

/// Information about the library build
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub version: &'static str,
    pub author: &'static str,
}
