//! Logging and observability infrastructure for storyloom
//!
//! Structured logging through `tracing`, a per-run phase timer, and secret
//! scrubbing for anything that may echo provider responses into logs.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"sk-or-v1-[A-Za-z0-9]{16,}",
        r"sk-[A-Za-z0-9_-]{20,}",
        r"(?i)bearer\s+[A-Za-z0-9._~+/-]{16,}=*",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbose selects
/// `storyloom=debug,info` and the default is `storyloom=info,warn`.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("storyloom=debug,info")
            } else {
                EnvFilter::try_new("storyloom=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span covering one orchestrator phase of one run.
pub fn phase_span(run: &str, phase: &str) -> tracing::Span {
    span!(Level::INFO, "phase", run = %run, phase = %phase)
}

pub fn log_phase_start(run: &str, phase: &str) {
    info!(run = %run, phase = %phase, "Starting phase");
}

pub fn log_phase_complete(run: &str, phase: &str, duration_ms: u128) {
    info!(run = %run, phase = %phase, duration_ms = %duration_ms, "Phase completed");
}

/// Log a phase failure. The message is scrubbed of credentials first.
pub fn log_phase_error(run: &str, phase: &str, error: &str, duration_ms: u128) {
    let sanitized = redact_secrets(error);
    error!(
        run = %run,
        phase = %phase,
        duration_ms = %duration_ms,
        error = %sanitized,
        "Phase failed"
    );
}

/// Replace API keys and bearer tokens with `[REDACTED]`.
#[must_use]
pub fn redact_secrets(content: &str) -> String {
    let mut out = content.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        out = pattern.replace_all(&out, "[REDACTED]").into_owned();
    }
    out
}

/// Wall-clock timings per phase for the end-of-run summary.
#[derive(Debug)]
pub struct PhaseTimer {
    started: Instant,
    current: Option<(String, Instant)>,
    timings: BTreeMap<String, Duration>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            timings: BTreeMap::new(),
        }
    }

    /// Begin timing `phase`, closing any phase still open.
    pub fn begin(&mut self, phase: &str) {
        self.finish();
        self.current = Some((phase.to_string(), Instant::now()));
    }

    /// Close the open phase and return its duration.
    pub fn finish(&mut self) -> Option<Duration> {
        let (phase, start) = self.current.take()?;
        let elapsed = start.elapsed();
        *self.timings.entry(phase).or_default() += elapsed;
        Some(elapsed)
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn timings(&self) -> &BTreeMap<String, Duration> {
        &self.timings
    }

    /// One line per phase, e.g. `outline: 12.40s`.
    #[must_use]
    pub fn summary(&self) -> String {
        self.timings
            .iter()
            .map(|(phase, d)| format!("{phase}: {:.2}s", d.as_secs_f64()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
