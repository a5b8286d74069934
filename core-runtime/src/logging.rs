//! # Logging
//!
//! [`init_logging`] installs a single `tracing-subscriber` registry for a
//! backup process:
//!
//! - an [`EnvFilter`] covering the workspace crates at the chosen level and
//!   the HTTP/database stack at `warn`
//! - a stdout formatter in one of the [`LogFormat`]s
//! - optionally, a layer mirroring events into a host [`LoggerSink`]
//!
//! Events forwarded to a sink carry the chain of enclosing span names
//! (for example `run:item:upload`) and have every field passed through
//! [`redact_if_sensitive`] first.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::from_env()?)?;
//! tracing::info!(archive = "takeout-001.zip", "Archive planned");
//! ```

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_async::runtime;

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const ENV_FORMAT: &str = "PHOTO_BACKUP_LOG_FORMAT";
const ENV_LEVEL: &str = "PHOTO_BACKUP_LOG_LEVEL";
const ENV_FILTER: &str = "RUST_LOG";

const WORKSPACE_TARGETS: &[&str] = &[
    "photo_backup_workspace",
    "core_runtime",
    "core_auth",
    "core_backup",
    "core_service",
    "provider_google_drive",
    "bridge_desktop",
];

const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls", "sqlx"];

/// Stdout rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured; for a terminal
    Pretty,
    /// One JSON object per event; for CI log collectors
    Json,
    /// Single line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config(format!(
                "{} must be one of pretty, json, compact; got '{}'",
                ENV_FORMAT, other
            ))),
        }
    }
}

/// How [`init_logging`] sets up the subscriber.
#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for workspace crates when no explicit filter is given
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; replaces the default filter
    pub filter: Option<String>,
    pub sink: Option<Arc<dyn LoggerSink>>,
    /// Emit enter/exit events for active spans (pretty format only)
    pub span_events: bool,
    pub display_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            sink: None,
            span_events: false,
            display_target: true,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("sink", &self.sink.is_some())
            .field("span_events", &self.span_events)
            .field("display_target", &self.display_target)
            .finish()
    }
}

impl LoggingConfig {
    /// Read `PHOTO_BACKUP_LOG_FORMAT`, `PHOTO_BACKUP_LOG_LEVEL` and
    /// `RUST_LOG`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::default();
        if let Some(v) = get(ENV_FORMAT) {
            config.format = v.parse()?;
        }
        if let Some(v) = get(ENV_LEVEL) {
            config.level = parse_level(&v)?;
        }
        config.filter = get(ENV_FILTER);
        Ok(config)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Mirror events into a host logger.
    pub fn with_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.span_events = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }
}

type Base = Layered<EnvFilter, Registry>;

/// Install the global subscriber. Fails when one is already installed or
/// the filter directives do not parse.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    let stdout: Box<dyn Layer<Base> + Send + Sync> = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.display_target)
            .with_span_events(if config.span_events {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            })
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(config.display_target)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(config.display_target)
            .with_writer(io::stdout)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(config.sink.map(SinkLayer::new))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            let level = level_directive(config.level);
            WORKSPACE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, level))
                .chain(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn parse_level(value: &str) -> Result<LogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(Error::Config(format!(
            "{} must be trace, debug, info, warn or error; got '{}'",
            ENV_LEVEL, other
        ))),
    }
}

// ============================================================================
// Host sink forwarding
// ============================================================================

/// Mirrors events into a [`LoggerSink`] after redaction.
struct SinkLayer {
    sink: Arc<dyn LoggerSink>,
}

impl SinkLayer {
    fn new(sink: Arc<dyn LoggerSink>) -> Self {
        Self { sink }
    }

    fn entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> Option<LogEntry>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let metadata = event.metadata();
        let level = to_log_level(*metadata.level());
        if level < self.sink.min_level() {
            return None;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (name, value) in fields.values {
            let value = redact_if_sensitive(&name, &value);
            entry = entry.with_field(name, value);
        }

        if let Some(scope) = ctx.event_scope(event) {
            let path: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !path.is_empty() {
                entry = entry.with_span_id(path.join(":"));
            }
        }
        Some(entry)
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(entry) = self.entry(event, &ctx) else {
            return;
        };
        let sink = Arc::clone(&self.sink);

        // Inside a runtime the write must not block the emitting task.
        if let Ok(handle) = runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = sink.log(entry).await {
                    eprintln!("log sink rejected entry: {}", e);
                }
            });
            return;
        }

        match runtime::block_on(async move { sink.log(entry).await }) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("log sink rejected entry: {}", e),
            Err(e) => eprintln!("log sink unavailable: {}", e),
        }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Vec<(String, String)>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.values.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}

fn to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

// ============================================================================
// Redaction helpers
// ============================================================================

const SECRET_FIELD_MARKERS: &[&str] = &[
    "token",
    "secret",
    "password",
    "authorization",
    "bearer",
    "api_key",
    "client_secret",
];

/// Value safe to log under `field_name`.
///
/// Credentials (any field whose name mentions a token, secret, password or
/// authorization header) become `[REDACTED]`. Values containing a `Bearer `
/// prefix are masked regardless of the field name, and anything shaped like
/// an email keeps only its first character.
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    let name = field_name.to_ascii_lowercase();
    if SECRET_FIELD_MARKERS.iter().any(|marker| name.contains(marker)) {
        return "[REDACTED]".to_string();
    }

    if let Some(at) = value.find("Bearer ") {
        return format!("{}Bearer [REDACTED]", &value[..at]);
    }

    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !value.contains(' ') => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@[REDACTED]", first)
        }
        _ => value.to_string(),
    }
}

/// Final component of an archive or filesystem path, for log lines that
/// should not leak the operator's directory layout.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
