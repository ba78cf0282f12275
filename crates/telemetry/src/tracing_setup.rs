//! Structured logging for the pipeline binary.
//!
//! Events are emitted inside a root `findings` span carrying the service name
//! and build version, with each background worker in a child `worker` span,
//! so shipped logs from the ingest, archival and reaper paths can be told
//! apart. Settings come from `FINDINGS_LOG_*` variables; `RUST_LOG` takes
//! precedence over `FINDINGS_LOG_FILTER` when both are set.

use std::str::FromStr;
use tracing::{info_span, warn, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Pipeline crates at `info`; broker and HTTP client internals at `warn`.
pub const DEFAULT_FILTER: &str = "info,rskafka=warn,hyper=warn,h2=warn,reqwest=warn";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines for local runs
    #[default]
    Pretty,
    /// One JSON object per event, with the span list, for log shipping
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Recorded on the root span, e.g. `findings-pipeline`
    pub service: String,
    pub version: String,
    /// `EnvFilter` directives
    pub filter: String,
    pub format: LogFormat,
    /// Log when worker spans open and close
    pub span_events: bool,
    /// Settings that could not be read, reported once logging is up
    ignored: Vec<String>,
}

impl TracingConfig {
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
            span_events: false,
            ignored: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, span_events: bool) -> Self {
        self.span_events = span_events;
        self
    }

    /// Read `RUST_LOG`, `FINDINGS_LOG_FILTER`, `FINDINGS_LOG_FORMAT` and
    /// `FINDINGS_LOG_SPANS`.
    pub fn from_env(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self::from_lookup(service, version, |name| std::env::var(name).ok())
    }

    fn from_lookup(
        service: impl Into<String>,
        version: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::new(service, version);
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(filter) = set("RUST_LOG").or_else(|| set("FINDINGS_LOG_FILTER")) {
            config.filter = filter;
        }

        if let Some(raw) = set("FINDINGS_LOG_FORMAT") {
            match raw.parse() {
                Ok(format) => config.format = format,
                Err(e) => config.ignored.push(format!("FINDINGS_LOG_FORMAT: {}", e)),
            }
        }

        if let Some(raw) = set("FINDINGS_LOG_SPANS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.span_events = true,
                "0" | "false" | "no" => config.span_events = false,
                _ => config
                    .ignored
                    .push(format!("FINDINGS_LOG_SPANS: expected a boolean, got '{}'", raw)),
            }
        }

        config
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Install the global subscriber and return the root span.
///
/// Run the service inside the returned span; spawned workers attach their
/// own spans beneath it. A second call leaves the first subscriber in place.
pub fn init_tracing(config: TracingConfig) -> Span {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let filter_valid = EnvFilter::try_new(&config.filter).is_ok();

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(config.env_filter())
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(span_events)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(config.env_filter())
            .with(
                fmt::layer()
                    .with_span_events(span_events)
                    .with_target(true),
            )
            .try_init(),
    };

    let root = info_span!(
        "findings",
        service = %config.service,
        version = %config.version,
    );

    if installed.is_ok() {
        let _entered = root.enter();
        tracing::info!(
            filter = %config.filter,
            format = ?config.format,
            "Logging initialized"
        );
        if !filter_valid {
            warn!(filter = %config.filter, fallback = DEFAULT_FILTER, "Invalid log filter");
        }
        for setting in &config.ignored {
            warn!(setting = %setting, "Ignoring log setting");
        }
    }

    root
}
