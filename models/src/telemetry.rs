//! Process-wide logging setup, configured from environment variables:
//!
//! * `TRACING_FILTER_DIRECTIVE`: an `EnvFilter` directive, `info` when unset.
//! * `LOGGING_FORMATTER`: one of `full`, `compact`, `pretty` or `json`.
//! * `LOGGING_ANSI_ENABLED`: `true` to colorize output.
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_TRACING_FILTER_DIRECTIVE: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

/// The message format for logging tracing events.
///
/// See https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/format/index.html
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Human-readable, single-line logs for each event.
    Full,
    /// A variant of the default formatter optimized for short line lengths.
    Compact,
    /// Pretty-formatted multi-line logs optimized for human readability.
    Pretty,
    /// Newline-delimited JSON logs, for collection by the cluster's log pipeline.
    #[default]
    Json,
}

impl MessageFormat {
    fn parse(raw: Option<String>) -> Result<Self> {
        match raw {
            Some(formatter) => serde_plain::from_str(&formatter)
                .context(error::LogFormatterEnvSnafu { env_value: formatter }),
            None => Ok(Self::default()),
        }
    }
}

/// The formatter for logging tracing events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct LogFormatter {
    message_format: MessageFormat,
    ansi_enabled: bool,
}

impl LogFormatter {
    pub fn try_from_env() -> Result<Self> {
        Self::parse(
            env::var(LOGGING_FORMATTER_ENV_VAR).ok(),
            env::var(LOGGING_ANSI_ENABLED_ENV_VAR).ok(),
        )
    }

    fn parse(formatter: Option<String>, ansi_enabled: Option<String>) -> Result<Self> {
        let message_format = MessageFormat::parse(formatter)?;
        let ansi_enabled = match ansi_enabled {
            Some(raw) => raw
                .to_lowercase()
                .parse()
                .context(error::LogAnsiEnvSnafu { env_value: raw })?,
            None => false,
        };

        Ok(Self {
            message_format,
            ansi_enabled,
        })
    }

    /// Adds a formatting layer to a tracing event subscriber.
    fn add_format_layer<S>(&self, event_subscriber: S) -> Box<dyn Subscriber + Send + Sync>
    where
        S: SubscriberExt + Send + Sync + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        // Each formatter produces a distinct layer type, so the finished subscriber is boxed instead.
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => Box::new(event_subscriber.with(layer)),
            MessageFormat::Compact => Box::new(event_subscriber.with(layer.compact())),
            MessageFormat::Pretty => Box::new(event_subscriber.with(layer.pretty())),
            MessageFormat::Json => Box::new(event_subscriber.with(layer.json())),
        }
    }
}

/// Installs the global tracing subscriber. Must be called once, before any events are emitted.
pub fn init_telemetry_from_env() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_TRACING_FILTER_DIRECTIVE.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = Registry::default().with(env_filter);
    let subscriber = LogFormatter::try_from_env()?.add_format_layer(subscriber);

    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)?;

    Ok(())
}

pub mod error {
    use super::*;
    use snafu::Snafu;
    use std::str::ParseBoolError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;

#[cfg(test)]
mod test {
    use super::*;

    fn some(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn test_parse_formatter() {
        let test_cases = vec![
            (None, None, MessageFormat::Json, false),
            (some("pretty"), None, MessageFormat::Pretty, false),
            (some("compact"), some("TRUE"), MessageFormat::Compact, true),
            (some("full"), some("false"), MessageFormat::Full, false),
        ];

        for (formatter, ansi, format, ansi_enabled) in test_cases {
            assert_eq!(
                LogFormatter::parse(formatter, ansi).unwrap(),
                LogFormatter {
                    message_format: format,
                    ansi_enabled,
                }
            );
        }
    }

    #[test]
    fn test_parse_formatter_rejects_garbage() {
        assert!(matches!(
            LogFormatter::parse(some("xml"), None),
            Err(TelemetryConfigError::LogFormatterEnv { .. })
        ));
        assert!(matches!(
            LogFormatter::parse(None, some("yes")),
            Err(TelemetryConfigError::LogAnsiEnv { .. })
        ));
    }
}
