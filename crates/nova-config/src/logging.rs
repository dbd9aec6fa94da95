use std::path::PathBuf;
use std::sync::{Arc, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt, TestWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level name or `EnvFilter` directives, e.g. `nova.pom.cache=trace,info`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Log file, opened for appending. Unopenable files are reported once and
    /// skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// `level` as filter directives. Bare level names are matched loosely
    /// (`WARNING` reads as `warn`); anything else passes through untouched.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        let lowered = level.to_ascii_lowercase();
        match lowered.as_str() {
            "" => Self::default_level(),
            "warning" => "warn".to_owned(),
            "trace" | "debug" | "info" | "warn" | "error" | "off" => lowered,
            _ => level.to_owned(),
        }
    }

    /// Filter built from `level`, with `RUST_LOG` directives appended so they
    /// take precedence for the targets they name. Directives that fail to
    /// parse fall back to the configured level, then to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        let configured = self.directives();
        let from_env = std::env::var("RUST_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty());

        from_env
            .and_then(|env| EnvFilter::try_new(format!("{configured},{}", env.trim())).ok())
            .or_else(|| EnvFilter::try_new(&configured).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    fn writer(&self) -> (BoxMakeWriter, Option<std::io::Error>) {
        let mut writer = BoxMakeWriter::new(std::io::sink);
        if self.stderr {
            // Test binaries run with debug assertions; `TestWriter` keeps
            // their output captured per test.
            writer = if cfg!(debug_assertions) {
                BoxMakeWriter::new(writer.and(TestWriter::with_stderr))
            } else {
                BoxMakeWriter::new(writer.and(std::io::stderr))
            };
        }

        let Some(path) = &self.file else {
            return (writer, None);
        };
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(writer.and(Arc::new(file))), None),
            Err(err) => (writer, Some(err)),
        }
    }
}

static INIT: Once = Once::new();

/// Installs the global `tracing` subscriber described by `config`.
///
/// Only the first call in a process has an effect, and only when no other
/// global subscriber was installed before it.
pub fn init_tracing(config: &LoggingConfig) {
    INIT.call_once(|| {
        let (writer, file_error) = config.writer();
        let format = tracing_subscriber::fmt::layer().with_ansi(false);
        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            format.json().with_writer(writer).boxed()
        } else {
            format.with_writer(writer).boxed()
        };

        let subscriber = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return;
        }
        if let (Some(err), Some(path)) = (file_error, &config.file) {
            tracing::warn!(
                target: "nova.config",
                path = %path.display(),
                error = %err,
                "log file could not be opened; logging to the remaining outputs"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(level: &str) -> String {
        LoggingConfig {
            level: level.to_owned(),
            ..LoggingConfig::default()
        }
        .directives()
    }

    #[test]
    fn level_names_are_matched_loosely() {
        assert_eq!(level(" WARNING "), "warn");
        assert_eq!(level("Debug"), "debug");
        assert_eq!(level(""), "info");
        assert_eq!(level("nova.pom=debug,info"), "nova.pom=debug,info");
    }
}
