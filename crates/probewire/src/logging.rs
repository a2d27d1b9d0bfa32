//! Subscriber setup shared by the binaries.
//!
//! `RUST_LOG` takes precedence. Otherwise `PROBEWIRE_LOG` picks one level for
//! the probewire targets. `LOG_FORMAT=json` switches to JSON lines. Output
//! always goes to stderr: stdout is the channel in a worker.

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const TARGETS: &[&str] = &["probewire", "probewire_echo", "probewire_ctl"];

/// Logging choices read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives.
    pub directives: String,
    pub json: bool,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let directives = var("RUST_LOG").unwrap_or_else(|| {
            let level = match var("PROBEWIRE_LOG").as_deref() {
                Some("trace") => "trace",
                Some("debug") => "debug",
                Some("warn" | "warning") => "warn",
                Some("error") => "error",
                _ => "info",
            };
            TARGETS
                .iter()
                .map(|target| format!("{target}={level}"))
                .collect::<Vec<_>>()
                .join(",")
        });
        Self {
            directives,
            json: var("LOG_FORMAT").as_deref() == Some("json"),
        }
    }
}

/// Install the global subscriber from the environment. Later calls are no-ops.
pub fn init_tracing() {
    init_with(&LogSettings::from_env());
}

pub fn init_with(settings: &LogSettings) {
    // A worker's stderr is usually a pipe or /dev/null
    let stderr_is_tty = std::io::stderr().is_terminal();
    let output = if settings.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(stderr_is_tty)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(&settings.directives))
        .with(output)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<_, _> = vars.iter().copied().collect();
        LogSettings::from_vars(|name| vars.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn level_applies_to_every_binary() {
        insta::assert_snapshot!(
            settings(&[("PROBEWIRE_LOG", "debug")]).directives,
            @"probewire=debug,probewire_echo=debug,probewire_ctl=debug"
        );
        assert_eq!(
            settings(&[("PROBEWIRE_LOG", "warning")]).directives,
            settings(&[("PROBEWIRE_LOG", "warn")]).directives
        );
        assert_eq!(
            settings(&[("PROBEWIRE_LOG", "loud")]),
            settings(&[])
        );
    }

    #[test]
    fn rust_log_wins() {
        let s = settings(&[("RUST_LOG", "probewire::pipe=trace"), ("PROBEWIRE_LOG", "error")]);
        assert_eq!(s.directives, "probewire::pipe=trace");
        assert!(!s.json);
    }

    #[test]
    fn json_format() {
        assert!(settings(&[("LOG_FORMAT", "json")]).json);
        assert!(!settings(&[("LOG_FORMAT", "pretty")]).json);
    }
}
