//! Tracing setup for the `spektate` binary.
//!
//! Log lines go to stderr; stdout is reserved for command output so that
//! `spektate deployments --json | jq` keeps working with logging enabled.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client internals are noisy at debug level.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Build the filter: `RUST_LOG` wins, otherwise `level` with the HTTP stack
/// held at warn.
fn filter(level: Level) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    QUIET_TARGETS
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(EnvFilter::new(level.as_str()), |f, d| f.add_directive(d))
}

/// Install the global subscriber. `json` switches to newline-delimited JSON.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let (plain, structured) = if json {
        (None, Some(fmt::layer().with_writer(std::io::stderr).json()))
    } else {
        (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter(level))
        .with(plain)
        .with(structured)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_targets_parse_as_directives() {
        for target in QUIET_TARGETS {
            assert!(
                target.parse::<tracing_subscriber::filter::Directive>().is_ok(),
                "{target}"
            );
        }
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging");
    }
}
