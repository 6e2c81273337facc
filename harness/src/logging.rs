//! Diagnostic tracing for evaluation runs.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. They are never
//! part of a run's results: raw agent output, `checks.json` and `meta.json`
//! under `eval/results/` are written regardless of the filter.
//!
//! ```bash
//! RUST_LOG=harness=debug,eval=debug cargo run -p eval -- run go-postgres
//! ```

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber: `RUST_LOG` filter, compact stderr output.
///
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<()> {
    init_with_default(DEFAULT_DIRECTIVE)
}

pub fn init_with_default(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init()
        .map_err(|err| anyhow!("install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        init_with_default("off").expect("first install");
        let err = init().expect_err("already installed");
        assert!(err.to_string().contains("install tracing subscriber"));
    }
}
