//! Logging setup.
//!
//! Logs go to stderr so that stdout stays reserved for answers and command
//! output. The filter comes from `RUST_LOG` when set.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,kopi_rag=info,kopi_rag_core=info";

/// Install the global subscriber. `verbose` lowers our own crates to
/// `debug` when `RUST_LOG` is not set.
pub fn init_logging(verbose: bool) -> Result<()> {
    let fallback = if verbose {
        "warn,kopi_rag=debug,kopi_rag_core=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
