//! Tracing initialization for the Weft driver.
//!
//! Controlled by environment variables:
//! - `WEFT_LOG`: filter string (`RUST_LOG` syntax). Falls back to
//!   `RUST_LOG`.
//!
//! When neither is set, defaults to `warn`.

use std::sync::OnceLock;

use tracing_subscriber::{prelude::*, EnvFilter, Registry};

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize the tracing subscriber.
///
/// Calling it again is harmless; only the first call takes effect.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env("WEFT_LOG")
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        Registry::default()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .with(filter)
            .init();
    });
}
