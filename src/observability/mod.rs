//! Observability module providing structured logging.
//!
//! Log output is configured by `[observability.logging]`: level, format
//! (pretty, compact, JSON), timestamps, file/line locations and extra filter
//! directives. `RUST_LOG` overrides the configured filter.

mod tracing_init;

pub use tracing_init::*;
