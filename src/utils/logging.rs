//! Logging utilities
//!
//! Provides logging setup for the binary.

use env_logger::Env;

/// Setup logging, honouring `RUST_LOG` and defaulting to `info`.
pub fn setup_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}
