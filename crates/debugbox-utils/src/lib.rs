//! # debugbox Utilities
//!
//! Logging setup shared by the debugbox binaries, built on `tracing`.

pub mod logging;

// Re-export commonly used logging items for convenience
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LoggingError};
pub use tracing::{debug, error, info, trace, warn};
