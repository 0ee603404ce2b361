/// Error types for the error monitor daemon
pub mod error;

/// Daemon settings loaded from TOML
pub mod config;

/// One-shot cancellation flag for signal-driven shutdown
pub mod cancel;

/// Results reporting sink
pub mod report;

/// Monitor modules, one per class of hardware errors
pub mod modules;

/// Polling orchestration and run lifecycle
pub mod monitor;

// Re-export commonly used types
pub use cancel::CancellationSignal;
pub use config::{MonitorKind, Settings};
pub use error::{ConfigError, MonitorError, ReportError};
pub use monitor::ErrorMonitor;
pub use report::{JsonlReporter, Reporter};
