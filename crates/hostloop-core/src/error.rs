//! Error types for hostloop-core.

use thiserror::Error;

/// Result type for hostloop-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hostloop-core.
///
/// Faults inside a running program are not errors of this type: they end the
/// run and are reported on the primary serial port instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to spawn the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A worker thread is already active for this manager.
    #[error("worker thread already started")]
    AlreadyStarted,

    /// The execution loop no longer accepts work.
    #[error("execution loop is not running")]
    NotRunning,

    /// Posted work was discarded before it could run.
    #[error("posted work was dropped before completion")]
    Disconnected,

    /// Blocking program access requested from the loop thread itself.
    #[error("program is already borrowed on the loop thread")]
    Reentrant,

    /// Lifecycle operation requested from inside a loop thread.
    #[error("lifecycle operation called from a loop thread")]
    LoopThreadCall,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Render the error together with a recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Spawn(_) => "check the process thread limits",
            Error::AlreadyStarted => "stop the worker before starting it again",
            Error::NotRunning | Error::Disconnected => {
                "the program has stopped; inspect the serial output and start it again"
            }
            Error::Reentrant => "use post_to_program from inside the loop thread",
            Error::LoopThreadCall => "request cancellation from the program instead",
            Error::Config(_) | Error::Json(_) => "fix the configuration file or flags",
            Error::Io(_) => "check the file path and permissions",
        };
        format!("{}\n  hint: {}", self, hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_hint_includes_message() {
        let rendered = Error::Config("line_capacity must be > 0".into()).with_hint();
        assert!(rendered.starts_with("invalid configuration: line_capacity"));
        assert!(rendered.contains("hint:"));
    }
}
