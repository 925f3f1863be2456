//! Result and error types for the coverage collector.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by external collaborators (instrumentation engine,
/// renderer, filesystem, host transfer channel).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Errors that can occur while coordinating a coverage report
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The host supplied no test module to instrument
    #[error("{collector}: No test modules found")]
    NoTestModules {
        /// Collector name used as message prefix
        collector: String,
    },

    /// Module preparation failed inside the instrumentation engine
    #[error("Failed to instrument modules for '{module}'")]
    Instrumentation {
        /// Test module being instrumented
        module: String,
        /// Engine failure
        #[source]
        source: BoxError,
    },

    /// The engine could not compute a coverage result
    #[error("Failed to get coverage result for '{module}'")]
    CoverageResult {
        /// Test module whose result was requested
        module: String,
        /// Engine failure
        #[source]
        source: BoxError,
    },

    /// A report was requested without a pending instrumentation handle
    #[error("No instrumentation in progress: instrumentation was never started or its result was already consumed")]
    NoInstrumentation,

    /// Rendering a coverage result failed
    #[error("Failed to get {format} report")]
    Render {
        /// Report format name
        format: String,
        /// Renderer failure
        #[source]
        source: BoxError,
    },

    /// No renderer is registered for the requested format
    #[error("Unknown report format: {format}")]
    UnknownFormat {
        /// Requested format name
        format: String,
    },

    /// Writing the report into scratch storage failed
    #[error("Failed to save coverage report '{file_name}' in directory '{}'", .directory.display())]
    Persist {
        /// Report file name
        file_name: String,
        /// Scratch directory
        directory: PathBuf,
        /// Filesystem failure
        #[source]
        source: BoxError,
    },

    /// Removing the scratch directory failed
    #[error("Failed to cleanup report directory: '{}'", .directory.display())]
    Cleanup {
        /// Scratch directory
        directory: PathBuf,
        /// Filesystem failure
        #[source]
        source: BoxError,
    },

    /// The host transfer channel rejected the file
    #[error("Failed to send coverage report '{}'", .path.display())]
    Transfer {
        /// Report file handed to the channel
        path: PathBuf,
        /// Channel failure
        #[source]
        source: BoxError,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl CollectorError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this failure only means "no coverage this run".
    ///
    /// Every variant degrades; none aborts the host's test run. The split
    /// here separates the instrumentation class (the run simply goes
    /// uninstrumented) from the report class (log and terminate).
    #[must_use]
    pub const fn is_instrumentation_failure(&self) -> bool {
        matches!(
            self,
            Self::NoTestModules { .. }
                | Self::Instrumentation { .. }
                | Self::CoverageResult { .. }
                | Self::NoInstrumentation
        )
    }

    /// Render the error together with its full source chain, the way it is
    /// reported to the host logger.
    #[must_use]
    pub fn to_report_string(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(" ---> ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
