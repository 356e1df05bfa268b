//! Unified error types for the bandwatch core library.
//!
//! [`BandwatchError`] covers every failure mode the supervisor can observe.
//! Modules keep their own specific error types ([`LinkError`], `ConfigError`,
//! `RecorderError`, `NotifierError`) and convert into the unified type at the
//! boundary.
//!
//! # Propagation
//!
//! Session failures ([`BandwatchError::Link`], [`BandwatchError::AuthTimeout`],
//! [`BandwatchError::WatchdogTimeout`], [`BandwatchError::InvalidInput`]) are
//! caught only by the session supervisor, which is the single place that
//! retries. Nothing below it reconnects on its own.
//!
//! # Example
//!
//! ```rust
//! use bandwatch_core::error::{BandwatchError, Result};
//!
//! fn check_block(block: &[u8]) -> Result<()> {
//!     if block.len() != 16 {
//!         return Err(BandwatchError::InvalidInput(format!(
//!             "expected 16 bytes, got {}",
//!             block.len()
//!         )));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::link::LinkError;

/// The unified error type for all bandwatch operations.
#[derive(Debug, Error)]
pub enum BandwatchError {
    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// Transport failure at any link call.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The authentication challenge did not arrive in time.
    #[error("Authentication challenge not received within {waited_ms} ms")]
    AuthTimeout {
        /// The bounded wait that elapsed.
        waited_ms: u64,
    },

    /// No heart-rate data while the band is off the charger.
    #[error("Watchdog: no heart-rate data for {silent_secs} seconds")]
    WatchdogTimeout {
        /// Seconds since the last heart-rate sample.
        silent_secs: i64,
    },

    /// Malformed input to the cipher or protocol (configuration or programming error).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A session background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while recording or querying history.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A push notification could not be delivered.
    #[error("Notification failed: {0}")]
    NotificationError(String),
}

/// A specialized [`Result`] type for bandwatch operations.
pub type Result<T> = std::result::Result<T, BandwatchError>;

/// Short alias for [`BandwatchError`].
pub type Error = BandwatchError;

impl BandwatchError {
    /// Returns `true` if this error terminates the current session.
    #[inline]
    #[must_use]
    pub const fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::Link(_)
                | Self::AuthTimeout { .. }
                | Self::WatchdogTimeout { .. }
                | Self::InvalidInput(_)
                | Self::TaskFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if reconnecting is expected to clear the condition.
    ///
    /// Invalid cipher input is a configuration problem: the supervisor still
    /// retries, but the same error will come back until the key is fixed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Link(_) | Self::AuthTimeout { .. } | Self::WatchdogTimeout { .. } | Self::TaskFailed(_)
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Link(_) => "LINK_ERROR",
            Self::AuthTimeout { .. } => "AUTH_TIMEOUT",
            Self::WatchdogTimeout { .. } => "WATCHDOG_TIMEOUT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::TaskFailed(_) => "TASK_FAILED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
            Self::NotificationError(_) => "NOTIFICATION_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BandwatchError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::recorder::RecorderError> for BandwatchError {
    fn from(err: crate::recorder::RecorderError) -> Self {
        use crate::recorder::RecorderError;
        match err {
            RecorderError::CreateDir { path, source } => Self::PersistenceError(format!(
                "Failed to create directory {}: {}",
                path.display(),
                source
            )),
            RecorderError::Sqlite(e) => Self::PersistenceError(e.to_string()),
            RecorderError::Worker(message) => Self::PersistenceError(message),
        }
    }
}

impl From<crate::notifier::NotifierError> for BandwatchError {
    fn from(err: crate::notifier::NotifierError) -> Self {
        Self::NotificationError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
