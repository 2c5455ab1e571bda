//! Error types for the probe engine.
//!
//! Two layers:
//!
//! - [`OperationError`]: a single driver call failed (timeout, HTTP status,
//!   missing element). Recoverable; reduced to an `OperationResult` or a
//!   failing test case.
//! - [`Error`]: engine-level failures. Only `Setup` and `Teardown` abort a
//!   run; everything else is captured per test case.

use thiserror::Error;

/// Failure of one driver capability call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// The call did not settle within its per-call timeout
    #[error("timeout")]
    Timeout,

    /// The driver variant does not offer this capability
    #[error("unsupported capability: {0}")]
    Unsupported(&'static str),

    /// HTTP 401
    #[error("unauthenticated (401)")]
    Unauthenticated,

    /// HTTP 403
    #[error("forbidden (403)")]
    Forbidden,

    /// HTTP 404 or an id that does not resolve
    #[error("not found")]
    NotFound,

    /// Any other non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Envelope carried `success: false`
    #[error("rejected: {0}")]
    Rejected(String),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be interpreted
    #[error("decode error: {0}")]
    Decode(String),

    /// UI locator did not resolve to an element
    #[error("element not found: {0}")]
    ElementNotFound(String),
}

impl OperationError {
    /// Map a non-success HTTP status to an operation error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            _ => Self::Http {
                status,
                message: message.into(),
            },
        }
    }

    /// True for 401/403, the two access-denied outcomes.
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Forbidden)
    }
}

/// Engine-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Lookup of an entity type with no descriptor and no default fallback
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Rejected registry registration
    #[error("Registration error: {0}")]
    Registration(String),

    /// A driver call failed where the caller could not continue
    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),

    /// A check could not establish the state it needs (e.g. parent create failed)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Run setup failed; fatal
    #[error("Run setup failed: {0}")]
    Setup(String),

    /// Run teardown failed; fatal
    #[error("Run teardown failed: {0}")]
    Teardown(String),

    /// Orchestrator state machine misuse
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Filesystem errors
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed JSON/TOML input
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Returns the process exit code for this error.
    ///
    /// - 1: user error (configuration, unknown entity type, bad input)
    /// - 2: system error (setup/teardown, IO, state machine)
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_)
            | Self::UnknownEntityType(_)
            | Self::Registration(_)
            | Self::Parse(_)
            | Self::Operation(_)
            | Self::Precondition(_) => 1,
            Self::Setup(_) | Self::Teardown(_) | Self::InvalidTransition { .. } | Self::Io(_) => 2,
        }
    }

    /// True when the error aborts the whole run rather than one case.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::Teardown(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(format!("Failed to parse config: {err}"))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
