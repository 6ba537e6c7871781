//! Error types for pgbridge.

use thiserror::Error;

use crate::host::{HostRequirement, HostSpec};

/// Result type for pgbridge operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice fields.
#[derive(Debug, Clone, Default)]
pub struct ServerError {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ServerError {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// A host that could not be used during a connection attempt.
#[derive(Debug, Clone)]
pub struct HostFailure {
    /// The host that was tried.
    pub host: HostSpec,
    /// Why it was rejected.
    pub reason: String,
}

impl std::fmt::Display for HostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.host, self.reason)
    }
}

fn display_failures(failures: &[HostFailure]) -> String {
    if failures.is_empty() {
        return "no candidate host was attempted".to_string();
    }
    failures
        .iter()
        .map(HostFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for pgbridge.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ServerError),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS negotiation or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// GSSAPI security context or negotiation failure
    #[error("GSSAPI error: {0}")]
    Gss(String),

    /// Invalid configuration (unknown chooser, malformed placement, bad index)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every candidate host failed or had the wrong role
    #[error(
        "Could not find a server with target server type {requirement}: {}",
        display_failures(.failures)
    )]
    NoHostAvailable {
        /// Role the caller asked for
        requirement: HostRequirement,
        /// Each host that was tried and why it failed
        failures: Vec<HostFailure>,
    },

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., commit while autocommit is on)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Returns true for I/O failures, broken connections and SQLSTATE class 08.
    pub fn is_connection_error(&self) -> bool {
        self.is_connection_broken() || self.sqlstate().is_some_and(|s| s.starts_with("08"))
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(feature = "sync-tls")]
impl From<native_tls::Error> for Error {
    fn from(err: native_tls::Error) -> Self {
        Error::Tls(err.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(severity: &str, code: &str) -> Error {
        Error::Server(ServerError {
            severity: Some(severity.into()),
            code: Some(code.into()),
            message: Some("boom".into()),
            ..Default::default()
        })
    }

    #[test]
    fn connection_class_is_connection_error() {
        assert!(server_error("ERROR", "08006").is_connection_error());
        assert!(!server_error("ERROR", "42704").is_connection_error());
        assert!(server_error("FATAL", "57P01").is_connection_broken());
    }

    #[test]
    fn no_host_available_lists_each_failure() {
        let err = Error::NoHostAvailable {
            requirement: HostRequirement::Primary,
            failures: vec![
                HostFailure {
                    host: HostSpec::new("db1", 5432),
                    reason: "connection refused".into(),
                },
                HostFailure {
                    host: HostSpec::new("db2", 5433),
                    reason: "read-only".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("db1:5432: connection refused"));
        assert!(msg.contains("db2:5433: read-only"));
        assert!(msg.contains("primary"));
    }
}
