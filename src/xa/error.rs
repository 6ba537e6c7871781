use core::fmt;

use crate::error::Error;

/// Result type for XA operations.
pub type XaResult<T> = core::result::Result<T, XaError>;

/// XA error codes, with their X/Open numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum XaErrorCode {
    /// The branch was rolled back because of an integrity violation.
    RbIntegrity = 102,
    /// Resource manager error.
    RmErr = -3,
    /// Unknown xid.
    Nota = -4,
    /// Invalid arguments.
    Inval = -5,
    /// Call made in the wrong state.
    Proto = -6,
    /// The resource manager is unavailable.
    RmFail = -7,
}

impl XaErrorCode {
    /// The X/Open numeric value.
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RbIntegrity => "XA_RBINTEGRITY",
            Self::RmErr => "XAER_RMERR",
            Self::Nota => "XAER_NOTA",
            Self::Inval => "XAER_INVAL",
            Self::Proto => "XAER_PROTO",
            Self::RmFail => "XAER_RMFAIL",
        }
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failed XA call.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct XaError {
    code: XaErrorCode,
    message: String,
    #[source]
    cause: Option<Error>,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// An error caused by a failed SQL call.
    pub fn with_cause(code: XaErrorCode, message: impl Into<String>, cause: Error) -> Self {
        Self {
            code,
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn code(&self) -> XaErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The driver error behind this one, if any.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }
}
