//! Error vocabulary of the policy queue.
//!
//! [`QueueError`] is what fallible operations return. [`ErrorCode`] is its
//! stable numeric form, for callers that report status as a small integer
//! (including `Success`, which has no error counterpart).

use std::fmt;
use std::io;

use thiserror::Error;

/// Stable status codes. The discriminants never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// The operation completed.
    Success = 0,
    /// Admission failed under a policy that neither blocks nor overwrites.
    QueueIsFull = 1,
    /// A read found nothing published.
    QueueIsEmpty = 2,
    /// Reserved fallback; not produced by normal operation.
    Unknown = 3,
}

impl ErrorCode {
    /// Numeric value of the code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a numeric code. Unrecognised values map to [`ErrorCode::Unknown`].
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Success,
            1 => Self::QueueIsFull,
            2 => Self::QueueIsEmpty,
            _ => Self::Unknown,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::QueueIsFull => "queue is full",
            Self::QueueIsEmpty => "queue is empty",
            Self::Unknown => "unknown error",
        }
    }

    /// Returns `true` for [`ErrorCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl<T> From<&Result<T, QueueError>> for ErrorCode {
    fn from(result: &Result<T, QueueError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.code(),
        }
    }
}

/// Errors returned by policy queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum QueueError {
    /// Admission failed and the policy rejects instead of blocking or
    /// overwriting.
    #[error("queue is full")]
    QueueIsFull,
    /// Nothing was published when a read was attempted.
    #[error("queue is empty")]
    QueueIsEmpty,
    /// Reserved fallback.
    #[error("unknown error")]
    Unknown,
}

impl QueueError {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::QueueIsFull => ErrorCode::QueueIsFull,
            Self::QueueIsEmpty => ErrorCode::QueueIsEmpty,
            Self::Unknown => ErrorCode::Unknown,
        }
    }
}

/// Error converting [`ErrorCode::Success`] into a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("success is not an error")]
pub struct NotAnError;

impl TryFrom<ErrorCode> for QueueError {
    type Error = NotAnError;

    fn try_from(code: ErrorCode) -> Result<Self, Self::Error> {
        match code {
            ErrorCode::Success => Err(NotAnError),
            ErrorCode::QueueIsFull => Ok(Self::QueueIsFull),
            ErrorCode::QueueIsEmpty => Ok(Self::QueueIsEmpty),
            ErrorCode::Unknown => Ok(Self::Unknown),
        }
    }
}

impl From<QueueError> for io::Error {
    fn from(err: QueueError) -> Self {
        let kind = match err {
            QueueError::QueueIsFull | QueueError::QueueIsEmpty => io::ErrorKind::WouldBlock,
            QueueError::Unknown => io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}
