//! Error taxonomy shared by the unary and realtime clients.
//!
//! Every request outcome is a `Result<T, ClientError>`. The [`ErrorKind`]
//! tells callers what went wrong without string matching; the message keeps
//! whatever detail the transport or server supplied.

use std::fmt;

/// Classification of a failed request or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server could not be reached, or the connection dropped.
    ConnectionError,
    /// The connection was up but the transport failed mid-use.
    TransportError,
    /// The client itself reached an inconsistent state.
    InternalError,
    /// The requested entity does not exist.
    NotFound,
    /// The entity being created already exists.
    AlreadyExists,
    /// The request was rejected as malformed.
    InvalidArgument,
    /// Credentials were missing or invalid.
    Unauthenticated,
    /// Credentials were valid but lack permission.
    PermissionDenied,
    /// The request was cancelled locally before it completed.
    CancelledByUser,
    /// Anything the server reported that has no better mapping.
    Unknown,
}

impl ErrorKind {
    /// Map a gRPC status code, as carried in server error bodies.
    pub fn from_grpc_code(code: i64) -> Self {
        match code {
            1 => ErrorKind::CancelledByUser,
            3 => ErrorKind::InvalidArgument,
            5 => ErrorKind::NotFound,
            6 => ErrorKind::AlreadyExists,
            7 => ErrorKind::PermissionDenied,
            13 => ErrorKind::InternalError,
            14 => ErrorKind::ConnectionError,
            16 => ErrorKind::Unauthenticated,
            _ => ErrorKind::Unknown,
        }
    }

    /// Map an HTTP status for responses that carry no structured error body.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidArgument,
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::AlreadyExists,
            499 => ErrorKind::CancelledByUser,
            500 => ErrorKind::InternalError,
            502..=504 => ErrorKind::ConnectionError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Map a realtime envelope error code.
    pub fn from_rt_code(code: i64) -> Self {
        match code {
            3 => ErrorKind::InvalidArgument,
            4 | 6 => ErrorKind::NotFound,
            5 => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown,
        }
    }

    /// Stable name used in log output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::CancelledByUser => "cancelled_by_user",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request or connection failure delivered to a continuation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    /// What class of failure this is.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ClientError {
    /// Build an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::CancelledByUser`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CancelledByUser, message)
    }

    /// Shorthand for [`ErrorKind::InternalError`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Shorthand for [`ErrorKind::ConnectionError`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, message)
    }

    /// Shorthand for [`ErrorKind::TransportError`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }
}
