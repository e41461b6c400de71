//! Error types and status helpers.

use std::fmt;

use thiserror::Error;
use tonic::metadata::errors::{InvalidMetadataKey, InvalidMetadataValue};
use tonic::{Code, Status};
use tonic_types::{ErrorDetails, StatusExt};

/// Result type for client and server setup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced outside a call's own `Status`.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting, binding or serving failed.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A call failed with a status.
    #[error("call failed: {}", StatusReport::from(.0).summary())]
    Status(#[from] Status),

    /// A metadata key was not a valid header name.
    #[error("invalid metadata key: {0}")]
    InvalidMetadataKey(#[from] InvalidMetadataKey),

    /// A metadata value was not visible ASCII.
    #[error("invalid metadata value: {0}")]
    InvalidMetadataValue(#[from] InvalidMetadataValue),

    /// Reflection service could not be built.
    #[error("reflection error: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// Reading or writing the terminal failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer was unreachable or the connection dropped.
    Transport,
    /// The remote handler failed the call.
    Application,
    /// A stream operation was issued in the wrong state.
    State,
    /// Metadata could not be encoded.
    Metadata,
    /// Local I/O failed.
    Io,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Status(status) => match status.code() {
                Code::Unavailable => ErrorKind::Transport,
                Code::FailedPrecondition => ErrorKind::State,
                _ => ErrorKind::Application,
            },
            Self::InvalidMetadataKey(_) | Self::InvalidMetadataValue(_) => ErrorKind::Metadata,
            Self::Reflection(_) => ErrorKind::Application,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Convert to a tonic Status.
    pub fn to_status(&self) -> Status {
        match self {
            Self::Transport(e) => Status::unavailable(e.to_string()),
            Self::Status(s) => s.clone(),
            Self::InvalidMetadataKey(e) => Status::internal(format!("invalid metadata key: {e}")),
            Self::InvalidMetadataValue(e) => {
                Status::internal(format!("invalid metadata value: {e}"))
            }
            Self::Reflection(e) => Status::internal(e.to_string()),
            Self::Io(e) => Status::internal(e.to_string()),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Message carried by the simulated unary failure.
pub const UNKNOWN_FAILURE_MESSAGE: &str = "unknown error occurred";

/// Build the status returned by `Hello` when failure is simulated.
///
/// The status carries a `google.rpc.DebugInfo` detail whose `detail` field is
/// the given string.
pub fn unknown_failure(detail: impl Into<String>) -> Status {
    Status::with_error_details(
        Code::Unknown,
        UNKNOWN_FAILURE_MESSAGE,
        ErrorDetails::with_debug_info(Vec::<String>::new(), detail),
    )
}

/// Human-readable breakdown of a failed call: code, message and details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Coarse status code.
    pub code: Code,
    /// Message attached by the server.
    pub message: String,
    /// `DebugInfo.detail`, when the status carries one.
    pub debug_detail: Option<String>,
    /// `DebugInfo.stack_entries`, when the status carries them.
    pub stack_entries: Vec<String>,
}

impl StatusReport {
    /// One-line summary used in error messages.
    pub fn summary(&self) -> String {
        match &self.debug_detail {
            Some(detail) => format!("{:?}: {} ({})", self.code, self.message, detail),
            None => format!("{:?}: {}", self.code, self.message),
        }
    }
}

impl From<&Status> for StatusReport {
    fn from(status: &Status) -> Self {
        let details = status.get_error_details();
        let (debug_detail, stack_entries) = match details.debug_info() {
            Some(info) => (Some(info.detail.clone()), info.stack_entries.clone()),
            None => (None, Vec::new()),
        };
        Self {
            code: status.code(),
            message: status.message().to_string(),
            debug_detail,
            stack_entries,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code: {:?}", self.code)?;
        writeln!(f, "message: {}", self.message)?;
        match &self.debug_detail {
            Some(detail) if self.stack_entries.is_empty() => write!(f, "details: [detail: {detail:?}]"),
            Some(detail) => write!(
                f,
                "details: [detail: {detail:?}, stack_entries: {:?}]",
                self.stack_entries
            ),
            None => write!(f, "details: []"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_failure_carries_debug_info() {
        let status = unknown_failure("detail reason of err");
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), UNKNOWN_FAILURE_MESSAGE);

        let report = StatusReport::from(&status);
        assert_eq!(report.debug_detail.as_deref(), Some("detail reason of err"));
        assert!(report.stack_entries.is_empty());
    }

    #[test]
    fn test_report_display() {
        let report = StatusReport::from(&unknown_failure("boom"));
        let rendered = report.to_string();
        assert!(rendered.contains("code: Unknown"), "{rendered}");
        assert!(rendered.contains("message: unknown error occurred"), "{rendered}");
        assert!(rendered.contains("details: [detail: \"boom\"]"), "{rendered}");

        let plain = StatusReport::from(&Status::not_found("missing")).to_string();
        assert!(plain.ends_with("details: []"), "{plain}");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::from(Status::unavailable("down")).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            Error::from(crate::stream::header_already_sent()).kind(),
            ErrorKind::State
        );
        assert_eq!(
            Error::from(unknown_failure("x")).kind(),
            ErrorKind::Application
        );
    }

    #[test]
    fn test_status_round_trip() {
        let status = Status::permission_denied("nope");
        let back = Status::from(Error::from(status));
        assert_eq!(back.code(), Code::PermissionDenied);
        assert_eq!(back.message(), "nope");
    }
}
