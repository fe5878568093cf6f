//! Error taxonomy surfaced to callers of the recorder
//!
//! Device backends and file plumbing work with `anyhow`; anything that crosses
//! the session boundary is turned into a [`RecorderError`] with a stable
//! [`ErrorCode`] the presentation layer can match on.

use serde::Serialize;
use std::io;
use std::sync::Arc;

/// Which pending-callback slot a request targeted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Permission,
    Start,
    Stop,
}

impl SlotKind {
    pub fn name(&self) -> &'static str {
        match self {
            SlotKind::Permission => "permission",
            SlotKind::Start => "start",
            SlotKind::Stop => "stop",
        }
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecorderError {
    #[error("No foreground context available to request capture consent")]
    NoHostContext,

    #[error("Screen recording permission denied")]
    PermissionDenied,

    #[error("A recording session is already active")]
    SessionAlreadyActive,

    #[error("A {0} request is already pending")]
    SlotOccupied(SlotKind),

    #[error("Failed to start recording: {0}")]
    StartFailed(String),

    #[error("Failed to stop recording: {0}")]
    StopFailed(String),

    #[error("Session host is not running")]
    HostUnavailable,

    #[error("Recording not found: {0}")]
    FileNotFound(String),

    #[error("Failed to list recordings: {0}")]
    ListFailed(#[source] Arc<io::Error>),

    #[error("Failed to delete recording {id}: {source}")]
    DeleteFailed {
        id: String,
        #[source]
        source: Arc<io::Error>,
    },
}

/// User-facing failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "NO_ACTIVITY")]
    NoActivity,
    #[serde(rename = "PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "RECORDING_ERROR")]
    RecordingError,
    #[serde(rename = "FILE_NOT_FOUND")]
    FileNotFound,
    #[serde(rename = "GET_RECORDINGS_ERROR")]
    GetRecordingsError,
    #[serde(rename = "DELETE_ERROR")]
    DeleteError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoActivity => "NO_ACTIVITY",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RecordingError => "RECORDING_ERROR",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::GetRecordingsError => "GET_RECORDINGS_ERROR",
            ErrorCode::DeleteError => "DELETE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RecorderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RecorderError::NoHostContext => ErrorCode::NoActivity,
            RecorderError::PermissionDenied => ErrorCode::PermissionDenied,
            RecorderError::SessionAlreadyActive
            | RecorderError::SlotOccupied(_)
            | RecorderError::StartFailed(_)
            | RecorderError::StopFailed(_)
            | RecorderError::HostUnavailable => ErrorCode::RecordingError,
            RecorderError::FileNotFound(_) => ErrorCode::FileNotFound,
            RecorderError::ListFailed(_) => ErrorCode::GetRecordingsError,
            RecorderError::DeleteFailed { .. } => ErrorCode::DeleteError,
        }
    }

    pub(crate) fn list_failed(err: io::Error) -> Self {
        RecorderError::ListFailed(Arc::new(err))
    }

    pub(crate) fn delete_failed(id: &str, err: io::Error) -> Self {
        RecorderError::DeleteFailed {
            id: id.to_string(),
            source: Arc::new(err),
        }
    }
}

// Errors cross into the UI as `{ code, message }`
impl Serialize for RecorderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("RecorderError", 2)?;
        state.serialize_field("code", &self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_error_has_a_code() {
        assert_eq!(RecorderError::NoHostContext.code(), ErrorCode::NoActivity);
        assert_eq!(RecorderError::PermissionDenied.code(), ErrorCode::PermissionDenied);
        assert_eq!(
            RecorderError::SlotOccupied(SlotKind::Stop).code(),
            ErrorCode::RecordingError
        );
        assert_eq!(
            RecorderError::FileNotFound("x".into()).code(),
            ErrorCode::FileNotFound
        );
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            RecorderError::list_failed(io).code(),
            ErrorCode::GetRecordingsError
        );
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            RecorderError::delete_failed("rec", io).code(),
            ErrorCode::DeleteError
        );
    }

    #[test]
    fn test_serializes_code_and_message() {
        let json = serde_json::to_value(RecorderError::PermissionDenied).unwrap();
        assert_eq!(json["code"], "PERMISSION_DENIED");
        assert_eq!(json["message"], "Screen recording permission denied");

        let json = serde_json::to_value(RecorderError::SlotOccupied(SlotKind::Start)).unwrap();
        assert_eq!(json["code"], "RECORDING_ERROR");
        assert_eq!(json["message"], "A start request is already pending");
    }
}
