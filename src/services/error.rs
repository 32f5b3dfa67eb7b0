use std::time::Duration;
use thiserror::Error;

/// Designed no-op terminations. Neither is a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    #[error("object is already a resized derivative")]
    AlreadyProcessed,

    #[error("could not determine the image type from the key")]
    UnknownType,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Source object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Transient I/O error: {0}")]
    Transient(String),

    #[error("Source object exceeds {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Upload aborted before the stream was finished")]
    Aborted,

    #[error("Sink stopped accepting data")]
    SinkClosed,

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl PipelineError {
    /// Stable classification attached to failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidEvent(_) => "InvalidEvent",
            PipelineError::NotFound(_) => "NotFound",
            PipelineError::AccessDenied(_) => "AccessDenied",
            PipelineError::Transient(_) => "TransientIOError",
            PipelineError::SourceTooLarge { .. } => "SourceTooLarge",
            PipelineError::Decode(_) => "DecodeError",
            PipelineError::Encode(_) => "EncodeError",
            PipelineError::Upload(_) => "UploadError",
            PipelineError::Aborted => "UploadAborted",
            PipelineError::SinkClosed => "SinkClosed",
            PipelineError::DeadlineExceeded(_) => "DeadlineExceeded",
        }
    }

    /// Whether the host may usefully retry the invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_)
                | PipelineError::Transient(_)
                | PipelineError::Upload(_)
                | PipelineError::Aborted
                | PipelineError::SinkClosed
                | PipelineError::DeadlineExceeded(_)
        )
    }

    /// Message handed back to the host: classification plus original error.
    pub fn reason(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => PipelineError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => PipelineError::AccessDenied(err.to_string()),
            _ => PipelineError::Transient(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_is_not_retryable() {
        let err = PipelineError::Decode("bad header".into());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "DecodeError");
        assert_eq!(err.reason(), "DecodeError: Failed to decode image: bad header");
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(PipelineError::Transient("reset".into()).is_retryable());
        assert!(PipelineError::Upload("500".into()).is_retryable());
        assert!(!PipelineError::AccessDenied("nope".into()).is_retryable());
    }

    #[test]
    fn test_io_error_classification() {
        let err: PipelineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "NotFound");
        let err: PipelineError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(err.kind(), "TransientIOError");
    }
}
