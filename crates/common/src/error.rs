//! Error taxonomy shared across Reelsmith crates.
//!
//! Engine-internal failures (GStreamer bus errors, ffmpeg exit codes, channel
//! hang-ups) are wrapped into [`ReelsmithError`] before they cross a pipeline
//! boundary. Callers that need to branch on the failure class use
//! [`ReelsmithError::kind`] rather than matching on messages.

use serde::{Deserialize, Serialize};

/// Classification of a failure, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptedFile,
    ProcessingFailed,
    EncodingFailed,
    DecodingFailed,
    EngineInitFailed,
    EngineUnsupported,
    CodecUnsupported,
    TrimFailed,
    ConcatFailed,
    TranscodeFailed,
    StorageQuotaExceeded,
    StorageAccessDenied,
    FileNotFound,
    InsufficientMemory,
    Timeout,
    Cancelled,
    Io,
    Serialization,
    Other,
}

impl ErrorKind {
    /// Stable identifier used in logs and JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::CorruptedFile => "corrupted_file",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::EncodingFailed => "encoding_failed",
            ErrorKind::DecodingFailed => "decoding_failed",
            ErrorKind::EngineInitFailed => "engine_init_failed",
            ErrorKind::EngineUnsupported => "engine_unsupported",
            ErrorKind::CodecUnsupported => "codec_unsupported",
            ErrorKind::TrimFailed => "trim_failed",
            ErrorKind::ConcatFailed => "concat_failed",
            ErrorKind::TranscodeFailed => "transcode_failed",
            ErrorKind::StorageQuotaExceeded => "storage_quota_exceeded",
            ErrorKind::StorageAccessDenied => "storage_access_denied",
            ErrorKind::FileNotFound => "file_not_found",
            ErrorKind::InsufficientMemory => "insufficient_memory",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Other => "other",
        }
    }

    /// Terminal kinds are never retried, on any engine.
    pub fn is_terminal(self) -> bool {
        matches!(self, ErrorKind::UnsupportedFormat | ErrorKind::CorruptedFile)
    }

    /// Kinds that look transient and may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::EngineInitFailed)
    }
}

/// Top-level error type for Reelsmith operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelsmithError {
    #[error("Unsupported format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Corrupted file: {message}")]
    CorruptedFile { message: String },

    #[error("Processing failed: {message}")]
    ProcessingFailed { message: String },

    #[error("Encoding failed: {message}")]
    EncodingFailed { message: String },

    #[error("Decoding failed: {message}")]
    DecodingFailed { message: String },

    #[error("Engine initialization failed: {message}")]
    EngineInitFailed { message: String },

    #[error("Engine unsupported: {message}")]
    EngineUnsupported { message: String },

    #[error("Codec unsupported: {codec}")]
    CodecUnsupported { codec: String },

    #[error("Trim failed for clip {clip_id}: {message}")]
    TrimFailed { clip_id: String, message: String },

    #[error("Concatenation failed: {message}")]
    ConcatFailed { message: String },

    #[error("Transcode failed: {message}")]
    TranscodeFailed { message: String },

    #[error("Storage quota exceeded: {message}")]
    StorageQuotaExceeded { message: String },

    #[error("Storage access denied: {message}")]
    StorageAccessDenied { message: String },

    #[error("Source file {file_id} not found{}", clip_suffix(.clip_id))]
    FileNotFound {
        file_id: String,
        clip_id: Option<String>,
    },

    #[error("Insufficient memory: operation needs ~{required_bytes} bytes, {available_bytes} available")]
    InsufficientMemory {
        required_bytes: u64,
        available_bytes: u64,
    },

    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn clip_suffix(clip_id: &Option<String>) -> String {
    match clip_id {
        Some(id) => format!(" (clip {id})"),
        None => String::new(),
    }
}

/// Result type alias using ReelsmithError.
pub type ReelsmithResult<T> = Result<T, ReelsmithError>;

impl ReelsmithError {
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: msg.into(),
        }
    }

    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::CorruptedFile {
            message: msg.into(),
        }
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed {
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: msg.into(),
        }
    }

    pub fn decoding(msg: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: msg.into(),
        }
    }

    pub fn engine_init(msg: impl Into<String>) -> Self {
        Self::EngineInitFailed {
            message: msg.into(),
        }
    }

    pub fn engine_unsupported(msg: impl Into<String>) -> Self {
        Self::EngineUnsupported {
            message: msg.into(),
        }
    }

    pub fn codec_unsupported(codec: impl Into<String>) -> Self {
        Self::CodecUnsupported {
            codec: codec.into(),
        }
    }

    pub fn trim(clip_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TrimFailed {
            clip_id: clip_id.into(),
            message: msg.into(),
        }
    }

    pub fn concat(msg: impl Into<String>) -> Self {
        Self::ConcatFailed {
            message: msg.into(),
        }
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::TranscodeFailed {
            message: msg.into(),
        }
    }

    pub fn file_not_found(file_id: impl Into<String>) -> Self {
        Self::FileNotFound {
            file_id: file_id.into(),
            clip_id: None,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled {
            message: msg.into(),
        }
    }

    /// Attach the clip that owns a missing source file.
    pub fn for_clip(self, clip: impl Into<String>) -> Self {
        match self {
            Self::FileNotFound { file_id, .. } => Self::FileNotFound {
                file_id,
                clip_id: Some(clip.into()),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::CorruptedFile { .. } => ErrorKind::CorruptedFile,
            Self::ProcessingFailed { .. } => ErrorKind::ProcessingFailed,
            Self::EncodingFailed { .. } => ErrorKind::EncodingFailed,
            Self::DecodingFailed { .. } => ErrorKind::DecodingFailed,
            Self::EngineInitFailed { .. } => ErrorKind::EngineInitFailed,
            Self::EngineUnsupported { .. } => ErrorKind::EngineUnsupported,
            Self::CodecUnsupported { .. } => ErrorKind::CodecUnsupported,
            Self::TrimFailed { .. } => ErrorKind::TrimFailed,
            Self::ConcatFailed { .. } => ErrorKind::ConcatFailed,
            Self::TranscodeFailed { .. } => ErrorKind::TranscodeFailed,
            Self::StorageQuotaExceeded { .. } => ErrorKind::StorageQuotaExceeded,
            Self::StorageAccessDenied { .. } => ErrorKind::StorageAccessDenied,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::InsufficientMemory { .. } => ErrorKind::InsufficientMemory,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Serialization,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Safe, user-facing summary. Never includes raw engine output.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::UnsupportedFormat => {
                "This video format is not supported.".to_string()
            }
            ErrorKind::CorruptedFile => "One of the source videos appears to be damaged.".to_string(),
            ErrorKind::FileNotFound => match self {
                Self::FileNotFound {
                    clip_id: Some(clip),
                    ..
                } => format!("The source video for clip {clip} could not be found."),
                _ => "A source video could not be found.".to_string(),
            },
            ErrorKind::InsufficientMemory => {
                "There is not enough free memory to render this timeline.".to_string()
            }
            ErrorKind::StorageQuotaExceeded => "Storage is full.".to_string(),
            ErrorKind::StorageAccessDenied => "Access to storage was denied.".to_string(),
            ErrorKind::Timeout => "The operation took too long and was stopped.".to_string(),
            ErrorKind::Cancelled => "The render was cancelled.".to_string(),
            ErrorKind::EngineInitFailed | ErrorKind::EngineUnsupported => {
                "The video engine could not be started.".to_string()
            }
            ErrorKind::TrimFailed => "A clip could not be trimmed.".to_string(),
            ErrorKind::ConcatFailed => "The clips could not be joined.".to_string(),
            ErrorKind::TranscodeFailed
            | ErrorKind::EncodingFailed
            | ErrorKind::DecodingFailed
            | ErrorKind::CodecUnsupported => "The video could not be converted.".to_string(),
            ErrorKind::ProcessingFailed
            | ErrorKind::Io
            | ErrorKind::Serialization
            | ErrorKind::Other => "Something went wrong while rendering.".to_string(),
        }
    }

    /// Remediation hints keyed by error kind.
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self.kind() {
            ErrorKind::UnsupportedFormat | ErrorKind::CodecUnsupported => &[
                "Convert the source to MP4 (H.264) or WebM and try again.",
                "Choose a different output format.",
            ],
            ErrorKind::CorruptedFile => &[
                "Re-export or re-download the source video.",
                "Remove the damaged clip from the timeline.",
            ],
            ErrorKind::FileNotFound => &[
                "Re-add the missing source file to the project.",
                "Remove the clip that references it.",
            ],
            ErrorKind::InsufficientMemory => &[
                "Close other applications to free memory.",
                "Use a lower quality preset or a smaller target resolution.",
                "Split the timeline into shorter renders.",
            ],
            ErrorKind::StorageQuotaExceeded => &[
                "Free up disk space and try again.",
                "Remove unused source files from the project.",
            ],
            ErrorKind::StorageAccessDenied => &[
                "Check file permissions for the project and output directories.",
            ],
            ErrorKind::Timeout | ErrorKind::EngineInitFailed | ErrorKind::EngineUnsupported => &[
                "Try again; the first render can take longer while the engine loads.",
                "Check that GStreamer plugins and ffmpeg are installed.",
            ],
            ErrorKind::Cancelled => &[],
            _ => &[
                "Try again.",
                "Try a different quality preset or output format.",
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_names_clip() {
        let err = ReelsmithError::file_not_found("file-9").for_clip("clip-3");
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.to_string(), "Source file file-9 not found (clip clip-3)");
        assert!(err.user_message().contains("clip-3"));
    }

    #[test]
    fn test_for_clip_leaves_other_errors_untouched() {
        let err = ReelsmithError::processing("boom").for_clip("clip-1");
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert_eq!(err.to_string(), "Processing failed: boom");
    }

    #[test]
    fn test_terminal_kinds_are_not_retryable() {
        for kind in [ErrorKind::UnsupportedFormat, ErrorKind::CorruptedFile] {
            assert!(kind.is_terminal());
            assert!(!kind.is_retryable());
        }
        assert!(ErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = ReelsmithError::encoding("x264enc0: internal data stream error (-5)");
        assert!(!err.user_message().contains("x264enc0"));
        assert!(!err.suggestions().is_empty());
    }

    #[test]
    fn test_io_errors_map_to_io_kind() {
        let err: ReelsmithError = std::io::Error::other("disk").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
