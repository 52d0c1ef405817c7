use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::Stage;

/// All errors that can occur in transbot.
///
/// The first block is the expected-failure taxonomy of a media request: each
/// of those is reported to the user in plain words and ends (or, for
/// [`Error::TranslationFailure`], degrades) that one request. Everything below
/// it is infrastructure and is treated as unexpected at the request boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported content kind: {0}")]
    UnsupportedKind(String),

    #[error("file name missing or has no extension")]
    MissingFileName,

    #[error("file too large: {size} bytes (limit {limit} bytes)")]
    SizeExceeded { size: u64, limit: u64 },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("audio decoding error: {0}")]
    DecodeFailure(String),

    #[error("speech-to-text engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("transcription produced no text")]
    EmptyTranscript,

    #[error("translation failed: {0}")]
    TranslationFailure(String),

    #[error("{stage} timed out after {}s", after.as_secs())]
    EngineTimeout { stage: Stage, after: Duration },

    #[error("failed to remove temporary file {path}: {source}")]
    CleanupFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("unsupported language: \"{0}\"")]
    UnsupportedLanguage(String),

    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this is one of the request-level failures the pipeline is
    /// expected to produce, as opposed to an infrastructure fault.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedKind(_)
                | Error::MissingFileName
                | Error::SizeExceeded { .. }
                | Error::UnsupportedFormat(_)
                | Error::DecodeFailure(_)
                | Error::EngineUnavailable(_)
                | Error::EmptyTranscript
                | Error::TranslationFailure(_)
                | Error::EngineTimeout { .. }
        )
    }

    /// Short plain-language text sent back to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Error::UnsupportedKind(_) => {
                "Unsupported file format. Please send a supported audio or video file.".into()
            }
            Error::MissingFileName => {
                "Cannot process the file without a valid file name. Please try again with another file."
                    .into()
            }
            Error::SizeExceeded { limit, .. } => {
                format!("Please send a file that is smaller than {}.", format_limit(*limit))
            }
            Error::UnsupportedFormat(ext) => {
                format!("Audio format {ext} is not currently supported for transcription.")
            }
            Error::DecodeFailure(msg) => format!("Error processing the audio: {msg}"),
            Error::EngineUnavailable(_) => {
                "Transcription failed. The result is None. Please try again with another file."
                    .into()
            }
            Error::EmptyTranscript => {
                "Error: Transcription failed. The transcribed text is empty.".into()
            }
            Error::TranslationFailure(msg) => format!("Translation failed: {msg}"),
            Error::EngineTimeout { stage, .. } => {
                format!(
                    "Processing took too long during {stage}. Please try again with a shorter file."
                )
            }
            other => format!("Unexpected error: {other}"),
        }
    }
}

fn format_limit(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}
