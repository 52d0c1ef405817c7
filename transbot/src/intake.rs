//! Intake validation: decide whether an inbound attachment is worth fetching.

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};

/// What kind of attachment a message carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Audio,
    Video,
    /// Anything else (voice note, document, photo, ...), named for logging.
    Other(String),
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Audio => f.write_str("audio"),
            ContentKind::Video => f.write_str("video"),
            ContentKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// An inbound media reference, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub content_kind: ContentKind,
    pub file_name: Option<String>,
    /// Size claimed by the transport. Advisory: re-checked after download.
    pub reported_size: u64,
    /// Opaque handle used to fetch the content (a Telegram `file_id`).
    pub handle: String,
}

/// A request that passed validation. Nothing has been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMedia {
    pub kind: ContentKind,
    /// Lower-case extension taken from the declared file name.
    pub extension: String,
    pub size_bytes: u64,
    pub handle: String,
}

/// A validated upload that now lives on local disk.
///
/// The file at `local_path` is registered with the request's
/// [`TempFiles`](crate::lifecycle::TempFiles), which removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDescriptor {
    pub kind: ContentKind,
    pub extension: String,
    pub size_bytes: u64,
    pub local_path: PathBuf,
}

/// Validate a request against the size limit. Performs no I/O.
pub fn validate(request: &MediaRequest, max_size: u64) -> Result<ValidatedMedia> {
    let kind = match &request.content_kind {
        ContentKind::Audio | ContentKind::Video => request.content_kind.clone(),
        ContentKind::Other(other) => return Err(Error::UnsupportedKind(other.clone())),
    };

    let extension = request
        .file_name
        .as_deref()
        .and_then(extension_of)
        .ok_or(Error::MissingFileName)?;

    check_size(request.reported_size, max_size)?;

    debug!(%kind, %extension, size = request.reported_size, "request validated");

    Ok(ValidatedMedia {
        kind,
        extension,
        size_bytes: request.reported_size,
        handle: request.handle.clone(),
    })
}

/// Fail with `SizeExceeded` when `size` is above `max_size`.
pub fn check_size(size: u64, max_size: u64) -> Result<()> {
    if size > max_size {
        Err(Error::SizeExceeded {
            size,
            limit: max_size,
        })
    } else {
        Ok(())
    }
}

/// Substring after the last `.`, lower-cased.
///
/// `None` when there is no dot, nothing follows it, or what follows is not a
/// plain alphanumeric extension (it ends up in a local file name).
fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.trim();
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        None
    } else {
        Some(ext.to_lowercase())
    }
}
