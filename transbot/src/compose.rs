//! Turn a transcript (and its translation, if any) into transport-sized messages.
//!
//! Lengths are counted in UTF-16 code units, which is how Telegram measures a
//! message. A slice never ends in the middle of a character, so every chunk is
//! valid text and the chunks concatenate back to the exact input.

use crate::config::OverflowPolicy;
use crate::translate::TranslationResult;

/// Separator between the transcript and the labelled translation.
pub const SEPARATOR: &str = "\n\n";

/// Ordered chunks to send, each within the message limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryPayload {
    pub chunks: Vec<String>,
}

impl DeliveryPayload {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The chunks joined back together.
    pub fn concat(&self) -> String {
        self.chunks.concat()
    }
}

/// `transcript`, separator, then `label: translation`.
pub fn combine(transcript: &str, label: &str, translation: &str) -> String {
    format!("{transcript}{SEPARATOR}{label}: {translation}")
}

/// Build the payload for one request.
///
/// With a translation: the combined text as one chunk when it fits; otherwise
/// either the combined text sliced in order (`Split`) or the transcript alone
/// (`TranscriptOnly`). Without one, the transcript alone.
pub fn compose(
    transcript: &str,
    translation: Option<&TranslationResult>,
    label: &str,
    limit: usize,
    policy: OverflowPolicy,
) -> DeliveryPayload {
    let text = match translation {
        Some(t) => {
            let combined = combine(transcript, label, &t.text);
            if utf16_len(&combined) <= limit || policy == OverflowPolicy::Split {
                combined
            } else {
                transcript.to_string()
            }
        }
        None => transcript.to_string(),
    };

    DeliveryPayload {
        chunks: split_chunks(&text, limit),
    }
}

/// Slice `text` into consecutive pieces of at most `limit` UTF-16 units.
///
/// Every piece except the last is as long as it can be without splitting a
/// character. Limits below 2 are raised to 2 so a surrogate pair always fits.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        let width = ch.len_utf16();
        if units + width > limit {
            chunks.push(text[start..idx].to_string());
            start = idx;
            units = 0;
        }
        units += width;
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}
