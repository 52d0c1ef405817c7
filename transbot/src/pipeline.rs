//! The media pipeline: intake → download → normalize → transcribe → translate → compose.
//!
//! Each stage returns a `Result` and the stages are chained with `?`, so the
//! first failure ends the request. All temporaries live in one [`TempFiles`]
//! owned by [`run`], which drains it before returning on every path.
//! Translation is the one stage whose failure is absorbed: the transcript is
//! delivered on its own.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio;
use crate::compose::{self, DeliveryPayload};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::intake::{self, MediaRequest, NormalizedDescriptor, ValidatedMedia};
use crate::lifecycle::TempFiles;
use crate::transcribe::{self, SpeechToText, TranscriptionResult};
use crate::translate::{self, TranslationResult, Translator};
use crate::transport::{MessageRef, Transport};

/// A stage bounded by a timeout, as reported in `EngineTimeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalize,
    Transcribe,
    Translate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Normalize => "transcoding",
            Stage::Transcribe => "transcription",
            Stage::Translate => "translation",
        })
    }
}

/// Process-wide collaborators, built once at startup and shared by every request.
pub struct Context {
    pub config: Arc<Config>,
    pub transport: Arc<dyn Transport>,
    pub speech: Arc<dyn SpeechToText>,
    pub translator: Arc<dyn Translator>,
}

impl Context {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        speech: Arc<dyn SpeechToText>,
        translator: Arc<dyn Translator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            speech,
            translator,
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug)]
pub struct Outcome {
    pub payload: DeliveryPayload,
    pub transcript: TranscriptionResult,
    pub translation: Option<TranslationResult>,
    /// Why the translation is missing, when it is.
    pub translation_error: Option<Error>,
}

/// Short-lived status replies ("Processing...", "Almost done...").
///
/// Purely informational: send and delete failures are logged and ignored.
pub struct StatusMessages<'a> {
    transport: &'a dyn Transport,
    origin: MessageRef,
    sent: Vec<MessageRef>,
}

impl<'a> StatusMessages<'a> {
    pub fn new(transport: &'a dyn Transport, origin: MessageRef) -> Self {
        Self {
            transport,
            origin,
            sent: Vec::new(),
        }
    }

    pub async fn post(&mut self, text: &str) {
        match self.transport.reply(self.origin, text).await {
            Ok(message) => self.sent.push(message),
            Err(e) => debug!(error = %e, "status message not sent"),
        }
    }

    /// Delete every status message posted so far.
    pub async fn clear(&mut self) {
        for message in self.sent.drain(..) {
            if let Err(e) = self.transport.delete(message).await {
                debug!(error = %e, message_id = message.message_id, "status message not deleted");
            }
        }
    }
}

/// Run one request through the pipeline.
///
/// Validation happens before anything touches the network or disk. Every
/// temporary file created afterwards is removed before this returns.
pub async fn run(
    ctx: &Context,
    request: &MediaRequest,
    status: &mut StatusMessages<'_>,
) -> Result<Outcome> {
    let media = intake::validate(request, ctx.config.limits.max_file_size)?;
    info!(
        kind = %media.kind,
        extension = %media.extension,
        reported_bytes = media.size_bytes,
        "request accepted"
    );
    status
        .post(&format!("Processing {} file...", media.kind))
        .await;

    let mut temps = TempFiles::new(&ctx.config.media.uploads_dir);
    let result = process(ctx, &media, &mut temps, status).await;
    let removed = temps.cleanup();
    debug!(removed, "request temporaries cleaned up");
    result
}

async fn process(
    ctx: &Context,
    media: &ValidatedMedia,
    temps: &mut TempFiles,
    status: &mut StatusMessages<'_>,
) -> Result<Outcome> {
    let config = &ctx.config;

    let upload = fetch(ctx, media, temps).await?;
    audit(ctx, &upload).await;
    status.post("Almost done...").await;

    let canonical = audio::normalize(&upload, temps, &config.media).await?;

    let transcript = transcribe::transcribe(
        ctx.speech.as_ref(),
        &canonical,
        config.transcription.timeout(),
    )
    .await;
    // Canonical audio is only needed by the engine.
    temps.release(&canonical.path);
    let transcript = transcript?;

    let target = &config.translation.target;
    let (translation, translation_error) = match translate::translate(
        ctx.translator.as_ref(),
        &transcript.text,
        target,
        config.translation.timeout(),
    )
    .await
    {
        Ok(t) => (Some(t), None),
        Err(e) => {
            warn!(error = %e, "translation failed, delivering transcript only");
            (None, Some(e))
        }
    };

    let payload = compose::compose(
        &transcript.text,
        translation.as_ref(),
        &config.translation.label(),
        config.limits.max_message_len,
        config.translation.overflow,
    );
    info!(chunks = payload.len(), translated = translation.is_some(), "payload composed");

    Ok(Outcome {
        payload,
        transcript,
        translation,
        translation_error,
    })
}

/// Check the transport's metadata, then download into a fresh temporary.
async fn fetch(
    ctx: &Context,
    media: &ValidatedMedia,
    temps: &mut TempFiles,
) -> Result<NormalizedDescriptor> {
    let limit = ctx.config.limits.max_file_size;

    let remote = ctx.transport.file_info(&media.handle).await?;
    if let Some(size) = remote.size {
        intake::check_size(size, limit)?;
    }

    let local_path = temps.allocate(&media.extension);
    let written = ctx.transport.download(&remote, &local_path).await?;
    intake::check_size(written, limit)?;
    info!(path = %local_path.display(), bytes = written, "upload stored");

    Ok(NormalizedDescriptor {
        kind: media.kind.clone(),
        extension: media.extension.clone(),
        size_bytes: written,
        local_path,
    })
}

/// Forward the original upload to the operator, if configured. Never fails the request.
async fn audit(ctx: &Context, upload: &NormalizedDescriptor) {
    if !ctx.config.media.forward_to_operator {
        return;
    }
    if let Err(e) = ctx
        .transport
        .forward_to_operator(&upload.kind, &upload.local_path)
        .await
    {
        warn!(error = %e, "failed to forward upload to operator");
    }
}
