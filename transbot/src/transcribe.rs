use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{self, CanonicalAudio};
use crate::config::{Language, TranscriptionConfig};
use crate::error::{Error, Result};
use crate::model;
use crate::pipeline::Stage;

/// Successful transcription of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionResult {
    /// Never empty.
    pub text: String,
    /// Spoken language reported by the engine, when it reports one.
    pub language: Option<String>,
}

/// Raw output of a speech-to-text engine, before the stage applies its rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutput {
    pub text: Option<String>,
    pub language: Option<String>,
}

/// A speech-to-text capability.
///
/// `Ok(None)` means the engine ran but produced no result at all.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &CanonicalAudio) -> Result<Option<EngineOutput>>;

    /// Model tier, for logging.
    fn model_name(&self) -> &str;
}

/// Run the transcription stage: one bounded engine call, no retry.
pub async fn transcribe(
    engine: &dyn SpeechToText,
    audio: &CanonicalAudio,
    timeout: Duration,
) -> Result<TranscriptionResult> {
    info!(model = engine.model_name(), path = %audio.path.display(), "transcribing");

    let output = tokio::time::timeout(timeout, engine.transcribe(audio))
        .await
        .map_err(|_| Error::EngineTimeout {
            stage: Stage::Transcribe,
            after: timeout,
        })?
        .map_err(|e| match e {
            e if e.is_expected() => e,
            other => Error::EngineUnavailable(other.to_string()),
        })?
        .ok_or_else(|| Error::EngineUnavailable("engine returned no result".into()))?;

    let text = output.text.unwrap_or_default();
    if text.is_empty() {
        return Err(Error::EmptyTranscript);
    }

    info!(chars = text.chars().count(), language = ?output.language, "transcription complete");
    Ok(TranscriptionResult {
        text,
        language: output.language,
    })
}

/// whisper.cpp engine. The model is loaded once and shared by all requests;
/// each call gets its own decoder state on the blocking pool.
pub struct WhisperEngine {
    ctx: Arc<WhisperContext>,
    language: Language,
    threads: Option<u32>,
    model_name: String,
}

impl WhisperEngine {
    /// Resolve (and if needed download) the configured model, then load it.
    pub async fn load(config: &TranscriptionConfig) -> Result<Self> {
        let language = Language::new(&config.language)?;
        let model_path = model::ensure_model(&config.model, &config.resolve_cache_dir()).await?;
        let gpu = config.gpu;

        let ctx = tokio::task::spawn_blocking(move || load_context(&model_path, gpu))
            .await
            .map_err(|e| Error::Model(format!("model loader panicked: {e}")))??;

        Ok(Self {
            ctx: Arc::new(ctx),
            language,
            threads: config.threads,
            model_name: config.model.name().to_string(),
        })
    }
}

fn load_context(model_path: &Path, gpu: bool) -> Result<WhisperContext> {
    info!(model = %model_path.display(), gpu, "loading whisper model");

    let mut ctx_params = WhisperContextParameters::new();
    ctx_params.use_gpu(gpu);

    let path = model_path
        .to_str()
        .ok_or_else(|| Error::Model("model path contains invalid UTF-8".into()))?;
    Ok(WhisperContext::new_with_params(path, ctx_params)?)
}

#[async_trait]
impl SpeechToText for WhisperEngine {
    async fn transcribe(&self, audio: &CanonicalAudio) -> Result<Option<EngineOutput>> {
        let ctx = Arc::clone(&self.ctx);
        let language = self.language.clone();
        let threads = self.threads;
        let audio = audio.clone();

        tokio::task::spawn_blocking(move || {
            let samples = audio::read_samples(&audio)?;
            run_whisper(&ctx, &samples, &language, threads).map(Some)
        })
        .await
        .map_err(|e| Error::EngineUnavailable(format!("whisper worker panicked: {e}")))?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn run_whisper(
    ctx: &WhisperContext,
    samples: &[f32],
    language: &Language,
    threads: Option<u32>,
) -> Result<EngineOutput> {
    let mut state = ctx.create_state()?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    params.set_language(Some(language.code().unwrap_or("auto")));
    params.set_translate(false);
    if let Some(n) = threads {
        params.set_n_threads(n as i32);
    }
    // Keep whisper.cpp off stderr.
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_print_special(false);

    debug!(samples = samples.len(), "running whisper");
    state.full(params, samples)?;

    let num_segments = state.full_n_segments();
    let mut parts = Vec::with_capacity(num_segments.max(0) as usize);
    for i in 0..num_segments {
        let segment = state
            .get_segment(i)
            .ok_or_else(|| Error::EngineUnavailable(format!("segment {i} not found")))?;
        let text = segment
            .to_str_lossy()
            .map_err(|e| Error::EngineUnavailable(format!("segment text error: {e}")))?;
        let text = text.trim();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    }
    debug!(num_segments, "whisper finished");

    let language = whisper_rs::get_lang_str(state.full_lang_id_from_state()).map(String::from);

    Ok(EngineOutput {
        text: Some(parts.join(" ")),
        language,
    })
}
