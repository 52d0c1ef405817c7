//! Telegram bot that turns voice in audio/video uploads into text and a translation.
//!
//! **transbot** runs each upload through one pipeline: intake validation,
//! download into a scoped temporary, transcoding to canonical audio (via
//! ffmpeg), transcription (via whisper.cpp), translation into the configured
//! language, and splitting the result into Telegram-sized messages.
//!
//! # Embedding the pipeline
//!
//! ```rust,no_run
//! # async fn demo() -> transbot::Result<()> {
//! use std::sync::Arc;
//! use transbot::{
//!     Config, Context, GoogleTranslator, TelegramClient, TelegramTransport, WhisperEngine,
//! };
//!
//! let config = Config::load(std::path::Path::new("transbot.toml"))?;
//! let client = Arc::new(TelegramClient::new(&config.telegram.api_base, &config.telegram.token));
//! let operator = config.telegram.operator_chat_id.unwrap_or_default();
//! let ctx = Context::new(
//!     config.clone(),
//!     Arc::new(TelegramTransport::new(client.clone(), operator)),
//!     Arc::new(WhisperEngine::load(&config.transcription).await?),
//!     Arc::new(GoogleTranslator::new(&config.translation.endpoint)),
//! );
//! transbot::Bot::new(client, Arc::new(ctx)).run(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod bot;
pub mod compose;
pub mod config;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod model;
pub mod pipeline;
pub mod telegram;
pub mod transcribe;
pub mod translate;
pub mod transport;

pub use bot::Bot;
pub use config::{Config, Language, Model, OverflowPolicy};
pub use error::{Error, Result};
pub use intake::{ContentKind, MediaRequest};
pub use pipeline::{Context, Outcome, Stage};
pub use telegram::{TelegramClient, TelegramTransport};
pub use transcribe::{SpeechToText, WhisperEngine};
pub use translate::{GoogleTranslator, Translator};
pub use transport::{MessageRef, RemoteFile, Transport};
