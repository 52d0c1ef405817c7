//! Configuration for the bot, loaded once at process start.
//!
//! Values come from a TOML file (missing file means defaults), then secrets
//! and a few deployment knobs are overridden from the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default upper bound on an accepted upload (20 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Telegram's hard cap on a single text message.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Extensions the normalizer knows how to demux.
pub const DEFAULT_EXTENSIONS: [&str; 7] = ["wav", "mp3", "mp4", "m4a", "webm", "mov", "ogg"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub limits: LimitsConfig,
    pub media: MediaConfig,
    pub transcription: TranscriptionConfig,
    pub translation: TranslationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot credential. Usually supplied through `BOT_TOKEN`.
    pub token: String,
    /// Chat that receives startup notices and forwarded uploads (`ADMIN_USER_ID`).
    pub operator_chat_id: Option<i64>,
    pub api_base: String,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            operator_chat_id: None,
            api_base: "https://api.telegram.org".into(),
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_size: u64,
    /// Maximum message length, counted in UTF-16 code units.
    pub max_message_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Scratch area for uploads and canonical audio.
    pub uploads_dir: PathBuf,
    pub supported_extensions: Vec<String>,
    /// ffmpeg binary used for transcoding.
    pub ffmpeg: PathBuf,
    pub transcode_timeout_secs: u64,
    /// Forward every upload to the operator chat before transcoding.
    pub forward_to_operator: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ffmpeg: PathBuf::from("ffmpeg"),
            transcode_timeout_secs: 300,
            forward_to_operator: true,
        }
    }
}

impl MediaConfig {
    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn is_supported(&self, extension: &str) -> bool {
        self.supported_extensions.iter().any(|e| e == extension)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub model: Model,
    /// Spoken-language hint for whisper, or "auto".
    pub language: String,
    pub gpu: bool,
    pub threads: Option<u32>,
    pub cache_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: Model::Small,
            language: "auto".into(),
            gpu: true,
            threads: None,
            cache_dir: None,
            timeout_secs: 900,
        }
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the cache directory, defaulting to ~/.cache/transbot/models.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("transbot")
                .join("models")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Destination language code, e.g. "uz".
    pub target: String,
    /// Prefix shown before the translated text. Derived from `target` when unset.
    pub label: Option<String>,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub overflow: OverflowPolicy,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target: "uz".into(),
            label: None,
            endpoint: "https://translate.googleapis.com".into(),
            timeout_secs: 30,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl TranslationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        match self.target.as_str() {
            "uz" => "🇺🇿".into(),
            code => code.to_uppercase(),
        }
    }
}

/// What to do when transcript plus translation exceed one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Slice the combined text into consecutive messages.
    #[default]
    Split,
    /// Send the transcript alone (sliced if it is still too long).
    TranscriptOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive covering both the library and the binary.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "transbot=error,transbot_cli=error",
            LogLevel::Warn => "transbot=warn,transbot_cli=warn",
            LogLevel::Info => "transbot=info,transbot_cli=info",
            LogLevel::Debug => "transbot=debug,transbot_cli=debug",
            LogLevel::Trace => "transbot=trace,transbot_cli=trace",
        }
    }
}

/// Whisper model sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Model {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
    /// User-provided .ggml file path.
    Custom(PathBuf),
}

impl Model {
    /// Every downloadable model with its approximate size.
    pub const CATALOGUE: [(&'static str, &'static str); 11] = [
        ("tiny", "75 MB"),
        ("tiny.en", "75 MB"),
        ("base", "142 MB"),
        ("base.en", "142 MB"),
        ("small", "466 MB"),
        ("small.en", "466 MB"),
        ("medium", "1.5 GB"),
        ("medium.en", "1.5 GB"),
        ("large-v2", "2.9 GB"),
        ("large-v3", "2.9 GB"),
        ("large-v3-turbo", "~1.6 GB"),
    ];

    /// Model filename as used by HuggingFace / whisper.cpp.
    pub fn filename(&self) -> String {
        match self {
            Model::Custom(path) => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom-model".into()),
            other => format!("ggml-{}.bin", other.name()),
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        match self {
            Model::Tiny => "tiny",
            Model::TinyEn => "tiny.en",
            Model::Base => "base",
            Model::BaseEn => "base.en",
            Model::Small => "small",
            Model::SmallEn => "small.en",
            Model::Medium => "medium",
            Model::MediumEn => "medium.en",
            Model::LargeV2 => "large-v2",
            Model::LargeV3 => "large-v3",
            Model::LargeV3Turbo => "large-v3-turbo",
            Model::Custom(_) => "custom",
        }
    }

    /// Parse a catalogue name (e.g. from the CLI or config file).
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "tiny" => Some(Model::Tiny),
            "tiny.en" => Some(Model::TinyEn),
            "base" => Some(Model::Base),
            "base.en" => Some(Model::BaseEn),
            "small" => Some(Model::Small),
            "small.en" => Some(Model::SmallEn),
            "medium" => Some(Model::Medium),
            "medium.en" => Some(Model::MediumEn),
            "large-v2" => Some(Model::LargeV2),
            "large-v3" => Some(Model::LargeV3),
            "large-v3-turbo" => Some(Model::LargeV3Turbo),
            _ => None,
        }
    }
}

impl TryFrom<String> for Model {
    type Error = String;

    /// Catalogue names map to their variant; anything ending in `.bin` is a custom path.
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if let Some(model) = Model::parse_name(&value) {
            return Ok(model);
        }
        if value.ends_with(".bin") {
            return Ok(Model::Custom(PathBuf::from(value)));
        }
        Err(format!("unknown model \"{value}\""))
    }
}

impl From<Model> for String {
    fn from(model: Model) -> Self {
        match model {
            Model::Custom(path) => path.to_string_lossy().into_owned(),
            other => other.name().to_string(),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Custom(path) => write!(f, "{}", path.display()),
            other => f.write_str(other.name()),
        }
    }
}

/// A validated spoken-language hint for whisper.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Language {
    /// Auto-detect language from audio.
    #[default]
    Auto,
    /// A validated language code (e.g. "en", "de", "ja").
    Code(String),
}

impl Language {
    /// Accepts short codes ("en") or full names ("english"), checked against whisper.cpp.
    pub fn new(lang: &str) -> Result<Self> {
        let lower = lang.to_lowercase();
        if lower == "auto" {
            return Ok(Language::Auto);
        }

        match whisper_rs::get_lang_id(&lower) {
            Some(id) => {
                let code = whisper_rs::get_lang_str(id).unwrap_or(&lower).to_string();
                Ok(Language::Code(code))
            }
            None => Err(Error::UnsupportedLanguage(lang.to_string())),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code(code) => Some(code),
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from file, apply process environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = var("BOT_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(id) = var("ADMIN_USER_ID").filter(|t| !t.is_empty()) {
            let id = id
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("ADMIN_USER_ID is not a chat id: {id}")))?;
            self.telegram.operator_chat_id = Some(id);
        }
        if let Some(target) = var("TRANSBOT_TARGET_LANGUAGE").filter(|t| !t.is_empty()) {
            self.translation.target = target;
        }
        if let Some(model) = var("TRANSBOT_MODEL").filter(|t| !t.is_empty()) {
            self.transcription.model = Model::try_from(model).map_err(Error::Config)?;
        }
        Ok(())
    }

    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.trim().is_empty() {
            return Err(Error::Config("BOT_TOKEN is not set".into()));
        }
        if self.telegram.operator_chat_id.is_none() {
            return Err(Error::Config("ADMIN_USER_ID is not set".into()));
        }
        if self.limits.max_file_size == 0 {
            return Err(Error::Config("limits.max_file_size must be positive".into()));
        }
        // A chunk must be able to hold one surrogate pair.
        if self.limits.max_message_len < 2 {
            return Err(Error::Config("limits.max_message_len must be at least 2".into()));
        }
        if self.media.supported_extensions.is_empty() {
            return Err(Error::Config("media.supported_extensions is empty".into()));
        }
        if let Some(ext) = self
            .media
            .supported_extensions
            .iter()
            .find(|e| e.is_empty() || e.contains('.') || e.to_lowercase() != **e)
        {
            return Err(Error::Config(format!(
                "media.supported_extensions entry \"{ext}\" must be a bare lower-case extension"
            )));
        }
        let target = self.translation.target.trim();
        if target.is_empty() || !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::Config(format!(
                "translation.target \"{}\" is not a language code",
                self.translation.target
            )));
        }
        Language::new(&self.transcription.language)?;
        Ok(())
    }

    /// Copy suitable for printing, with the bot credential masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.telegram.token.is_empty() {
            copy.telegram.token = "<redacted>".into();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::TempDir;

    fn valid() -> Config {
        let mut config = Config::default();
        config.telegram.token = "123:abc".into();
        config.telegram.operator_chat_id = Some(42);
        config
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.limits.max_file_size, 20 * 1024 * 1024);
        assert_eq!(config.limits.max_message_len, 4096);
        assert_eq!(config.media.supported_extensions.len(), 7);
        assert!(config.media.is_supported("webm"));
        assert!(!config.media.is_supported("avi"));
        assert_eq!(config.transcription.model, Model::Small);
        assert_eq!(config.translation.target, "uz");
        assert_eq!(config.translation.overflow, OverflowPolicy::Split);
    }

    #[test]
    fn test_load_valid_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("transbot.toml");

        let toml_content = r#"
[telegram]
token = "1:x"
operator_chat_id = 777

[limits]
max_file_size = 1048576

[transcription]
model = "base.en"
language = "en"

[translation]
target = "de"
overflow = "transcript-only"

[logging]
level = "debug"
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.telegram.operator_chat_id, Some(777));
        assert_eq!(config.limits.max_file_size, 1_048_576);
        assert_eq!(config.limits.max_message_len, 4096);
        assert_eq!(config.transcription.model, Model::BaseEn);
        assert_eq!(config.translation.target, "de");
        assert_eq!(config.translation.label(), "DE");
        assert_eq!(config.translation.overflow, OverflowPolicy::TranscriptOnly);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_missing_config_file_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[limits\nmax_file_size = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Toml(_))));
    }

    #[test]
    fn test_custom_model_path() {
        let model = Model::try_from("/models/ggml-mine.bin".to_string()).unwrap();
        assert_eq!(model, Model::Custom(PathBuf::from("/models/ggml-mine.bin")));
        assert_eq!(model.filename(), "ggml-mine.bin");
        assert!(Model::try_from("huge".to_string()).is_err());
    }

    #[test]
    fn test_model_filename() {
        assert_eq!(Model::Small.filename(), "ggml-small.bin");
        assert_eq!(Model::LargeV3Turbo.filename(), "ggml-large-v3-turbo.bin");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BOT_TOKEN", "999:token"),
            ("ADMIN_USER_ID", " 12345 "),
            ("TRANSBOT_TARGET_LANGUAGE", "ru"),
            ("TRANSBOT_MODEL", "tiny"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.telegram.token, "999:token");
        assert_eq!(config.telegram.operator_chat_id, Some(12345));
        assert_eq!(config.translation.target, "ru");
        assert_eq!(config.transcription.model, Model::Tiny);
    }

    #[test]
    fn test_env_rejects_bad_operator_id() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "ADMIN_USER_ID").then(|| "admin".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_credentials() {
        assert!(matches!(Config::default().validate(), Err(Error::Config(_))));

        let mut config = valid();
        config.telegram.operator_chat_id = None;
        assert!(config.validate().is_err());

        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_limits_and_extensions() {
        let mut config = valid();
        config.limits.max_message_len = 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.media.supported_extensions = vec!["MP3".into()];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.media.supported_extensions.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.translation.target = "u z".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_label_follows_target() {
        let mut config = TranslationConfig::default();
        assert_eq!(config.label, None);
        assert_eq!(config.label(), "🇺🇿");
        config.target = "de".into();
        assert_eq!(config.label(), "DE");
        config.label = Some("Deutsch".into());
        assert_eq!(config.label(), "Deutsch");
    }

    #[test]
    fn test_env_target_changes_label() {
        let mut config = Config::default();
        config
            .apply_env(|k| (k == "TRANSBOT_TARGET_LANGUAGE").then(|| "ru".to_string()))
            .unwrap();
        assert_eq!(config.translation.label(), "RU");
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = valid().redacted();
        assert_eq!(config.telegram.token, "<redacted>");
    }
}
