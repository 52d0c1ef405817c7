use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pipeline::Stage;

/// Translated transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub text: String,
    pub detected_source_language: String,
}

/// A text-translation capability. The source language is always auto-detected.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: &str) -> Result<TranslationResult>;
}

/// Run the translation stage. Every failure comes back as `TranslationFailure`
/// (or `EngineTimeout`) so the caller can fall back to the bare transcript.
pub async fn translate(
    translator: &dyn Translator,
    text: &str,
    target: &str,
    timeout: Duration,
) -> Result<TranslationResult> {
    let result = tokio::time::timeout(timeout, translator.translate(text, target))
        .await
        .map_err(|_| Error::EngineTimeout {
            stage: Stage::Translate,
            after: timeout,
        })?
        .map_err(|e| match e {
            Error::TranslationFailure(_) => e,
            other => Error::TranslationFailure(other.to_string()),
        })?;

    info!(
        source = %result.detected_source_language,
        target,
        chars = result.text.chars().count(),
        "translation complete"
    );
    Ok(result)
}

/// Client for the public Google Translate `translate_a/single` endpoint.
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<TranslationResult> {
        let url = format!("{}/translate_a/single", self.endpoint);
        debug!(target, chars = text.chars().count(), "requesting translation");

        // Text goes in the form body: transcripts can be far longer than a URL allows.
        let response = self
            .client
            .post(&url)
            .query(&[("client", "gtx"), ("sl", "auto"), ("tl", target), ("dt", "t")])
            .form(&[("q", text)])
            .send()
            .await
            .map_err(|e| Error::TranslationFailure(format!("request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let body: String = body.chars().take(200).collect();
            return Err(Error::TranslationFailure(format!("status {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::TranslationFailure(format!("body: {e}")))?;
        parse_response(&body)
    }
}

/// Pull the translation out of the nested-array response.
///
/// Shape: `[[["<translated>", "<original>", ...], ...], null, "<source lang>", ...]`.
fn parse_response(body: &Value) -> Result<TranslationResult> {
    let sentences = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::TranslationFailure("response has no sentences".into()))?;

    let text: String = sentences
        .iter()
        .filter_map(|s| s.get(0).and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(Error::TranslationFailure("response contains no translated text".into()));
    }

    let detected_source_language = body
        .get(2)
        .and_then(Value::as_str)
        .unwrap_or("auto")
        .to_string();

    Ok(TranslationResult {
        text,
        detected_source_language,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_joins_sentences() {
        let body = json!([
            [
                ["Salom dunyo. ", "Hello world. ", null, null, 10],
                ["Qalaysiz?", "How are you?", null, null, 10]
            ],
            null,
            "en"
        ]);
        let result = parse_response(&body).unwrap();
        assert_eq!(result.text, "Salom dunyo. Qalaysiz?");
        assert_eq!(result.detected_source_language, "en");
    }

    #[test]
    fn test_parse_rejects_unexpected_shape() {
        assert!(matches!(
            parse_response(&json!({"error": "nope"})),
            Err(Error::TranslationFailure(_))
        ));
        assert!(matches!(
            parse_response(&json!([[], null, "en"])),
            Err(Error::TranslationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_google_translator_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate_a/single"))
            .and(query_param("sl", "auto"))
            .and(query_param("tl", "uz"))
            .and(body_string_contains("q=hello+world"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([[["salom dunyo", "hello world"]], null, "en"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let translator = GoogleTranslator::new(format!("{}/", server.uri()));
        let result = translator.translate("hello world", "uz").await.unwrap();
        assert_eq!(result.text, "salom dunyo");
        assert_eq!(result.detected_source_language, "en");
    }

    #[tokio::test]
    async fn test_google_translator_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let translator = GoogleTranslator::new(server.uri());
        let err = translator.translate("hello", "uz").await.unwrap_err();
        assert!(matches!(err, Error::TranslationFailure(ref m) if m.contains("429")));
    }

    struct Broken;

    #[async_trait]
    impl Translator for Broken {
        async fn translate(&self, _text: &str, _target: &str) -> Result<TranslationResult> {
            Err(Error::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_stage_wraps_errors_as_translation_failure() {
        let err = translate(&Broken, "hi", "uz", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TranslationFailure(ref m) if m.contains("connection reset")));
    }

    struct Hung;

    #[async_trait]
    impl Translator for Hung {
        async fn translate(&self, _text: &str, _target: &str) -> Result<TranslationResult> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(Error::TranslationFailure("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_times_out() {
        let err = translate(&Hung, "hi", "uz", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EngineTimeout {
                stage: Stage::Translate,
                after,
            } if after == Duration::from_secs(30)
        ));
    }
}
