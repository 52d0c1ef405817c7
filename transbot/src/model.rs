//! Local cache of whisper.cpp ggml models.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::Model;
use crate::error::{Error, Result};

const HUGGINGFACE_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Anything smaller than this is an error page, not a model.
const MIN_MODEL_BYTES: u64 = 1_000_000;

/// Return the local path of `model`, downloading it into `cache_dir` first if needed.
pub async fn ensure_model(model: &Model, cache_dir: &Path) -> Result<PathBuf> {
    if let Model::Custom(path) = model {
        return if path.exists() {
            Ok(path.clone())
        } else {
            Err(Error::ModelNotFound { path: path.clone() })
        };
    }

    let filename = model.filename();
    let model_path = cache_dir.join(&filename);
    if model_path.exists() {
        info!(path = %model_path.display(), "model already cached");
        return Ok(model_path);
    }

    tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
        Error::Model(format!("failed to create cache dir {}: {e}", cache_dir.display()))
    })?;

    let url = format!("{HUGGINGFACE_BASE}/{filename}");
    info!(%url, "downloading model");
    download_model(&url, &model_path).await?;
    Ok(model_path)
}

async fn download_model(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::ModelDownload(format!("HTTP error: {e}")))?;

    let expected = response.content_length().unwrap_or(0);
    let pb = ProgressBar::new(expected);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .map_err(|e| Error::Model(format!("progress template: {e}")))?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {}", display_name(dest)));

    // Stream into a sibling .part file; only a complete download gets the real name.
    let part = dest.with_extension("bin.part");
    let mut file = tokio::fs::File::create(&part).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        pb.set_position(written);
    }
    file.flush().await?;
    drop(file);

    if written < MIN_MODEL_BYTES {
        tokio::fs::remove_file(&part).await.ok();
        pb.abandon_with_message("Download failed");
        return Err(Error::ModelDownload(format!(
            "downloaded file too small ({written} bytes) — likely an error page"
        )));
    }

    tokio::fs::rename(&part, dest).await?;
    pb.finish_with_message("Download complete");

    if expected > 0 && written != expected {
        warn!(expected, actual = written, "file size mismatch — model may be corrupt");
    }
    info!(path = %dest.display(), size = written, "model saved");
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Complete model files present in `cache_dir`.
pub fn list_cached_models(cache_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return Vec::new();
    };

    let mut models: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    models.sort();
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_list_cached_models_nonexistent_dir() {
        assert!(list_cached_models(Path::new("/nonexistent/path")).is_empty());
    }

    #[test]
    fn test_list_cached_models_skips_partial_downloads() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ggml-small.bin"), b"fake").unwrap();
        fs::write(tmp.path().join("ggml-base.bin"), b"fake").unwrap();
        fs::write(tmp.path().join("ggml-tiny.bin.part"), b"partial").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"no").unwrap();

        let models = list_cached_models(tmp.path());
        assert_eq!(
            models,
            vec![tmp.path().join("ggml-base.bin"), tmp.path().join("ggml-small.bin")]
        );
    }

    #[tokio::test]
    async fn test_ensure_model_custom_exists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mine.bin");
        fs::write(&path, b"weights").unwrap();

        let found = ensure_model(&Model::Custom(path.clone()), Path::new("/unused"))
            .await
            .unwrap();
        assert_eq!(found, path);
    }

    #[tokio::test]
    async fn test_ensure_model_custom_not_found() {
        let model = Model::Custom("/nonexistent/m.bin".into());
        let result = ensure_model(&model, Path::new("/unused")).await;
        assert!(matches!(result, Err(Error::ModelNotFound { .. })));
    }

    #[tokio::test]
    async fn test_ensure_model_uses_cache() {
        let tmp = TempDir::new().unwrap();
        let cached = tmp.path().join("ggml-small.bin");
        fs::write(&cached, b"cached").unwrap();

        let found = ensure_model(&Model::Small, tmp.path()).await.unwrap();
        assert_eq!(found, cached);
    }
}
