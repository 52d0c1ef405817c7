use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::intake::NormalizedDescriptor;
use crate::lifecycle::TempFiles;
use crate::pipeline::Stage;

/// Sample rate of canonical audio (what whisper.cpp expects).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Canonical audio is always mono.
pub const CANONICAL_CHANNELS: u16 = 1;

/// Longest stderr excerpt carried into an error message.
const MAX_STDERR_CHARS: usize = 1000;

/// A WAV file in the canonical format: mono, 16 kHz, signed 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAudio {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
}

/// Transcode an uploaded file into canonical audio.
///
/// The extension is checked against the supported set before anything is
/// spawned, and is passed to ffmpeg as the demuxer hint. The output path is
/// allocated from `temps`, so it is cleaned up with the rest of the request.
pub async fn normalize(
    upload: &NormalizedDescriptor,
    temps: &mut TempFiles,
    media: &MediaConfig,
) -> Result<CanonicalAudio> {
    if !media.is_supported(&upload.extension) {
        return Err(Error::UnsupportedFormat(upload.extension.clone()));
    }

    let output = temps.allocate("wav");
    info!(
        input = %upload.local_path.display(),
        extension = %upload.extension,
        bytes = upload.size_bytes,
        "transcoding to canonical audio"
    );

    let run = transcode(
        &media.ffmpeg,
        &upload.local_path,
        demuxer_for(&upload.extension),
        &output,
    );
    let timeout = media.transcode_timeout();
    tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| Error::EngineTimeout {
            stage: Stage::Normalize,
            after: timeout,
        })??;

    let audio = probe_canonical(&output)?;
    info!(
        duration_secs = format!("{:.1}", audio.duration.as_secs_f64()),
        "canonical audio ready"
    );
    Ok(audio)
}

/// ffmpeg demuxer name for a declared extension.
///
/// `None` lets ffmpeg probe the content itself (extensions added through config).
pub fn demuxer_for(extension: &str) -> Option<&'static str> {
    match extension {
        "wav" => Some("wav"),
        "mp3" => Some("mp3"),
        "mp4" | "m4a" | "mov" => Some("mov"),
        "webm" => Some("matroska"),
        "ogg" => Some("ogg"),
        _ => None,
    }
}

/// Run ffmpeg once: demux `input`, drop video, downmix to mono and resample
/// to 16 kHz s16le WAV at `output`.
///
/// The child is killed if this future is dropped (e.g. on timeout).
async fn transcode(
    ffmpeg: &Path,
    input: &Path,
    demuxer: Option<&str>,
    output: &Path,
) -> Result<()> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y"]);
    if let Some(format) = demuxer {
        cmd.args(["-f", format]);
    }
    cmd.arg("-i")
        .arg(input)
        .args([
            "-vn",
            "-ac",
            &CANONICAL_CHANNELS.to_string(),
            "-ar",
            &CANONICAL_SAMPLE_RATE.to_string(),
            "-acodec",
            "pcm_s16le",
            "-f",
            "wav",
        ])
        .arg(output)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(?demuxer, "spawning ffmpeg");
    let result = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::DecodeFailure("ffmpeg not found — install with: apt install ffmpeg".into())
        } else {
            Error::DecodeFailure(format!("failed to run ffmpeg: {e}"))
        }
    })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
        return Err(Error::DecodeFailure(format!("ffmpeg failed: {stderr}")));
    }
    Ok(())
}

/// Read the header of a transcoded file and check it is canonical and non-empty.
pub fn probe_canonical(path: &Path) -> Result<CanonicalAudio> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| Error::DecodeFailure(format!("unreadable canonical audio: {e}")))?;
    let spec = reader.spec();
    check_canonical_spec(&spec)?;

    let frames = reader.duration();
    if frames == 0 {
        return Err(Error::DecodeFailure("no audio samples decoded".into()));
    }

    Ok(CanonicalAudio {
        path: path.to_path_buf(),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration: Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64),
    })
}

/// Load canonical audio as f32 samples in [-1.0, 1.0].
pub fn read_samples(audio: &CanonicalAudio) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(&audio.path)
        .map_err(|e| Error::DecodeFailure(format!("unreadable canonical audio: {e}")))?;
    check_canonical_spec(&reader.spec())?;

    reader
        .samples::<i16>()
        .map(|s| {
            s.map(|v| v as f32 / 32768.0)
                .map_err(|e| Error::DecodeFailure(format!("corrupt sample data: {e}")))
        })
        .collect()
}

fn check_canonical_spec(spec: &hound::WavSpec) -> Result<()> {
    if spec.channels != CANONICAL_CHANNELS
        || spec.sample_rate != CANONICAL_SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(Error::DecodeFailure(format!(
            "unexpected audio layout: {} ch, {} Hz, {} bit",
            spec.channels, spec.sample_rate, spec.bits_per_sample
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::ContentKind;
    use tempfile::TempDir;

    fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    /// Write a 440 Hz sine as 44.1 kHz stereo PCM.
    fn write_sine(path: &Path, secs: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (44_100.0 * secs) as usize;
        for i in 0..frames {
            let t = i as f32 / 44_100.0;
            let v = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5 * i16::MAX as f32) as i16;
            writer.write_sample(v).unwrap();
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn upload(path: PathBuf, extension: &str) -> NormalizedDescriptor {
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        NormalizedDescriptor {
            kind: ContentKind::Audio,
            extension: extension.into(),
            size_bytes,
            local_path: path,
        }
    }

    fn media(dir: &Path) -> MediaConfig {
        MediaConfig {
            uploads_dir: dir.to_path_buf(),
            ..MediaConfig::default()
        }
    }

    #[test]
    fn test_demuxer_hints() {
        assert_eq!(demuxer_for("wav"), Some("wav"));
        assert_eq!(demuxer_for("m4a"), Some("mov"));
        assert_eq!(demuxer_for("mov"), Some("mov"));
        assert_eq!(demuxer_for("webm"), Some("matroska"));
        assert_eq!(demuxer_for("flac"), None);
    }

    #[tokio::test]
    async fn test_unsupported_extension_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let mut temps = TempFiles::new(dir.path());
        let mut config = media(dir.path());
        config.ffmpeg = PathBuf::from("/nonexistent/ffmpeg");

        let avi = upload(dir.path().join("x.avi"), "avi");
        let result = normalize(&avi, &mut temps, &config).await;

        assert!(matches!(result, Err(Error::UnsupportedFormat(ext)) if ext == "avi"));
        assert_eq!(temps.pending().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_decode_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.wav");
        write_sine(&input, 0.1);
        let mut temps = TempFiles::new(dir.path());
        let mut config = media(dir.path());
        config.ffmpeg = PathBuf::from("/nonexistent/ffmpeg");

        let err = normalize(&upload(input, "wav"), &mut temps, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(ref m) if m.contains("ffmpeg")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_transcode_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("slow-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("in.wav");
        write_sine(&input, 0.1);
        let mut temps = TempFiles::new(dir.path());
        let mut config = media(dir.path());
        config.ffmpeg = script;
        config.transcode_timeout_secs = 1;

        let err = normalize(&upload(input, "wav"), &mut temps, &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::EngineTimeout {
                stage: Stage::Normalize,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_garbage_input_is_decode_failure() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("noise.mp3");
        std::fs::write(&input, b"this is not audio at all").unwrap();
        let mut temps = TempFiles::new(dir.path());

        let err = normalize(&upload(input, "mp3"), &mut temps, &media(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_supported_containers_keep_duration() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.wav");
        write_sine(&source, 2.0);
        let config = media(dir.path());

        for ext in crate::config::DEFAULT_EXTENSIONS {
            let encoded = dir.path().join(format!("encoded.{ext}"));
            let status = std::process::Command::new("ffmpeg")
                .args(["-nostdin", "-loglevel", "error", "-y", "-i"])
                .arg(&source)
                .arg(&encoded)
                .status()
                .unwrap();
            if !status.success() {
                eprintln!("this ffmpeg build cannot encode .{ext}, skipping it");
                continue;
            }

            let mut temps = TempFiles::new(dir.path());
            let audio = normalize(&upload(encoded, ext), &mut temps, &config)
                .await
                .unwrap_or_else(|e| panic!("{ext}: {e}"));

            assert_eq!(audio.sample_rate, CANONICAL_SAMPLE_RATE);
            assert_eq!(audio.channels, 1);
            let drift = (audio.duration.as_secs_f64() - 2.0).abs();
            assert!(drift < 0.15, "{ext}: duration {:?}", audio.duration);

            let samples = read_samples(&audio).unwrap();
            assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));

            temps.cleanup();
            assert!(!audio.path.exists());
        }
    }

    #[test]
    fn test_probe_rejects_non_canonical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_sine(&path, 0.1);
        assert!(matches!(probe_canonical(&path), Err(Error::DecodeFailure(_))));
    }

    #[test]
    fn test_probe_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: CANONICAL_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        hound::WavWriter::create(&path, spec).unwrap().finalize().unwrap();
        assert!(matches!(probe_canonical(&path), Err(Error::DecodeFailure(_))));
    }
}
