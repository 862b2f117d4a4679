//! Speech-to-text pipeline.
//!
//! Converts a bounded PCM audio buffer into text. The pipeline runs fully
//! independently of indexing and search. A missing or unreachable speech
//! model is a degraded-capability signal, not an error: the caller gets a
//! successful result with empty text and `model_available = false`, and the
//! rest of the system keeps functioning.
//!
//! The HTTP backend targets an OpenAI-compatible transcription endpoint
//! (`POST {url}/v1/audio/transcriptions`, multipart WAV upload), which is
//! what local Whisper servers expose.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SpeechConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::TranscribeResult;

/// One transcribed segment from a backend.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub text: String,
    pub confidence: f64,
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn is_ready(&self) -> bool;
    async fn transcribe(&self, wav: Vec<u8>) -> Result<SpeechSegment>;
}

pub fn create_speech_backend(config: &SpeechConfig) -> Result<Arc<dyn SpeechBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSpeech)),
        "http" => Ok(Arc::new(HttpSpeech::new(config)?)),
        other => bail!("Unknown speech provider: {}", other),
    }
}

/// Transcribe a raw 16-bit mono PCM buffer.
///
/// Input validation failures are the only errors this function raises.
/// Backend failures and timeouts degrade to an empty transcription with
/// `model_available = false`.
pub async fn run_transcription(
    config: &SpeechConfig,
    backend: &dyn SpeechBackend,
    audio: &[u8],
    sample_rate: Option<u32>,
) -> ApiResult<TranscribeResult> {
    let started = Instant::now();

    if audio.is_empty() {
        return Err(ApiError::InvalidInput("audio buffer is empty".to_string()));
    }

    let sample_rate = sample_rate.unwrap_or(config.sample_rate);
    if sample_rate == 0 {
        return Err(ApiError::InvalidInput("sample rate must be > 0".to_string()));
    }

    // 16-bit mono PCM: two bytes per sample.
    let duration_secs = audio.len() as u64 / (2 * sample_rate as u64);
    if duration_secs > config.max_duration_secs {
        return Err(ApiError::InvalidInput(format!(
            "audio duration {}s exceeds maximum of {}s",
            duration_secs, config.max_duration_secs
        )));
    }

    if !backend.is_ready() {
        return Ok(degraded(started));
    }

    let wav = pcm_to_wav(audio, sample_rate);
    let timeout = Duration::from_secs(config.timeout_secs);

    match tokio::time::timeout(timeout, backend.transcribe(wav)).await {
        Ok(Ok(segment)) => Ok(TranscribeResult {
            text: segment.text,
            confidence: segment.confidence,
            model_available: true,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "speech backend failed, degrading");
            Ok(degraded(started))
        }
        Err(_) => {
            tracing::warn!(timeout_secs = config.timeout_secs, "speech backend timed out, degrading");
            Ok(degraded(started))
        }
    }
}

fn degraded(started: Instant) -> TranscribeResult {
    TranscribeResult {
        text: String::new(),
        confidence: 0.0,
        model_available: false,
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

/// Wrap raw PCM bytes in a 44-byte RIFF/WAVE header (16-bit mono).
fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * 2;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

// ============ Disabled ============

/// Placeholder used when no speech model is configured. Never called by
/// the pipeline; `is_ready` short-circuits to the degraded path.
pub struct DisabledSpeech;

#[async_trait]
impl SpeechBackend for DisabledSpeech {
    fn is_ready(&self) -> bool {
        false
    }
    async fn transcribe(&self, _wav: Vec<u8>) -> Result<SpeechSegment> {
        bail!("speech model is not loaded")
    }
}

// ============ HTTP (OpenAI-compatible) ============

pub struct HttpSpeech {
    url: String,
    model: String,
    language: String,
    timeout: Duration,
}

impl HttpSpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("speech.url required for http provider"))?;
        Ok(Self {
            url,
            model: config.model.clone(),
            language: config.language.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeech {
    fn is_ready(&self) -> bool {
        true
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<SpeechSegment> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json");

        let response = client
            .post(format!("{}/v1/audio/transcriptions", self.url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("transcription API error {}: {}", status, body);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        // Average segment log-probability maps to a rough confidence.
        let confidence = match json.get("segments").and_then(|s| s.as_array()) {
            Some(segments) if !segments.is_empty() => {
                let sum: f64 = segments
                    .iter()
                    .filter_map(|s| s.get("avg_logprob").and_then(|p| p.as_f64()))
                    .sum();
                (1.0 + sum / segments.len() as f64).clamp(0.0, 1.0)
            }
            _ if !text.is_empty() => 0.8,
            _ => 0.0,
        };

        Ok(SpeechSegment { text, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpeechConfig {
        SpeechConfig::default()
    }

    #[tokio::test]
    async fn test_empty_audio_rejected() {
        let err = run_transcription(&config(), &DisabledSpeech, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_over_duration_rejected() {
        // 60s of 16 kHz 16-bit mono against a 30s cap.
        let audio = vec![0u8; 16000 * 2 * 60];
        let err = run_transcription(&config(), &DisabledSpeech, &audio, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_model_degrades_not_fails() {
        let audio = vec![0u8; 16000 * 2]; // one second of silence
        let result = run_transcription(&config(), &DisabledSpeech, &audio, None)
            .await
            .unwrap();
        assert!(!result.model_available);
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_backend_error_degrades_not_fails() {
        struct FailingBackend;

        #[async_trait]
        impl SpeechBackend for FailingBackend {
            fn is_ready(&self) -> bool {
                true
            }
            async fn transcribe(&self, _wav: Vec<u8>) -> Result<SpeechSegment> {
                bail!("connection refused")
            }
        }

        let audio = vec![0u8; 16000 * 2];
        let result = run_transcription(&config(), &FailingBackend, &audio, None)
            .await
            .unwrap();
        assert!(!result.model_available);
        assert!(result.text.is_empty());
    }

    #[tokio::test]
    async fn test_working_backend_reports_available() {
        struct EchoBackend;

        #[async_trait]
        impl SpeechBackend for EchoBackend {
            fn is_ready(&self) -> bool {
                true
            }
            async fn transcribe(&self, _wav: Vec<u8>) -> Result<SpeechSegment> {
                Ok(SpeechSegment {
                    text: "hello world".to_string(),
                    confidence: 0.92,
                })
            }
        }

        let audio = vec![1u8; 16000];
        let result = run_transcription(&config(), &EchoBackend, &audio, None)
            .await
            .unwrap();
        assert!(result.model_available);
        assert_eq!(result.text, "hello world");
    }

    #[test]
    fn test_wav_header_layout() {
        let pcm = vec![0u8; 32000];
        let wav = pcm_to_wav(&pcm, 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + pcm.len());
        // Declared data length matches the payload.
        let declared = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(declared as usize, pcm.len());
    }
}
