//! Speech synthesis: turn text chunks into audio files.
//!
//! [`SpeechProvider`] is the network seam: one request in, raw audio bytes
//! out. [`OpenAiSpeechProvider`] talks to an OpenAI-compatible
//! `/audio/speech` endpoint. [`Synthesizer`] adds the file handling and the
//! ordered, fail-fast batch loop on top of any provider.
//!
//! There are no retries. Each chunk costs exactly one provider call, which
//! keeps progress accounting exact.

use crate::config::{TtsConfig, TtsOptions, Voice};
use crate::error::{AudiobookError, SynthesisError};
use crate::pipeline::chunk::TextChunk;
use crate::progress::batch_percent;
use crate::workspace::chunk_file_name;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One synthesis call. `speed` is already clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub input: String,
    pub voice: Voice,
    pub speed: f32,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Synthesize `request.input` and return the encoded audio.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError>;
}

// ── OpenAI ───────────────────────────────────────────────────────────────

/// Client for `POST {base_url}/audio/speech`.
pub struct OpenAiSpeechProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    response_format: String,
    timeout_secs: u64,
}

impl OpenAiSpeechProvider {
    /// Build a client from injected settings. Fails when no API key is set.
    pub fn from_config(config: &TtsConfig) -> Result<Self, AudiobookError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AudiobookError::InvalidConfig("an API key is required for speech synthesis".into())
            })?
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AudiobookError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            response_format: config.response_format.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    voice: Voice,
    input: &'a str,
    speed: f32,
    response_format: &'a str,
}

#[async_trait]
impl SpeechProvider for OpenAiSpeechProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = SpeechBody {
            model: &self.model,
            voice: request.voice,
            input: &request.input,
            speed: request.speed,
            response_format: &self.response_format,
        };

        debug!(
            model = %self.model,
            voice = %request.voice,
            speed = request.speed,
            chars = request.input.chars().count(),
            "Sending text to speech endpoint"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Transport(format!(
                        "request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    SynthesisError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Provider {
                status: Some(status.as_u16()),
                message: provider_error_message(status.as_u16(), &text),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transport(format!("reading audio body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

/// Pull `error.message` out of an OpenAI-style error body, falling back to
/// the raw body, then to the status code.
pub fn provider_error_message(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|v| v.pointer("/error/message"))
        .and_then(|m| m.as_str())
        .filter(|m| !m.trim().is_empty())
    {
        return message.trim().to_string();
    }
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        body.to_string()
    }
}

// ── Synthesizer ──────────────────────────────────────────────────────────

/// Progress of a chunk batch after one chunk finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    /// Index of the chunk that just finished.
    pub index: usize,
    /// Chunks finished so far.
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    /// `completed / total * 100`; exactly 100 for the last chunk.
    pub fn percent(&self) -> f64 {
        batch_percent(self.completed, self.total)
    }
}

/// Writes provider audio to disk, one file per chunk.
#[derive(Clone)]
pub struct Synthesizer {
    provider: Arc<dyn SpeechProvider>,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn SpeechProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn SpeechProvider> {
        &self.provider
    }

    /// Synthesize one text and write it to `output`, creating the parent
    /// directory if needed. Speed is clamped before the call.
    pub async fn synthesize_to_file(
        &self,
        text: &str,
        options: &TtsOptions,
        output: &Path,
    ) -> Result<PathBuf, SynthesisError> {
        let request = SpeechRequest {
            input: text.to_string(),
            voice: options.voice,
            speed: options.clamped_speed(),
        };

        let audio = self.provider.synthesize(&request).await?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SynthesisError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(output, &audio)
            .await
            .map_err(|source| SynthesisError::Write {
                path: output.to_path_buf(),
                source,
            })?;

        debug!("Wrote {} bytes of audio to {}", audio.len(), output.display());
        Ok(output.to_path_buf())
    }

    /// Synthesize `chunks` strictly in order into `dir/chunk_NNN.mp3`.
    ///
    /// `on_progress` is awaited after every completed chunk, so whatever it
    /// persists is ordered. The first failure, from the provider or from
    /// `on_progress`, aborts the batch before another request is sent; files
    /// already written stay on disk for the caller to clean up.
    pub async fn synthesize_chunks<F, Fut, E>(
        &self,
        chunks: &[TextChunk],
        options: &TtsOptions,
        dir: &Path,
        mut on_progress: F,
    ) -> Result<Vec<PathBuf>, E>
    where
        F: FnMut(BatchProgress) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<SynthesisError>,
    {
        let total = chunks.len();
        let mut written = Vec::with_capacity(total);

        for (position, chunk) in chunks.iter().enumerate() {
            let path = dir.join(chunk_file_name(chunk.index));
            debug!(
                "Synthesizing chunk {}/{} ({} chars) via {}",
                position + 1,
                total,
                chunk.char_count(),
                self.provider.name()
            );
            self.synthesize_to_file(&chunk.text, options, &path).await?;
            written.push(path);

            on_progress(BatchProgress {
                index: chunk.index,
                completed: position + 1,
                total,
            })
            .await?;
        }

        info!("Synthesized {} chunks into {}", total, dir.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns `b"ID3" + index` for each call and fails on the `fail_at`-th call.
    struct Scripted {
        calls: Mutex<Vec<SpeechRequest>>,
        fail_at: Option<usize>,
        empty: bool,
    }

    impl Scripted {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_at,
                empty: false,
            }
        }
    }

    #[async_trait]
    impl SpeechProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn synthesize(&self, request: &SpeechRequest) -> Result<Vec<u8>, SynthesisError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push(request.clone());
            if self.fail_at == Some(n) {
                return Err(SynthesisError::Provider {
                    status: Some(429),
                    message: "Rate limit reached".into(),
                });
            }
            if self.empty {
                return Ok(Vec::new());
            }
            Ok(vec![b'I', b'D', b'3', n as u8])
        }
    }

    fn chunks(n: usize) -> Vec<TextChunk> {
        (0..n)
            .map(|index| TextChunk {
                index,
                text: format!("Sentence number {index}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn speed_is_clamped_before_the_call() {
        let provider = Arc::new(Scripted::new(None));
        let synth = Synthesizer::new(provider.clone());
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("nested/one.mp3");

        synth
            .synthesize_to_file("Hi", &TtsOptions::new(Voice::Echo, 10.0), &out)
            .await
            .unwrap();

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].speed, 4.0);
        assert_eq!(calls[0].voice, Voice::Echo);
        assert!(out.exists());
    }

    #[tokio::test]
    async fn empty_audio_is_an_error() {
        let mut provider = Scripted::new(None);
        provider.empty = true;
        let synth = Synthesizer::new(Arc::new(provider));
        let tmp = tempfile::tempdir().unwrap();
        let err = synth
            .synthesize_to_file("Hi", &TtsOptions::default(), &tmp.path().join("x.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyAudio));
    }

    #[tokio::test]
    async fn batch_writes_ordinal_files_and_reports_progress() {
        let synth = Synthesizer::new(Arc::new(Scripted::new(None)));
        let tmp = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let files = synth
            .synthesize_chunks(&chunks(3), &TtsOptions::default(), tmp.path(), |p| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(p.percent());
                    Ok::<_, SynthesisError>(())
                }
            })
            .await
            .unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["chunk_000.mp3", "chunk_001.mp3", "chunk_002.mp3"]);
        assert_eq!(std::fs::read(&files[2]).unwrap(), b"ID3\x02");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn batch_fails_fast_and_keeps_finished_chunks() {
        let provider = Arc::new(Scripted::new(Some(1)));
        let synth = Synthesizer::new(provider.clone());
        let tmp = tempfile::tempdir().unwrap();

        let err = synth
            .synthesize_chunks(&chunks(3), &TtsOptions::default(), tmp.path(), |_| async {
                Ok::<_, SynthesisError>(())
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Rate limit reached"));
        assert!(tmp.path().join("chunk_000.mp3").exists());
        assert!(!tmp.path().join("chunk_001.mp3").exists());
        assert!(!tmp.path().join("chunk_002.mp3").exists());
        assert_eq!(provider.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn progress_error_stops_the_batch() {
        let provider = Arc::new(Scripted::new(None));
        let synth = Synthesizer::new(provider.clone());
        let tmp = tempfile::tempdir().unwrap();

        let err = synth
            .synthesize_chunks(&chunks(3), &TtsOptions::default(), tmp.path(), |p| async move {
                if p.completed == 1 {
                    Err(SynthesisError::NoSpeakableText)
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::NoSpeakableText));
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
        assert!(tmp.path().join("chunk_000.mp3").exists());
        assert!(!tmp.path().join("chunk_001.mp3").exists());
    }

    #[test]
    fn error_message_from_openai_body() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(
            provider_error_message(401, body),
            "Incorrect API key provided"
        );
        assert_eq!(provider_error_message(502, "Bad gateway\n"), "Bad gateway");
        assert_eq!(provider_error_message(500, ""), "HTTP 500");
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = OpenAiSpeechProvider::from_config(&TtsConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, AudiobookError::InvalidConfig(_)));
    }

    /// Serve exactly one canned HTTP response and hand back the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static [u8],
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let head = format!(
                "{status_line}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (base, handle)
    }

    fn provider_for(base_url: String) -> OpenAiSpeechProvider {
        let config = TtsConfig {
            api_key: Some("sk-test".into()),
            base_url,
            ..TtsConfig::default()
        };
        OpenAiSpeechProvider::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn openai_request_shape() {
        let (base, server) = one_shot_server("HTTP/1.1 200 OK", "audio/mpeg", b"ID3audio").await;
        let provider = provider_for(base);

        let audio = provider
            .synthesize(&SpeechRequest {
                input: "Call me Ishmael".into(),
                voice: Voice::Onyx,
                speed: 1.25,
            })
            .await
            .unwrap();
        assert_eq!(audio, b"ID3audio");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /audio/speech "), "got: {request}");
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: bearer sk-test"));
        let body_start = request.find("\r\n\r\n").unwrap() + 4;
        let json: serde_json::Value = serde_json::from_str(&request[body_start..]).unwrap();
        assert_eq!(json["model"], "tts-1");
        assert_eq!(json["voice"], "onyx");
        assert_eq!(json["input"], "Call me Ishmael");
        assert_eq!(json["speed"], 1.25);
        assert_eq!(json["response_format"], "mp3");
    }

    #[tokio::test]
    async fn openai_error_body_is_surfaced() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 429 Too Many Requests",
            "application/json",
            br#"{"error":{"message":"You exceeded your current quota"}}"#,
        )
        .await;
        let provider = provider_for(base);

        let err = provider
            .synthesize(&SpeechRequest {
                input: "x".into(),
                voice: Voice::Alloy,
                speed: 1.0,
            })
            .await
            .unwrap_err();
        server.await.unwrap();

        match &err {
            SynthesisError::Provider { status, message } => {
                assert_eq!(*status, Some(429));
                assert_eq!(message, "You exceeded your current quota");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "Failed to convert text to speech: You exceeded your current quota"
        );
    }
}
