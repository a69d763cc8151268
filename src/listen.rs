//! Speech capture and transcription.
//!
//! Routine "nothing understood" cases are values of [`Recognition`], not
//! errors, so the conversation keeps going when the user mumbles or the
//! transcription service has a bad moment.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ai::ApiKey;
use crate::audio::{encode_wav, record_phrase, CaptureOutcome, CaptureSettings};

/// Text fed to the conversation when speech could not be understood.
pub const UNINTELLIGIBLE_TEXT: &str = "Sorry, I could not understand the audio.";

/// Text fed to the conversation when the transcription service failed.
pub const SERVICE_UNAVAILABLE_TEXT: &str = "Sorry, there was an issue with the request.";

/// Result of one listen attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Recognized(String),
    Unintelligible,
    ServiceUnavailable,
}

impl Recognition {
    /// Text to submit as the user's turn.
    pub fn as_user_text(&self) -> &str {
        match self {
            Recognition::Recognized(text) => text,
            Recognition::Unintelligible => UNINTELLIGIBLE_TEXT,
            Recognition::ServiceUnavailable => SERVICE_UNAVAILABLE_TEXT,
        }
    }
}

/// Speech-to-text backend.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribes a WAV payload.
    async fn transcribe(&self, wav: Vec<u8>) -> Recognition;
}

/// Source of the user's next utterance.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Captures and transcribes one utterance.
    ///
    /// # Errors
    /// Only for broken capture plumbing (no microphone, stream failure).
    async fn listen(&self) -> Result<Recognition>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
#[derive(Debug)]
pub struct WhisperApiRecognizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: ApiKey,
}

impl WhisperApiRecognizer {
    /// Creates a recognizer for `model` at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: ApiKey,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    async fn request(&self, wav: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", "en")
            .part("file", part);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .multipart(form)
            .send()
            .await
            .with_context(|| "Failed to reach transcription service")?
            .error_for_status()
            .with_context(|| "Transcription service rejected the request")?;
        let body: TranscriptionResponse = response
            .json()
            .await
            .with_context(|| "Failed to parse transcription response")?;
        Ok(body.text)
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperApiRecognizer {
    async fn transcribe(&self, wav: Vec<u8>) -> Recognition {
        match self.request(wav).await {
            Ok(text) => classify_transcript(&text),
            Err(err) => {
                warn!("transcription failed: {:#}", err);
                Recognition::ServiceUnavailable
            }
        }
    }
}

/// Maps raw transcript text to a [`Recognition`].
fn classify_transcript(text: &str) -> Recognition {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Recognition::Unintelligible
    } else {
        Recognition::Recognized(trimmed.to_string())
    }
}

/// Turns a finished capture into a [`Recognition`].
///
/// # Errors
/// Returns an error if the captured samples cannot be encoded.
pub async fn recognize_capture<R: SpeechRecognizer + ?Sized>(
    outcome: CaptureOutcome,
    recognizer: &R,
) -> Result<Recognition> {
    match outcome {
        CaptureOutcome::TimedOut => {
            debug!("no speech before timeout");
            Ok(Recognition::Unintelligible)
        }
        CaptureOutcome::Phrase(samples) => {
            println!("Recognizing...");
            let wav = encode_wav(&samples)?;
            Ok(recognizer.transcribe(wav).await)
        }
    }
}

/// Listener backed by the default microphone and a [`SpeechRecognizer`].
pub struct MicrophoneListener<R> {
    settings: CaptureSettings,
    recognizer: R,
}

impl<R: SpeechRecognizer> MicrophoneListener<R> {
    pub fn new(settings: CaptureSettings, recognizer: R) -> Self {
        Self {
            settings,
            recognizer,
        }
    }
}

#[async_trait]
impl<R: SpeechRecognizer> Listener for MicrophoneListener<R> {
    async fn listen(&self) -> Result<Recognition> {
        println!("Please speak something...");
        let settings = self.settings;
        let outcome = tokio::task::spawn_blocking(move || record_phrase(settings))
            .await
            .with_context(|| "Audio capture task failed")??;
        recognize_capture(outcome, &self.recognizer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::serve_once;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRecognizer {
        calls: AtomicUsize,
        reply: Recognition,
    }

    #[async_trait]
    impl SpeechRecognizer for CountingRecognizer {
        async fn transcribe(&self, wav: Vec<u8>) -> Recognition {
            assert!(!wav.is_empty());
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    #[test]
    fn sentinels_render_fixed_text() {
        assert_eq!(Recognition::Unintelligible.as_user_text(), UNINTELLIGIBLE_TEXT);
        assert_eq!(
            Recognition::ServiceUnavailable.as_user_text(),
            SERVICE_UNAVAILABLE_TEXT
        );
        assert_eq!(Recognition::Recognized("hi".into()).as_user_text(), "hi");
    }

    #[test]
    fn blank_transcript_is_unintelligible() {
        assert_eq!(classify_transcript("   \n"), Recognition::Unintelligible);
        assert_eq!(
            classify_transcript(" hello "),
            Recognition::Recognized("hello".into())
        );
    }

    #[tokio::test]
    async fn timeout_is_unintelligible_without_calling_service() {
        let recognizer = CountingRecognizer {
            calls: AtomicUsize::new(0),
            reply: Recognition::Recognized("unused".into()),
        };
        let result = recognize_capture(CaptureOutcome::TimedOut, &recognizer)
            .await
            .expect("timeout is not an error");
        assert_eq!(result, Recognition::Unintelligible);
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn phrase_is_forwarded_to_recognizer() {
        let recognizer = CountingRecognizer {
            calls: AtomicUsize::new(0),
            reply: Recognition::Unintelligible,
        };
        let result = recognize_capture(CaptureOutcome::Phrase(vec![0; 1600]), &recognizer)
            .await
            .expect("inaudible speech is not an error");
        assert_eq!(result, Recognition::Unintelligible);
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
    }

    fn recognizer_at(base: &str) -> WhisperApiRecognizer {
        WhisperApiRecognizer::new(base, "whisper-1", ApiKey::new("sk"), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn rejected_request_is_service_unavailable() {
        let base = serve_once("401 Unauthorized", r#"{"error":"invalid key"}"#).await;
        let wav = encode_wav(&[0_i16; 160]).expect("wav");
        assert_eq!(
            recognizer_at(&base).transcribe(wav).await,
            Recognition::ServiceUnavailable
        );
    }

    #[tokio::test]
    async fn blank_transcription_is_unintelligible() {
        let base = serve_once("200 OK", r#"{"text":"  "}"#).await;
        let wav = encode_wav(&[0_i16; 160]).expect("wav");
        assert_eq!(
            recognizer_at(&base).transcribe(wav).await,
            Recognition::Unintelligible
        );
    }

    #[tokio::test]
    async fn transcribed_text_is_recognized() {
        let base = serve_once("200 OK", r#"{"text":" Good morning "}"#).await;
        let wav = encode_wav(&[0_i16; 160]).expect("wav");
        assert_eq!(
            recognizer_at(&base).transcribe(wav).await,
            Recognition::Recognized("Good morning".into())
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_sentinel_not_an_error() {
        let recognizer = WhisperApiRecognizer::new(
            "http://127.0.0.1:9",
            "whisper-1",
            ApiKey::new("sk"),
            Duration::from_secs(2),
        )
        .expect("client");
        let wav = encode_wav(&[0_i16; 160]).expect("wav");
        assert_eq!(
            recognizer.transcribe(wav).await,
            Recognition::ServiceUnavailable
        );
    }
}
