//! Text-to-speech functionality module.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::player::{play_to_completion, AudioPlayer, RodioPlayer};

/// Longest text the translate TTS endpoint accepts per request.
pub const MAX_CHUNK_CHARS: usize = 100;

/// Backend that turns text into encoded audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Something that can say a reply out loud.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speaks `text`, returning only once playback has finished.
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Google Translate text-to-speech client producing MP3 audio.
#[derive(Debug)]
pub struct GoogleTranslateTts {
    client: reqwest::Client,
    lang: String,
    tld: String,
}

impl GoogleTranslateTts {
    /// Creates a client speaking `lang` with the accent of the `tld` host.
    ///
    /// # Arguments
    /// * `lang` - Language code, e.g. `en`.
    /// * `tld` - Top-level domain selecting the accent, e.g. `us`.
    /// * `timeout` - Per-request timeout.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(lang: impl Into<String>, tld: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "Failed to build HTTP client")?;
        Ok(Self {
            client,
            lang: lang.into(),
            tld: tld.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("https://translate.google.{}/translate_tts", self.tld)
    }

    async fn fetch_chunk(&self, chunk: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", self.lang.as_str()),
                ("client", "tw-ob"),
                ("ttsspeed", "1"),
            ])
            .send()
            .await
            .with_context(|| "Failed to reach text-to-speech service")?
            .error_for_status()
            .with_context(|| "Text-to-speech service rejected the request")?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| "Failed to read text-to-speech audio")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTranslateTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("Cannot speak empty text");
        }
        let mut audio = Vec::new();
        for chunk in &chunks {
            audio.extend(self.fetch_chunk(chunk).await?);
        }
        debug!(chunks = chunks.len(), bytes = audio.len(), "synthesized speech");
        Ok(audio)
    }
}

/// Splits `text` into pieces of at most `max_chars` characters.
///
/// # Details
/// Whole sentences are packed together while they fit; longer sentences are
/// broken between words, and a single word longer than `max_chars` is cut.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in sentences(text) {
        if fits(&current, &sentence, max_chars) {
            append(&mut current, &sentence);
            continue;
        }
        flush(&mut current, &mut chunks);
        if char_len(&sentence) <= max_chars {
            current = sentence;
            continue;
        }
        for word in sentence.split_whitespace() {
            for piece in cut_word(word, max_chars) {
                if !fits(&current, &piece, max_chars) {
                    flush(&mut current, &mut chunks);
                }
                append(&mut current, &piece);
            }
        }
    }
    flush(&mut current, &mut chunks);
    chunks
}

fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        append(&mut current, word);
        if word.ends_with(['.', '!', '?']) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn cut_word(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn fits(current: &str, next: &str, max_chars: usize) -> bool {
    let joined = if current.is_empty() {
        char_len(next)
    } else {
        char_len(current) + 1 + char_len(next)
    };
    joined <= max_chars
}

fn append(current: &mut String, next: &str) {
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(next);
}

fn flush(current: &mut String, chunks: &mut Vec<String>) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

/// Speaker that synthesizes to a fixed file and plays it back.
///
/// # Details
/// Every call overwrites the same output file; it is not meant to outlive
/// the turn that wrote it. Playback happens on a blocking thread that the
/// caller awaits, so speaking never overlaps listening.
pub struct VoiceOutput<T, P = RodioPlayer> {
    synthesizer: T,
    path: PathBuf,
    player: PhantomData<fn() -> P>,
}

impl<T: SpeechSynthesizer> VoiceOutput<T> {
    pub fn new(synthesizer: T, path: impl Into<PathBuf>) -> Self {
        Self::with_player(synthesizer, path)
    }
}

impl<T: SpeechSynthesizer, P> VoiceOutput<T, P> {
    /// Like [`VoiceOutput::new`] but plays through a custom [`AudioPlayer`].
    pub fn with_player(synthesizer: T, path: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            path: path.into(),
            player: PhantomData,
        }
    }
}

#[async_trait]
impl<T, P> Speaker for VoiceOutput<T, P>
where
    T: SpeechSynthesizer,
    P: AudioPlayer + Default + 'static,
{
    async fn speak(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            anyhow::bail!("Cannot speak empty text");
        }
        let audio = self.synthesizer.synthesize(text).await?;
        tokio::fs::write(&self.path, audio)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Audio saved as {}", self.path.display());
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || play_to_completion(&mut P::default(), &path))
            .await
            .with_context(|| "Playback task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    static PLAYED: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

    #[derive(Default)]
    struct SilentPlayer {
        loaded: Option<PathBuf>,
    }

    impl AudioPlayer for SilentPlayer {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn load(&mut self, path: &Path) -> Result<()> {
            assert!(path.exists());
            self.loaded = Some(path.to_path_buf());
            Ok(())
        }
        fn play(&mut self) {
            if let Some(path) = &self.loaded {
                PLAYED.lock().unwrap().push(path.clone());
            }
        }
        fn is_busy(&self) -> bool {
            false
        }
        fn stop(&mut self) {}
        fn release(&mut self) {
            self.loaded = None;
        }
    }

    struct FixedSynth(&'static [u8]);

    #[async_trait]
    impl SpeechSynthesizer for FixedSynth {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(self.0.to_vec())
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("Hello there.", 100), vec!["Hello there."]);
    }

    #[test]
    fn chunks_respect_limit_and_keep_every_word() {
        let text = "This is a fairly long sentence that keeps going well past the limit of the \
                    endpoint, so it must be split. Short one! And a question at the end?";
        let chunks = split_text(text, 40);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 40));
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn sentences_are_packed_while_they_fit() {
        let chunks = split_text("One. Two. Three.", 100);
        assert_eq!(chunks, vec!["One. Two. Three."]);
    }

    #[test]
    fn oversized_word_is_cut() {
        let word = "a".repeat(250);
        let chunks = split_text(&word, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_text("   ", 100).is_empty());
    }

    #[test]
    fn endpoint_uses_accent_domain() {
        let tts = GoogleTranslateTts::new("en", "co.uk", Duration::from_secs(1)).expect("client");
        assert_eq!(tts.endpoint(), "https://translate.google.co.uk/translate_tts");
    }

    #[tokio::test]
    async fn speak_overwrites_file_then_plays_it() {
        let path = std::env::temp_dir().join("talkback_speech_test.mp3");
        std::fs::write(&path, b"stale audio from an earlier turn").expect("seed file");
        let voice: VoiceOutput<_, SilentPlayer> =
            VoiceOutput::with_player(FixedSynth(b"ID3fresh"), &path);
        voice.speak("Hello").await.expect("speak");
        assert_eq!(std::fs::read(&path).expect("read"), b"ID3fresh");
        assert!(PLAYED.lock().unwrap().contains(&path));
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn speak_rejects_empty_text() {
        let path = std::env::temp_dir().join("talkback_speech_empty_test.mp3");
        let voice: VoiceOutput<_, SilentPlayer> = VoiceOutput::with_player(FixedSynth(b""), &path);
        assert!(voice.speak("   ").await.is_err());
    }
}
