//! Runtime configuration for the conversation loop.
//!
//! Values come from `config.json`, then environment overrides, then baked
//! defaults. The language-model secret lives in its own file and is only
//! read on demand.

use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Default configuration file consulted by the `talkback` binary.
pub const CONFIG_PATH: &str = "config.json";

/// Priming question sent before the first spoken turn.
pub const DEFAULT_STARTER_QUESTION: &str = "I am studying English, so let's talk in English. \
Let's discuss a random topic. I want your answer to be in two topics. The first is that you \
correct my grammar mistakes when I write something wrong. The second topic is that when I type \
my sentence, you rephrase it so that it is more complete and more coherent. You can start by \
asking a question about a random topic";

/// Strongly typed representation of `config.json`.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "fallback_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "fallback_chat_model")]
    pub chat_model: String,
    #[serde(default = "fallback_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "fallback_secret_key_path")]
    pub secret_key_path: String,
    #[serde(default = "fallback_persona")]
    pub persona: String,
    #[serde(default = "fallback_starter_question")]
    pub starter_question: String,
    #[serde(default = "fallback_tts_lang")]
    pub tts_lang: String,
    #[serde(default = "fallback_tts_tld")]
    pub tts_tld: String,
    #[serde(default = "fallback_audio_output_path")]
    pub audio_output_path: String,
    #[serde(default = "fallback_listen_timeout_secs")]
    pub listen_timeout_secs: u64,
    #[serde(default = "fallback_phrase_time_limit_secs")]
    pub phrase_time_limit_secs: u64,
    #[serde(default = "fallback_pause_threshold_secs")]
    pub pause_threshold_secs: f32,
    #[serde(default = "fallback_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: fallback_api_base_url(),
            chat_model: fallback_chat_model(),
            transcription_model: fallback_transcription_model(),
            secret_key_path: fallback_secret_key_path(),
            persona: fallback_persona(),
            starter_question: fallback_starter_question(),
            tts_lang: fallback_tts_lang(),
            tts_tld: fallback_tts_tld(),
            audio_output_path: fallback_audio_output_path(),
            listen_timeout_secs: fallback_listen_timeout_secs(),
            phrase_time_limit_secs: fallback_phrase_time_limit_secs(),
            pause_threshold_secs: fallback_pause_threshold_secs(),
            request_timeout_secs: fallback_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, falling back to defaults, then applies env overrides.
    ///
    /// # Details
    /// A missing or unparsable file is not fatal: the problem is logged and
    /// the baked defaults are used instead.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut config = load_config_file(path.as_ref());
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = env::var("TALKBACK_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Ok(base) = env::var("TALKBACK_API_BASE") {
            self.api_base_url = base;
        }
        if let Ok(path) = env::var("TALKBACK_SECRET_PATH") {
            self.secret_key_path = path;
        }
    }

    /// Reads the language-model secret from [`AppConfig::secret_key_path`].
    ///
    /// # Errors
    /// Returns an error if the file is missing, unreadable or blank. The
    /// secret itself never appears in the error message.
    pub fn read_secret(&self) -> Result<String> {
        let raw = fs::read_to_string(&self.secret_key_path)
            .with_context(|| format!("Failed to read secret from {}", self.secret_key_path))?;
        let secret = raw.trim();
        if secret.is_empty() {
            anyhow::bail!("Secret file {} is empty", self.secret_key_path);
        }
        Ok(secret.to_string())
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn phrase_time_limit(&self) -> Duration {
        Duration::from_secs(self.phrase_time_limit_secs)
    }

    pub fn pause_threshold(&self) -> Duration {
        Duration::from_secs_f32(self.pause_threshold_secs.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn load_config_file(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(path = %path.display(), %err, "config parse error, using defaults");
                AppConfig::default()
            }
        },
        Err(err) => {
            warn!(path = %path.display(), %err, "config load error, using defaults");
            AppConfig::default()
        }
    }
}

fn fallback_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn fallback_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn fallback_transcription_model() -> String {
    "whisper-1".to_string()
}

fn fallback_secret_key_path() -> String {
    "ignore/config.txt".to_string()
}

fn fallback_persona() -> String {
    "You are a English teacher.".to_string()
}

fn fallback_starter_question() -> String {
    DEFAULT_STARTER_QUESTION.to_string()
}

fn fallback_tts_lang() -> String {
    "en".to_string()
}

fn fallback_tts_tld() -> String {
    "us".to_string()
}

fn fallback_audio_output_path() -> String {
    "output.mp3".to_string()
}

fn fallback_listen_timeout_secs() -> u64 {
    10
}

fn fallback_phrase_time_limit_secs() -> u64 {
    20
}

fn fallback_pause_threshold_secs() -> f32 {
    5.0
}

fn fallback_request_timeout_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"chat_model": "gpt-4o"}"#).expect("parse config");
        assert_eq!(cfg.chat_model, "gpt-4o");
        assert_eq!(cfg.persona, "You are a English teacher.");
        assert_eq!(cfg.audio_output_path, "output.mp3");
        assert_eq!(cfg.listen_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.phrase_time_limit(), Duration::from_secs(20));
        assert_eq!(cfg.pause_threshold(), Duration::from_secs(5));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config_file(Path::new("definitely/not/here.json"));
        assert_eq!(cfg.chat_model, "gpt-4o-mini");
        assert_eq!(cfg.secret_key_path, "ignore/config.txt");
    }

    #[test]
    fn read_secret_trims_whitespace() {
        let path = std::env::temp_dir().join("talkback_secret_test.txt");
        fs::write(&path, "  sk-test\n").expect("write secret");
        let cfg = AppConfig {
            secret_key_path: path.to_string_lossy().to_string(),
            ..AppConfig::default()
        };
        assert_eq!(cfg.read_secret().expect("read secret"), "sk-test");
        fs::remove_file(path).ok();
    }

    #[test]
    fn read_secret_rejects_blank_file() {
        let path = std::env::temp_dir().join("talkback_blank_secret_test.txt");
        fs::write(&path, "\n").expect("write secret");
        let cfg = AppConfig {
            secret_key_path: path.to_string_lossy().to_string(),
            ..AppConfig::default()
        };
        assert!(cfg.read_secret().is_err());
        fs::remove_file(path).ok();
    }
}
