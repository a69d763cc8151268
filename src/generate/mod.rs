/*
 * @file mod.rs
 * @brief One-shot text continuation with a pretrained GPT-2 model
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! One-shot text generation.
//!
//! A [`TextGenerator`] pairs a [`TokenCodec`] with a [`NextTokenModel`] and
//! continues a prompt with deterministic beam search. Each call is
//! independent; nothing is remembered between requests.
//!
//! # Example
//! ```no_run
//! use talkback::generate::{GenerationRequest, TextGenerator};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut generator = TextGenerator::from_pretrained("gpt2-large")?;
//! let text = generator.generate(&GenerationRequest::new("Once upon a time"))?;
//! println!("{text}");
//! # Ok(())
//! # }
//! ```

pub mod beam;
pub mod gpt2;
pub mod tokenizer;

use hf_hub::api::sync::Api;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{GenerateError, ModelLoadError};
use beam::{beam_search, BeamSearchConfig, NextTokenModel};
use gpt2::{Gpt2, Gpt2Config};
use tokenizer::Gpt2Tokenizer;

/// Checkpoint used when no repository is given.
pub const DEFAULT_MODEL_REPO: &str = "gpt2-large";

/// Converts between text and token ids.
pub trait TokenCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerateError>;
    /// Decodes `tokens`, skipping special tokens.
    fn decode(&self, tokens: &[u32]) -> Result<String, GenerateError>;
    fn eos_token_id(&self) -> Option<u32>;
}

/// Parameters for one [`TextGenerator::generate`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    max_length: usize,
    num_beams: usize,
    no_repeat_ngram_size: usize,
    early_stopping: bool,
    length_penalty: f32,
}

impl GenerationRequest {
    /// A request with 100 total tokens, 5 beams, no repeated bigrams and
    /// early stopping.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_length: 100,
            num_beams: 5,
            no_repeat_ngram_size: 2,
            early_stopping: true,
            length_penalty: 1.0,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_num_beams(mut self, num_beams: usize) -> Self {
        self.num_beams = num_beams;
        self
    }

    pub fn with_no_repeat_ngram_size(mut self, size: usize) -> Self {
        self.no_repeat_ngram_size = size;
        self
    }

    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    pub fn with_length_penalty(mut self, length_penalty: f32) -> Self {
        self.length_penalty = length_penalty;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn num_beams(&self) -> usize {
        self.num_beams
    }

    pub fn no_repeat_ngram_size(&self) -> usize {
        self.no_repeat_ngram_size
    }

    pub fn early_stopping(&self) -> bool {
        self.early_stopping
    }

    pub fn length_penalty(&self) -> f32 {
        self.length_penalty
    }

    fn search_config(&self, eos_token_id: Option<u32>) -> BeamSearchConfig {
        BeamSearchConfig {
            num_beams: self.num_beams,
            max_length: self.max_length,
            no_repeat_ngram_size: self.no_repeat_ngram_size,
            early_stopping: self.early_stopping,
            length_penalty: self.length_penalty,
            eos_token_id,
        }
    }
}

/// Prompt continuation engine.
pub struct TextGenerator<C, M> {
    codec: C,
    model: M,
    context_window: usize,
}

impl TextGenerator<Gpt2Tokenizer, Gpt2> {
    /// Fetches `config.json`, `tokenizer.json` and `model.safetensors` for
    /// `repo` from the Hugging Face Hub (or the local cache) and loads them
    /// on the CPU.
    ///
    /// # Errors
    /// Returns a [`ModelLoadError`] if any file cannot be fetched or parsed.
    pub fn from_pretrained(repo: &str) -> Result<Self, ModelLoadError> {
        info!(repo, "loading pretrained model");
        let api = Api::new().map_err(|source| ModelLoadError::Hub {
            repo: repo.to_string(),
            file: String::new(),
            source,
        })?;
        let hub = api.model(repo.to_string());
        let fetch = |file: &str| -> Result<PathBuf, ModelLoadError> {
            hub.get(file).map_err(|source| ModelLoadError::Hub {
                repo: repo.to_string(),
                file: file.to_string(),
                source,
            })
        };

        let config = Gpt2Config::from_file(&fetch("config.json")?)?;
        let codec = Gpt2Tokenizer::from_file(&fetch("tokenizer.json")?)?;
        let model = Gpt2::from_safetensors(config, &fetch("model.safetensors")?)?;
        let context_window = model.config().n_positions;
        Ok(Self::new(codec, model, context_window))
    }
}

impl<C: TokenCodec, M: NextTokenModel> TextGenerator<C, M> {
    /// # Arguments
    /// * `context_window` - Longest sequence the model accepts, in tokens.
    pub fn new(codec: C, model: M, context_window: usize) -> Self {
        Self {
            codec,
            model,
            context_window,
        }
    }

    /// Continues `request.prompt()` with beam search.
    ///
    /// # Returns
    /// The decoded prompt plus continuation, special tokens removed.
    ///
    /// # Errors
    /// * [`GenerateError::EmptyPrompt`] for a blank prompt.
    /// * [`GenerateError::InvalidRequest`] for zero beams or a `max_length`
    ///   past the context window.
    /// * Tokenization and inference failures.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<String, GenerateError> {
        if request.prompt.trim().is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        if request.num_beams == 0 {
            return Err(GenerateError::InvalidRequest(
                "num_beams must be at least 1".to_string(),
            ));
        }
        if request.max_length > self.context_window {
            return Err(GenerateError::InvalidRequest(format!(
                "max_length {} exceeds the {} token context window",
                request.max_length, self.context_window
            )));
        }

        let prompt = self.codec.encode(&request.prompt)?;
        if prompt.is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        if prompt.len() >= request.max_length {
            warn!(
                prompt_tokens = prompt.len(),
                max_length = request.max_length,
                "prompt already reaches max_length; nothing to generate"
            );
            return self.codec.decode(&prompt);
        }

        // Padding shares the end-of-sequence id, so no separate pad token.
        let config = request.search_config(self.codec.eos_token_id());
        let output = beam_search(&mut self.model, &prompt, &config)?;
        info!(
            prompt_tokens = prompt.len(),
            generated_tokens = output.len() - prompt.len(),
            "generation finished"
        );
        self.codec.decode(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::beam::tests::ToyModel;

    /// Word-level codec over a fixed vocabulary; id 0 is end-of-text.
    struct WordCodec {
        vocab: Vec<&'static str>,
        eos: Option<u32>,
    }

    impl WordCodec {
        fn new() -> Self {
            Self {
                eos: Some(0),
                vocab: vec![
                    "<eot>", "Once", "upon", "a", "time", "there", "was", "king", "who", "lived",
                    "in", "castle", "and", "the", "sea", "far",
                ],
            }
        }
    }

    impl TokenCodec for WordCodec {
        fn encode(&self, text: &str) -> Result<Vec<u32>, GenerateError> {
            text.split_whitespace()
                .map(|word| {
                    self.vocab
                        .iter()
                        .position(|known| *known == word)
                        .map(|idx| idx as u32)
                        .ok_or_else(|| GenerateError::Tokenization(format!("unknown word {word}")))
                })
                .collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String, GenerateError> {
            Ok(tokens
                .iter()
                .filter(|&&id| id != 0)
                .map(|&id| self.vocab[id as usize])
                .collect::<Vec<_>>()
                .join(" "))
        }

        fn eos_token_id(&self) -> Option<u32> {
            self.eos
        }
    }

    fn generator() -> TextGenerator<WordCodec, ToyModel> {
        TextGenerator::new(WordCodec::new(), ToyModel::new(16), 64)
    }

    #[test]
    fn request_defaults() {
        let request = GenerationRequest::new("Once upon a time");
        assert_eq!(request.max_length(), 100);
        assert_eq!(request.num_beams(), 5);
        assert_eq!(request.no_repeat_ngram_size(), 2);
        assert!(request.early_stopping());
        assert_eq!(request.length_penalty(), 1.0);
    }

    #[test]
    fn builders_flow_into_search_config() {
        let request = GenerationRequest::new("Once")
            .with_num_beams(3)
            .with_max_length(40)
            .with_no_repeat_ngram_size(0)
            .with_early_stopping(false)
            .with_length_penalty(2.0);
        let config = request.search_config(Some(0));
        assert_eq!(config.num_beams, 3);
        assert_eq!(config.max_length, 40);
        assert_eq!(config.no_repeat_ngram_size, 0);
        assert!(!config.early_stopping);
        assert_eq!(config.length_penalty, 2.0);
        assert_eq!(config.eos_token_id, Some(0));
    }

    #[test]
    fn same_request_gives_identical_text() {
        let request = GenerationRequest::new("Once upon a time").with_max_length(30);
        let first = generator().generate(&request).expect("generate");
        let second = generator().generate(&request).expect("generate");
        assert_eq!(first, second);
        assert!(first.starts_with("Once upon a time"));
    }

    #[test]
    fn continuation_runs_to_max_length_without_end_of_text() {
        let mut codec = WordCodec::new();
        codec.eos = None;
        let mut generator = TextGenerator::new(codec, ToyModel::new(16), 64);
        let request = GenerationRequest::new("Once upon a time").with_max_length(12);
        let text = generator.generate(&request).expect("generate");
        assert!(text.starts_with("Once upon a time "));
        assert!(text.split_whitespace().count() > 4);
    }

    #[test]
    fn empty_prompt_is_rejected() {
        for prompt in ["", "   \n"] {
            let err = generator()
                .generate(&GenerationRequest::new(prompt))
                .unwrap_err();
            assert!(matches!(err, GenerateError::EmptyPrompt));
        }
    }

    #[test]
    fn max_length_past_context_window_is_rejected() {
        let request = GenerationRequest::new("Once upon a time").with_max_length(65);
        let err = generator().generate(&request).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidRequest(_)));
    }

    #[test]
    fn zero_beams_is_rejected() {
        let request = GenerationRequest::new("Once").with_num_beams(0);
        let err = generator().generate(&request).unwrap_err();
        assert!(matches!(err, GenerateError::InvalidRequest(_)));
    }

    #[test]
    fn prompt_at_max_length_comes_back_unchanged() {
        let mut generator = generator();
        let request = GenerationRequest::new("Once upon a time").with_max_length(4);
        assert_eq!(generator.generate(&request).expect("generate"), "Once upon a time");
        assert_eq!(generator.model.calls, 0);
    }

    #[test]
    fn unknown_word_is_a_tokenization_error() {
        let err = generator()
            .generate(&GenerationRequest::new("dragon"))
            .unwrap_err();
        assert!(matches!(err, GenerateError::Tokenization(_)));
    }
}
