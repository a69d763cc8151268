//! Byte-level BPE tokenizer shipped with GPT-2 checkpoints.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{GenerateError, ModelLoadError};
use crate::generate::TokenCodec;

/// Special token closing every GPT-2 document.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// [`TokenCodec`] over a `tokenizer.json` file.
pub struct Gpt2Tokenizer {
    inner: Tokenizer,
    eos_token_id: Option<u32>,
}

impl Gpt2Tokenizer {
    /// Loads `tokenizer.json` from disk.
    ///
    /// # Errors
    /// Returns [`ModelLoadError::Tokenizer`] if the file is missing or invalid.
    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let inner = Tokenizer::from_file(path)
            .map_err(|err| ModelLoadError::Tokenizer(format!("{}: {}", path.display(), err)))?;
        Ok(Self::from_tokenizer(inner))
    }

    pub fn from_tokenizer(inner: Tokenizer) -> Self {
        let eos_token_id = inner.token_to_id(END_OF_TEXT);
        Self {
            inner,
            eos_token_id,
        }
    }
}

impl TokenCodec for Gpt2Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerateError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|err| GenerateError::Tokenization(err.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, GenerateError> {
        self.inner
            .decode(tokens, true)
            .map_err(|err| GenerateError::Tokenization(err.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}
