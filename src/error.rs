/*
 * @file error.rs
 * @brief Error taxonomy shared by the conversation loop and the generator
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

//! Typed failures raised across module seams.
//!
//! Application plumbing (device setup, file IO, binaries) stays on
//! [`anyhow::Error`]; the variants here are the ones callers are expected to
//! match on.

use thiserror::Error;

/// Failure talking to the remote language-model service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("language model service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The service answered with a non-success status (auth, quota, ...).
    #[error("language model service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service answered but the body did not carry a reply.
    #[error("language model response was malformed: {0}")]
    Malformed(String),
}

/// Failure fetching or loading the pretrained generation model.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to fetch {file} from {repo}: {source}")]
    Hub {
        repo: String,
        file: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("failed to read model config {path}: {message}")]
    Config { path: String, message: String },

    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("failed to load model weights: {0}")]
    Weights(#[from] candle_core::Error),
}

/// Failure producing a continuation with the one-shot generator.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
}
