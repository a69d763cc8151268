/*
 * @file lib.rs
 * @brief Talkback library root
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

//! Talkback - spoken conversation practice and one-shot text generation.
//!
//! This library provides two independent tools:
//! - A hands-free conversation loop: microphone capture, speech-to-text,
//!   an OpenAI-compatible chat model and Google Translate text-to-speech
//! - A GPT-2 text generator running locally on candle with deterministic
//!   beam search
//!
//! # Example
//! ```no_run
//! use anyhow::Result;
//! use talkback::{assistant, config::AppConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     dotenv::dotenv().ok();
//!     let config = AppConfig::load("config.json");
//!     assistant::run_voice_assistant(config, CancellationToken::new()).await
//! }
//! ```

pub mod ai;
pub mod assistant;
pub mod audio;
pub mod config;
pub mod error;
pub mod generate;
pub mod listen;
pub mod player;
pub mod speech;
pub mod transcript;
