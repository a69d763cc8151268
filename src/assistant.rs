/*
 * @file assistant.rs
 * @brief Implementation of Talkback's turn-based voice conversation loop
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

//! Voice conversation orchestration module.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::{ApiKey, ChatSession, LanguageModel, OpenAiChat};
use crate::audio::CaptureSettings;
use crate::config::AppConfig;
use crate::listen::{Listener, MicrophoneListener, WhisperApiRecognizer};
use crate::speech::{GoogleTranslateTts, Speaker, VoiceOutput};

/// Where the conversation loop currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the user's next utterance.
    AwaitingSpeech,
    /// Sending the carried user text to the language model.
    GeneratingResponse(String),
    /// Speaking the carried assistant reply.
    Speaking(String),
    /// Terminal; reached only through cancellation.
    Stopped,
}

/// Runs the voice conversation described by `config` until `cancel` fires.
///
/// # Details
/// Builds the language-model client, microphone listener and speech output
/// for one session, primes the conversation with the configured starter
/// question and then alternates listening and answering.
///
/// # Returns
/// `Ok(())` once the loop stops through cancellation.
///
/// # Errors
/// Returns an error if the secret cannot be read, a client cannot be built,
/// capture plumbing breaks, or the language-model service fails.
pub async fn run_voice_assistant(config: AppConfig, cancel: CancellationToken) -> Result<()> {
    let api_key = ApiKey::new(config.read_secret()?);
    let model = OpenAiChat::new(
        &config.api_base_url,
        config.chat_model.as_str(),
        api_key.clone(),
        config.request_timeout(),
    )?;
    let recognizer = WhisperApiRecognizer::new(
        &config.api_base_url,
        config.transcription_model.as_str(),
        api_key,
        config.request_timeout(),
    )?;
    let listener = MicrophoneListener::new(capture_settings(&config), recognizer);
    let tts = GoogleTranslateTts::new(
        config.tts_lang.as_str(),
        config.tts_tld.as_str(),
        config.request_timeout(),
    )?;
    let speaker = VoiceOutput::new(tts, config.audio_output_path.as_str());
    info!(model = %config.chat_model, "starting conversation");
    let session = ChatSession::new(model, config.persona.as_str());
    ConversationLoop::new(session, listener, speaker, cancel)
        .with_starter_question(config.starter_question.as_str())
        .run()
        .await
}

fn capture_settings(config: &AppConfig) -> CaptureSettings {
    CaptureSettings {
        timeout: config.listen_timeout(),
        phrase_time_limit: config.phrase_time_limit(),
        pause_threshold: config.pause_threshold(),
    }
}

/// Turn-based dialogue between a listener, a language model and a speaker.
///
/// # Details
/// Strictly sequential: each state finishes before the next begins, so
/// listening never overlaps speaking. The cancellation token is checked
/// before capture and before each service call; in-flight work is never
/// interrupted.
pub struct ConversationLoop<M, L, S> {
    session: ChatSession<M>,
    listener: L,
    speaker: S,
    cancel: CancellationToken,
    starter_question: String,
}

impl<M, L, S> ConversationLoop<M, L, S>
where
    M: LanguageModel,
    L: Listener,
    S: Speaker,
{
    pub fn new(
        session: ChatSession<M>,
        listener: L,
        speaker: S,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            listener,
            speaker,
            cancel,
            starter_question: crate::config::DEFAULT_STARTER_QUESTION.to_string(),
        }
    }

    /// Replaces the question sent for the priming exchange.
    pub fn with_starter_question(mut self, question: impl Into<String>) -> Self {
        self.starter_question = question.into();
        self
    }

    /// Runs the priming exchange and then loops until cancelled.
    ///
    /// # Returns
    /// `Ok(())` once the loop reaches [`LoopState::Stopped`].
    ///
    /// # Errors
    /// Bubbles up [`crate::error::ServiceError`] from the language model and
    /// capture plumbing failures; the transcript is left without a dangling
    /// user turn.
    pub async fn run(mut self) -> Result<()> {
        let mut state = LoopState::GeneratingResponse(self.starter_question.clone());
        while state != LoopState::Stopped {
            state = self.step(state).await?;
        }
        info!("Loop interrupted by user.");
        Ok(())
    }

    /// Performs one state transition.
    ///
    /// # Errors
    /// See [`ConversationLoop::run`].
    pub async fn step(&mut self, state: LoopState) -> Result<LoopState> {
        if self.cancel.is_cancelled() {
            return Ok(LoopState::Stopped);
        }
        debug!(?state, "conversation step");
        let next = match state {
            LoopState::AwaitingSpeech => {
                let recognition = self.listener.listen().await?;
                let text = recognition.as_user_text().to_string();
                println!("You said: {}", text);
                LoopState::GeneratingResponse(text)
            }
            LoopState::GeneratingResponse(user_text) => {
                let reply = self.session.submit_and_respond(&user_text).await?;
                println!("\n{}", reply);
                LoopState::Speaking(reply)
            }
            LoopState::Speaking(reply) => {
                self.speak_response(&reply).await;
                LoopState::AwaitingSpeech
            }
            LoopState::Stopped => LoopState::Stopped,
        };
        Ok(next)
    }

    /// Speaks the reply, logging failures; the text was already printed.
    async fn speak_response(&self, reply: &str) {
        if let Err(err) = self.speaker.speak(reply).await {
            warn!("TTS error: {:#}", err);
        }
    }

    pub fn session(&self) -> &ChatSession<M> {
        &self.session
    }
}
