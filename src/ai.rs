//! Language-model client and conversation session.
//!
//! This module handles interaction with an OpenAI-compatible chat completion
//! API and keeps the transcript that is replayed on every request.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::transcript::{Role, Transcript, Turn};

/// Remote service that produces the next assistant turn for a transcript.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends the ordered turns and returns the generated assistant text.
    async fn complete(&self, turns: &[Turn]) -> Result<String, ServiceError>;
}

/// Bearer secret for the language-model service.
///
/// `Debug` is redacted so the key cannot leak through logs or panics.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Chat message structure for the completion API.
#[derive(Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

/// Request structure for the completion API.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client.
///
/// # Details
/// Constructed explicitly and owned by one [`ChatSession`]; there is no
/// process-wide client.
#[derive(Debug)]
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: ApiKey,
}

impl OpenAiChat {
    /// Creates a client for `model` at `base_url`.
    ///
    /// # Arguments
    /// * `base_url` - API root such as `https://api.openai.com/v1`.
    /// * `model` - Model identifier sent with each request.
    /// * `api_key` - Bearer secret.
    /// * `timeout` - Whole-request timeout.
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
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    fn build_request<'a>(&'a self, turns: &'a [Turn]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|turn| ChatMessage {
                    role: turn.role,
                    content: &turn.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, turns: &[Turn]) -> Result<String, ServiceError> {
        debug!(model = %self.model, turns = turns.len(), "requesting completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&self.build_request(turns))
            .send()
            .await
            .map_err(ServiceError::Unreachable)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let body = response
            .text()
            .await
            .map_err(ServiceError::Unreachable)?;
        extract_reply(&body)
    }
}

/// Pulls `choices[0].message.content` out of a completion response body.
fn extract_reply(body: &str) -> Result<String, ServiceError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|err| ServiceError::Malformed(err.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::Malformed("response carried no message content".into()))
}

/// One conversation with a language model.
///
/// # Details
/// Owns the model client and the [`Transcript`]. Each exchange appends a
/// user turn before the request and an assistant turn after the reply.
pub struct ChatSession<M> {
    model: M,
    transcript: Transcript,
}

impl<M: LanguageModel> ChatSession<M> {
    /// Starts a session whose transcript holds only `persona` as system turn.
    pub fn new(model: M, persona: impl Into<String>) -> Self {
        Self {
            model,
            transcript: Transcript::new(persona),
        }
    }

    /// Sends `user_text` with the full history and records the reply.
    ///
    /// # Returns
    /// The assistant's reply text.
    ///
    /// # Errors
    /// Returns [`ServiceError`] when the request fails. The user turn added
    /// for the failed request is rolled back, so the transcript is left as it
    /// was before the call.
    pub async fn submit_and_respond(&mut self, user_text: &str) -> Result<String, ServiceError> {
        self.transcript.push_user(user_text);
        match self.model.complete(self.transcript.turns()).await {
            Ok(reply) => {
                self.transcript.push_assistant(reply.as_str());
                info!(turns = self.transcript.len(), "assistant replied");
                Ok(reply)
            }
            Err(err) => {
                self.transcript.rollback_user();
                warn!(%err, "completion failed, dropped unanswered user turn");
                Err(err)
            }
        }
    }

    /// Returns the full conversation history.
    pub fn history(&self) -> &[Turn] {
        self.transcript.turns()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers exactly one HTTP request with `status` and a JSON `body`.
    ///
    /// Returns the base URL of the server.
    pub(crate) async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    /// Drains headers and body so the client never sees a reset.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0_u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
            let body_len = data.len() - end - 4;
            let complete = match head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
            {
                Some(len) => body_len >= len.trim().parse::<usize>().unwrap_or(0),
                None if head.contains("transfer-encoding: chunked") => {
                    data.ends_with(b"0\r\n\r\n")
                }
                None => true,
            };
            if complete {
                return;
            }
        }
    }

    /// Scripted model that echoes the last user turn or fails on demand.
    pub(crate) struct ScriptedModel {
        pub fail: Mutex<bool>,
        pub seen: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        pub(crate) fn new() -> Self {
            Self {
                fail: Mutex::new(false),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, turns: &[Turn]) -> Result<String, ServiceError> {
            self.seen.lock().unwrap().push(turns.len());
            if *self.fail.lock().unwrap() {
                return Err(ServiceError::Rejected {
                    status: 401,
                    message: "invalid key".into(),
                });
            }
            let last = turns.last().map(|t| t.content.as_str()).unwrap_or("");
            Ok(format!("You said: {last}"))
        }
    }

    #[tokio::test]
    async fn successful_exchange_appends_user_then_assistant() {
        let mut session = ChatSession::new(ScriptedModel::new(), "persona");
        let reply = session.submit_and_respond("hello").await.expect("reply");
        assert_eq!(reply, "You said: hello");
        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[1].content, "hello");
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content, reply);
    }

    #[tokio::test]
    async fn model_sees_full_transcript_including_new_user_turn() {
        let mut session = ChatSession::new(ScriptedModel::new(), "persona");
        session.submit_and_respond("one").await.expect("first");
        session.submit_and_respond("two").await.expect("second");
        assert_eq!(*session.model.seen.lock().unwrap(), vec![2, 4]);
    }

    #[tokio::test]
    async fn failed_exchange_leaves_transcript_untouched() {
        let model = ScriptedModel::new();
        *model.fail.lock().unwrap() = true;
        let mut session = ChatSession::new(model, "persona");
        let err = session.submit_and_respond("hello").await.unwrap_err();
        assert!(matches!(err, ServiceError::Rejected { status: 401, .. }));
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::System);
    }

    #[test]
    fn extract_reply_reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"}}]}"#;
        assert_eq!(extract_reply(body).expect("reply"), "Hi there");
    }

    #[test]
    fn extract_reply_flags_empty_choices() {
        let err = extract_reply(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn request_carries_roles_and_model() {
        let chat = OpenAiChat::new(
            "https://example.invalid/v1/",
            "gpt-4o-mini",
            ApiKey::new("sk-secret"),
            Duration::from_secs(1),
        )
        .expect("client");
        assert_eq!(chat.endpoint, "https://example.invalid/v1/chat/completions");
        let mut transcript = Transcript::new("persona");
        transcript.push_user("hello");
        let json = serde_json::to_value(chat.build_request(transcript.turns())).expect("json");
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret");
        assert!(!format!("{key:?}").contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_rejected_error() {
        let base = serve_once("401 Unauthorized", r#"{"error":"invalid key"}"#).await;
        let chat = OpenAiChat::new(&base, "gpt-4o-mini", ApiKey::new("sk"), Duration::from_secs(5))
            .expect("client");
        let err = chat
            .complete(Transcript::new("persona").turns())
            .await
            .unwrap_err();
        match err {
            ServiceError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("invalid key"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_status_returns_first_choice() {
        let base = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Nice to meet you"}}]}"#,
        )
        .await;
        let chat = OpenAiChat::new(&base, "gpt-4o-mini", ApiKey::new("sk"), Duration::from_secs(5))
            .expect("client");
        let reply = chat
            .complete(Transcript::new("persona").turns())
            .await
            .expect("reply");
        assert_eq!(reply, "Nice to meet you");
    }

    #[tokio::test]
    async fn unreachable_service_maps_to_unreachable_error() {
        let chat = OpenAiChat::new(
            "http://127.0.0.1:9",
            "gpt-4o-mini",
            ApiKey::new("sk"),
            Duration::from_secs(2),
        )
        .expect("client");
        let turns = Transcript::new("persona");
        let err = chat.complete(turns.turns()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unreachable(_)));
    }
}
