use std::path::Path;

use rand::Rng;
use reqwest::multipart;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::error::{PlannerError, Result};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_DELAY_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.0;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

enum SendOutcome {
    Sent,
    /// Worth retrying: network trouble, rate limits, server errors.
    Transient(String),
    /// Retrying cannot help: bad request, revoked token.
    Permanent(String),
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        }
    }

    /// Sends one Markdown message, retrying transient failures with
    /// exponential backoff.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let url = self.method_url("sendMessage");
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        self.with_retries("sendMessage", || async {
            let sent = self
                .http
                .post(&url)
                .json(&payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;
            outcome(sent).await
        })
        .await
    }

    /// Uploads a file via sendDocument with a Markdown caption.
    pub async fn send_document(&self, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            PlannerError::DispatchFailed(format!("reading {} failed: {}", path.display(), err))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("study-guide.md")
            .to_string();
        let url = self.method_url("sendDocument");

        self.with_retries("sendDocument", || {
            let bytes = bytes.clone();
            let file_name = file_name.clone();
            let url = url.clone();
            async move {
                let form = multipart::Form::new()
                    .text("chat_id", self.chat_id.clone())
                    .text("caption", caption.to_string())
                    .text("parse_mode", "Markdown".to_string())
                    .part("document", multipart::Part::bytes(bytes).file_name(file_name));
                let sent = self
                    .http
                    .post(&url)
                    .multipart(form)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await;
                outcome(sent).await
            }
        })
        .await
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    async fn with_retries<F, Fut>(&self, what: &str, attempt_fn: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = SendOutcome>,
    {
        let mut last_reason = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match attempt_fn().await {
                SendOutcome::Sent => return Ok(()),
                SendOutcome::Permanent(reason) => {
                    return Err(PlannerError::DispatchFailed(format!(
                        "{}: {}",
                        what, reason
                    )));
                }
                SendOutcome::Transient(reason) => {
                    if attempt < MAX_ATTEMPTS {
                        let delay = backoff(attempt);
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %reason,
                            "telegram {} failed, retrying", what
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_reason = reason;
                }
            }
        }
        Err(PlannerError::DispatchFailed(format!(
            "{} failed after {} attempts: {}",
            what, MAX_ATTEMPTS, last_reason
        )))
    }
}

async fn outcome(sent: reqwest::Result<reqwest::Response>) -> SendOutcome {
    let resp = match sent {
        Ok(resp) => resp,
        Err(err) => return SendOutcome::Transient(err.to_string()),
    };
    let status = resp.status();
    if status.is_success() {
        return SendOutcome::Sent;
    }
    let body = resp.text().await.unwrap_or_default();
    let reason = format!("Telegram API error: {} - {}", status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        SendOutcome::Transient(reason)
    } else {
        SendOutcome::Permanent(reason)
    }
}

fn backoff(attempt: u32) -> std::time::Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (INITIAL_DELAY_MS as f64 * exp) as u64;
    let jitter = rand::thread_rng().gen_range(0.9..1.1);
    std::time::Duration::from_millis((base as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::new(&TelegramConfig {
            bot_token: "test-token".to_string(),
            chat_id: "12345".to_string(),
            base_url: server.uri(),
        })
    }

    #[tokio::test]
    async fn messages_carry_markdown_mode_and_chat_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "12345",
                "text": "hello",
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn rate_limit_then_success_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).send_message("hello").await.unwrap_err();
        match err {
            PlannerError::DispatchFailed(reason) => {
                assert!(reason.contains("after 3 attempts"));
                assert!(reason.contains("500"));
            }
            other => panic!("expected DispatchFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad markdown"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).send_message("hello").await.unwrap_err();
        assert!(matches!(err, PlannerError::DispatchFailed(_)));
    }

    #[tokio::test]
    async fn documents_upload_as_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottest-token/sendDocument"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Study Guide").unwrap();

        client(&server)
            .send_document(file.path(), "📖 *Study Guide: Midterm*")
            .await
            .unwrap();
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff(1);
        let third = backoff(3);
        assert!(first.as_millis() >= 180 && first.as_millis() <= 220);
        assert!(third.as_millis() >= 720 && third.as_millis() <= 880);
    }
}
