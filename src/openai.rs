use anyhow::{anyhow, Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;

// Generous enough for long study-guide completions; faster callers bound
// their own calls with tokio::time::timeout.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// Chat call constrained to a JSON object reply, parsed into `T`.
    pub async fn chat_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<T> {
        let content = self
            .chat(
                system,
                user,
                max_tokens,
                Some(ResponseFormat {
                    r#type: "json_object".to_string(),
                }),
            )
            .await?;
        serde_json::from_str(&content).context("OpenAI JSON content parse failed")
    }

    /// Free-form chat call, returning the raw assistant text.
    pub async fn chat_text(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        self.chat(system, user, max_tokens, None).await
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        response_format: Option<ResponseFormat>,
    ) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            response_format,
            temperature: 0.3,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = resp.status();
        let body = resp.text().await.context("OpenAI response read failed")?;

        if !status.is_success() {
            return Err(anyhow!("OpenAI API error: {} - {}", status, body));
        }

        let parsed: OpenAiResponse =
            serde_json::from_str(&body).context("OpenAI response parse failed")?;
        let content = parsed
            .choices
            .first()
            .ok_or_else(|| anyhow!("OpenAI response missing choices"))?
            .message
            .content
            .clone();
        Ok(content)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}
