use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::feedback::prompts::Prompt;
use crate::llm::gateway::GatewayError;
use crate::llm::media::attachment_url;
use crate::utils::text::{summarize_error_body, truncate_for_log};
use crate::utils::timing::log_llm_timing;

/// Chat-completions client for the critique model.
pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    response_language: Option<String>,
    inline_local_images: bool,
}

fn summarize_payload(payload: &Value) -> String {
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let messages = payload.get("messages").and_then(|v| v.as_array());
    let message_count = messages.map(|messages| messages.len()).unwrap_or(0);
    let image_parts = messages
        .into_iter()
        .flatten()
        .filter_map(|message| message.get("content").and_then(|v| v.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("image_url"))
        .count();

    format!(
        "model={}, messages={}, image_parts={}",
        model, message_count, image_parts
    )
}

fn build_message_content(text: &str, image_url: Option<&str>) -> Value {
    let Some(image_url) = image_url else {
        return Value::String(text.to_string());
    };

    json!([
        { "type": "text", "text": text },
        { "type": "image_url", "image_url": { "url": image_url } }
    ])
}

fn extract_content(response: &Value) -> Option<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

impl OpenAiChatClient {
    pub fn from_config(config: &Config, client: Client) -> Self {
        OpenAiChatClient {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.chat_model.clone(),
            temperature: config.chat_temperature,
            response_language: config.feedback_language.clone(),
            inline_local_images: config.inline_local_images,
        }
    }

    async fn build_payload(&self, prompt: &Prompt) -> Result<Value, GatewayError> {
        let mut text = prompt.text.clone();
        if let Some(language) = &self.response_language {
            text.push_str(&format!("\n\nPlease reply in {}.", language));
        }

        let image_url = match &prompt.image {
            Some(image) => Some(
                attachment_url(image, self.inline_local_images)
                    .await
                    .map_err(|err| GatewayError::Upstream(err.to_string()))?,
            ),
            None => None,
        };

        Ok(json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.persona.system_prompt() },
                { "role": "user", "content": build_message_content(&text, image_url.as_deref()) },
            ],
        }))
    }

    async fn call_chat_api(&self, payload: &Value) -> Result<Value, GatewayError> {
        debug!("Chat request: {}", summarize_payload(payload));

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    "Chat request failed to send: {} (timeout={}, connect={})",
                    err,
                    err.is_timeout(),
                    err.is_connect()
                );
                if err.is_timeout() {
                    GatewayError::Upstream("the chat model did not respond in time".to_string())
                } else {
                    GatewayError::Upstream(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Chat API error: status={}, body={}", status, body_summary);
            let detail = message.unwrap_or(body_summary);
            return Err(GatewayError::Upstream(format!(
                "chat request failed with status {}: {}",
                status, detail
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| GatewayError::Upstream(format!("unreadable chat response: {err}")))
    }

    pub async fn critique(&self, prompt: &Prompt) -> Result<String, GatewayError> {
        let payload = self.build_payload(prompt).await?;
        let operation = format!("chat:{}", prompt.persona.as_str());
        let metadata = json!({ "has_image": prompt.image.is_some() });

        log_llm_timing("openai", &self.model, &operation, Some(metadata), || async {
            let response = self.call_chat_api(&payload).await?;
            extract_content(&response).ok_or_else(|| {
                warn!(
                    "Chat response had no content: {}",
                    truncate_for_log(&response.to_string(), 2000)
                );
                GatewayError::Upstream("the chat model returned an empty answer".to_string())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::image::ImageRef;
    use crate::feedback::prompts::{build_followup_prompt, build_initial_feedback_prompt};

    #[test]
    fn text_only_content_is_a_plain_string() {
        assert_eq!(build_message_content("hi", None), json!("hi"));
    }

    #[test]
    fn image_content_uses_parts() {
        let content = build_message_content("look", Some("https://example.com/a.jpg"));
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "https://example.com/a.jpg");
    }

    #[test]
    fn extracts_content_verbatim() {
        let response = json!({ "choices": [{ "message": { "content": "  Nice framing.\n\n- Raise the key light.\n" } }] });
        assert_eq!(
            extract_content(&response).as_deref(),
            Some("  Nice framing.\n\n- Raise the key light.\n")
        );
        assert_eq!(extract_content(&json!({ "choices": [] })), None);
        let blank = json!({ "choices": [{ "message": { "content": " \n " } }] });
        assert_eq!(extract_content(&blank), None);
    }

    #[tokio::test]
    async fn payload_carries_persona_language_and_image() {
        let mut config = Config::for_tests();
        config.feedback_language = Some("Korean".to_string());
        let chat = OpenAiChatClient::from_config(&config, Client::new());
        let image = ImageRef::parse("https://example.com/a.jpg").unwrap();

        let payload = chat
            .build_payload(&build_initial_feedback_prompt(Some(&image), "softer light"))
            .await
            .unwrap();

        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["messages"][0]["role"], "system");
        let user_text = payload["messages"][1]["content"][0]["text"].as_str().unwrap();
        assert!(user_text.contains("softer light"));
        assert!(user_text.ends_with("Please reply in Korean."));
        assert!(summarize_payload(&payload).contains("image_parts=1"));

        let followup = chat
            .build_payload(&build_followup_prompt("Raise the key light.", "how high?"))
            .await
            .unwrap();
        assert!(followup["messages"][1]["content"].is_string());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_upstream_error() {
        let config = Config::for_tests();
        let chat = OpenAiChatClient::from_config(&config, Client::new());
        let err = chat
            .critique(&build_followup_prompt("feedback", "question"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream(_)));
    }
}
