use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::Config;
use crate::llm::gateway::{GatewayError, GeneratedImage};
use crate::utils::text::summarize_error_body;
use crate::utils::timing::log_llm_timing;

/// OpenAI image-generation client; returns a hosted URL for the picture.
pub struct DalleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

/// Whether an error body describes a content-policy refusal rather than a fault.
fn is_policy_rejection(status: StatusCode, body: &str) -> bool {
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let code = value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let message = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    code == "content_policy_violation"
        || message.contains("safety system")
        || message.contains("content policy")
}

impl DalleClient {
    pub fn from_config(config: &Config, client: Client) -> Self {
        DalleClient {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.dalle_model.clone(),
            size: config.dalle_size.clone(),
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GatewayError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": self.size,
        });

        log_llm_timing("openai", &self.model, "image_generation", None, || async {
            let response = self
                .client
                .post(format!("{}/images/generations", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|err| GatewayError::Upstream(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                warn!("Image API error: status={}, body={}", status, body_summary);
                let detail = message.unwrap_or(body_summary);
                if is_policy_rejection(status, &body) {
                    return Err(GatewayError::GenerationRejected(detail));
                }
                return Err(GatewayError::Upstream(format!(
                    "image request failed with status {}: {}",
                    status, detail
                )));
            }

            let parsed = response
                .json::<ImagesResponse>()
                .await
                .map_err(|err| GatewayError::Upstream(format!("unreadable image response: {err}")))?;
            parsed
                .data
                .into_iter()
                .find_map(|datum| datum.url)
                .map(GeneratedImage::Url)
                .ok_or_else(|| {
                    GatewayError::Upstream("the image model returned no image URL".to_string())
                })
        })
        .await
    }
}
