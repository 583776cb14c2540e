use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::gateway::{GatewayError, GeneratedImage};
use crate::llm::media::{detect_mime_type, download_media};
use crate::utils::text::summarize_error_body;
use crate::utils::timing::log_llm_timing;

const PREDICTION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PREDICTION_MAX_POLLS: usize = 60;
const REJECTION_MARKERS: [&str; 4] = ["nsfw", "sensitive", "flagged", "content policy"];

/// Flux image generation through Replicate predictions; returns the image bytes.
pub struct FluxClient {
    client: Client,
    base_url: String,
    api_token: String,
    model: String,
    aspect_ratio: String,
    prompt_upsampling: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug)]
enum PredictionOutcome {
    Pending,
    Succeeded(String),
    Failed(GatewayError),
}

fn output_url(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_string)),
        _ => None,
    }
}

fn error_text(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "no error detail".to_string(),
        Some(other) => other.to_string(),
    }
}

fn classify(prediction: &Prediction) -> PredictionOutcome {
    match prediction.status.as_str() {
        "succeeded" => match output_url(prediction.output.as_ref()) {
            Some(url) => PredictionOutcome::Succeeded(url),
            None => PredictionOutcome::Failed(GatewayError::Upstream(format!(
                "prediction {} succeeded without an output URL",
                prediction.id
            ))),
        },
        "failed" => {
            let detail = error_text(prediction.error.as_ref());
            let lowered = detail.to_lowercase();
            if REJECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                PredictionOutcome::Failed(GatewayError::GenerationRejected(detail))
            } else {
                PredictionOutcome::Failed(GatewayError::Upstream(format!(
                    "prediction {} failed: {}",
                    prediction.id, detail
                )))
            }
        }
        "canceled" => PredictionOutcome::Failed(GatewayError::Upstream(format!(
            "prediction {} was canceled",
            prediction.id
        ))),
        _ => PredictionOutcome::Pending,
    }
}

impl FluxClient {
    pub fn from_config(config: &Config, client: Client) -> Self {
        FluxClient {
            client,
            base_url: config.replicate_base_url.trim_end_matches('/').to_string(),
            api_token: config.replicate_api_token.clone(),
            model: config.flux_model.clone(),
            aspect_ratio: config.image_aspect_ratio.clone(),
            prompt_upsampling: config.flux_prompt_upsampling,
        }
    }

    async fn read_prediction(&self, response: reqwest::Response) -> Result<Prediction, GatewayError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Replicate API error: status={}, body={}", status, body_summary);
            return Err(GatewayError::Upstream(format!(
                "prediction request failed with status {}: {}",
                status,
                message.unwrap_or(body_summary)
            )));
        }
        response
            .json::<Prediction>()
            .await
            .map_err(|err| GatewayError::Upstream(format!("unreadable prediction: {err}")))
    }

    async fn create_prediction(&self, prompt: &str) -> Result<Prediction, GatewayError> {
        let payload = json!({
            "input": {
                "prompt": prompt,
                "aspect_ratio": self.aspect_ratio,
                "prompt_upsampling": self.prompt_upsampling,
            }
        });
        let response = self
            .client
            .post(format!("{}/models/{}/predictions", self.base_url, self.model))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .await
            .map_err(|err| GatewayError::Upstream(err.to_string()))?;
        self.read_prediction(response).await
    }

    async fn poll_prediction(&self, url: &str) -> Result<Prediction, GatewayError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|err| GatewayError::Upstream(err.to_string()))?;
        self.read_prediction(response).await
    }

    async fn run_prediction(&self, prompt: &str) -> Result<String, GatewayError> {
        let mut prediction = self.create_prediction(prompt).await?;
        let mut polls = 0usize;
        loop {
            match classify(&prediction) {
                PredictionOutcome::Succeeded(url) => return Ok(url),
                PredictionOutcome::Failed(err) => return Err(err),
                PredictionOutcome::Pending => {}
            }
            if polls >= PREDICTION_MAX_POLLS {
                return Err(GatewayError::Upstream(format!(
                    "prediction {} did not finish after {} polls",
                    prediction.id, polls
                )));
            }
            let Some(get_url) = prediction.urls.as_ref().and_then(|urls| urls.get.clone()) else {
                return Err(GatewayError::Upstream(format!(
                    "prediction {} is {} but has no polling URL",
                    prediction.id, prediction.status
                )));
            };
            debug!(
                "Prediction {} is {}; polling again",
                prediction.id, prediction.status
            );
            tokio::time::sleep(PREDICTION_POLL_INTERVAL).await;
            polls += 1;
            prediction = self.poll_prediction(&get_url).await?;
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GatewayError> {
        log_llm_timing("replicate", &self.model, "image_generation", None, || async {
            let url = self.run_prediction(prompt).await?;
            let data = download_media(&self.client, &url)
                .await
                .map_err(|err| GatewayError::Upstream(err.to_string()))?;
            let mime_type = detect_mime_type(&data).unwrap_or_else(|| "image/jpeg".to_string());
            Ok(GeneratedImage::Bytes { data, mime_type })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(value: Value) -> Prediction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn succeeded_prediction_yields_output_url() {
        let p = prediction(json!({
            "id": "abc",
            "status": "succeeded",
            "output": "https://replicate.delivery/out.jpg"
        }));
        assert!(matches!(
            classify(&p),
            PredictionOutcome::Succeeded(url) if url == "https://replicate.delivery/out.jpg"
        ));

        let listed = prediction(json!({
            "id": "abc",
            "status": "succeeded",
            "output": ["https://replicate.delivery/first.webp"]
        }));
        assert!(matches!(
            classify(&listed),
            PredictionOutcome::Succeeded(url) if url == "https://replicate.delivery/first.webp"
        ));
    }

    #[test]
    fn nsfw_failures_are_rejections() {
        let p = prediction(json!({
            "id": "abc",
            "status": "failed",
            "error": "NSFW content detected. Try running it again, or try a different prompt."
        }));
        assert!(matches!(
            classify(&p),
            PredictionOutcome::Failed(GatewayError::GenerationRejected(_))
        ));
    }

    #[test]
    fn other_failures_are_upstream_errors() {
        let p = prediction(json!({ "id": "abc", "status": "failed", "error": "CUDA out of memory" }));
        assert!(matches!(
            classify(&p),
            PredictionOutcome::Failed(GatewayError::Upstream(_))
        ));
    }

    #[test]
    fn running_predictions_are_pending() {
        let p = prediction(json!({
            "id": "abc",
            "status": "processing",
            "urls": { "get": "https://api.replicate.com/v1/predictions/abc" }
        }));
        assert!(matches!(classify(&p), PredictionOutcome::Pending));
    }
}
