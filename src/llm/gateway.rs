use async_trait::async_trait;
use reqwest::Client;

use crate::config::{Config, ImageBackend};
use crate::feedback::prompts::Prompt;
use crate::llm::dalle::DalleClient;
use crate::llm::openai::OpenAiChatClient;
use crate::llm::replicate::FluxClient;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The text model call failed or timed out.
    #[error("The feedback model request failed: {0}")]
    Upstream(String),
    /// The image backend refused the prompt, usually on content policy grounds.
    #[error("Image generation was blocked by the provider's content policy: {0}")]
    GenerationRejected(String),
    #[error("Image generation is not configured (set IMAGE_BACKEND to flux or dalle)")]
    GenerationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    Bytes { data: Vec<u8>, mime_type: String },
    Url(String),
}

/// The two remote capabilities the feedback workflow depends on.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Sends `prompt` to the chat model under its persona and returns the reply verbatim.
    async fn critique(&self, prompt: &Prompt) -> Result<String, GatewayError>;

    /// Sends an already sanitized prompt to the image backend.
    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, GatewayError>;

    fn image_generation_enabled(&self) -> bool;
}

pub enum ImageGenerator {
    Flux(FluxClient),
    Dalle(DalleClient),
}

/// Gateway backed by the hosted chat model and, optionally, a hosted image model.
///
/// Constructed once at startup and shared read-only; holds no mutable state.
pub struct HostedGateway {
    chat: OpenAiChatClient,
    images: Option<ImageGenerator>,
}

impl HostedGateway {
    pub fn from_config(config: &Config, client: Client) -> Self {
        let images = match config.image_backend {
            ImageBackend::None => None,
            ImageBackend::Flux => Some(ImageGenerator::Flux(FluxClient::from_config(
                config,
                client.clone(),
            ))),
            ImageBackend::Dalle => Some(ImageGenerator::Dalle(DalleClient::from_config(
                config,
                client.clone(),
            ))),
        };
        HostedGateway {
            chat: OpenAiChatClient::from_config(config, client),
            images,
        }
    }
}

#[async_trait]
impl ModelGateway for HostedGateway {
    async fn critique(&self, prompt: &Prompt) -> Result<String, GatewayError> {
        self.chat.critique(prompt).await
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, GatewayError> {
        match &self.images {
            Some(ImageGenerator::Flux(flux)) => flux.generate(prompt).await,
            Some(ImageGenerator::Dalle(dalle)) => dalle.generate(prompt).await,
            None => Err(GatewayError::GenerationUnavailable),
        }
    }

    fn image_generation_enabled(&self) -> bool {
        self.images.is_some()
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays queued replies and records every request it receives.
    #[derive(Default)]
    pub struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        images: Mutex<VecDeque<Result<GeneratedImage, GatewayError>>>,
        pub prompts: Mutex<Vec<Prompt>>,
        pub image_requests: Mutex<Vec<String>>,
        pub generation_enabled: bool,
    }

    impl ScriptedGateway {
        pub fn with_replies<I>(replies: I) -> Self
        where
            I: IntoIterator<Item = Result<String, GatewayError>>,
        {
            ScriptedGateway {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Default::default()
            }
        }

        pub fn with_images<I>(mut self, images: I) -> Self
        where
            I: IntoIterator<Item = Result<GeneratedImage, GatewayError>>,
        {
            self.images = Mutex::new(images.into_iter().collect());
            self.generation_enabled = true;
            self
        }

        pub fn recorded_prompts(&self) -> Vec<Prompt> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn critique(&self, prompt: &Prompt) -> Result<String, GatewayError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Upstream("no scripted reply".to_string())))
        }

        async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, GatewayError> {
            self.image_requests.lock().unwrap().push(prompt.to_string());
            if !self.generation_enabled {
                return Err(GatewayError::GenerationUnavailable);
            }
            self.images
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Upstream("no scripted image".to_string())))
        }

        fn image_generation_enabled(&self) -> bool {
            self.generation_enabled
        }
    }
}
