use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, ReevaluationStyle};
use crate::feedback::image::ImageRef;
use crate::feedback::prompts::{
    build_followup_prompt, build_generation_prompt, build_image_request,
    build_initial_feedback_prompt, build_pose_recommendation_prompt, build_reevaluation_prompt,
};
use crate::feedback::safety::SafetyFilter;
use crate::feedback::vocabulary::{parse_shot_types, ShotType};
use crate::llm::gateway::{GatewayError, GeneratedImage, ModelGateway};
use crate::llm::media::write_generated_image;

/// The evolving (image, preference, feedback) triple of one interactive run.
///
/// `latest_feedback` only ever changes by wholesale replacement with the reply of a
/// successful critique; a failed call leaves the session untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackSession {
    current_image: ImageRef,
    user_preference: String,
    latest_feedback: String,
    turn_count: u64,
}

impl FeedbackSession {
    pub fn current_image(&self) -> &ImageRef {
        &self.current_image
    }

    pub fn user_preference(&self) -> &str {
        &self.user_preference
    }

    pub fn latest_feedback(&self) -> &str {
        &self.latest_feedback
    }

    /// Number of feedback revisions so far, counting the initial critique.
    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IllustrationOutput {
    Saved(PathBuf),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct Illustration {
    pub scene_description: String,
    pub shot_types: Vec<ShotType>,
    pub request: String,
    pub output: IllustrationOutput,
}

#[derive(Debug, thiserror::Error)]
pub enum IllustrationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Failed to save the generated image: {0}")]
    Save(String),
}

/// Feedback workflow shared by the console loop and the HTTP facade.
pub struct FeedbackService {
    gateway: Arc<dyn ModelGateway>,
    reevaluation_style: ReevaluationStyle,
    image_aspect_ratio: String,
    generated_image_path: PathBuf,
    safety: SafetyFilter,
}

impl FeedbackService {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: &Config) -> Self {
        FeedbackService {
            gateway,
            reevaluation_style: config.reevaluation_style,
            image_aspect_ratio: config.image_aspect_ratio.clone(),
            generated_image_path: config.generated_image_path.clone(),
            safety: SafetyFilter::default().with_terms(config.safety_extra_terms.iter().cloned()),
        }
    }

    pub fn illustration_enabled(&self) -> bool {
        self.gateway.image_generation_enabled()
    }

    pub async fn initial_feedback(
        &self,
        image: &ImageRef,
        preference: &str,
    ) -> Result<String, GatewayError> {
        let prompt = build_initial_feedback_prompt(Some(image), preference);
        self.gateway.critique(&prompt).await
    }

    pub async fn start_session(
        &self,
        image: ImageRef,
        preference: String,
    ) -> Result<FeedbackSession, GatewayError> {
        let feedback = self.initial_feedback(&image, &preference).await?;
        info!("Feedback session started for {}", image);
        Ok(FeedbackSession {
            current_image: image,
            user_preference: preference,
            latest_feedback: feedback,
            turn_count: 1,
        })
    }

    /// Answers a question about the current feedback without revising it.
    pub async fn answer_followup(
        &self,
        session: &FeedbackSession,
        question: &str,
    ) -> Result<String, GatewayError> {
        let prompt = build_followup_prompt(&session.latest_feedback, question);
        self.gateway.critique(&prompt).await
    }

    pub async fn reevaluate(
        &self,
        image: &ImageRef,
        preference: &str,
        old_feedback: &str,
    ) -> Result<String, GatewayError> {
        let prompt =
            build_reevaluation_prompt(Some(image), preference, old_feedback, self.reevaluation_style);
        self.gateway.critique(&prompt).await
    }

    /// Judges `image` against the session's feedback and, on success, makes it the
    /// session's current photo and feedback.
    pub async fn submit_new_photo<'s>(
        &self,
        session: &'s mut FeedbackSession,
        image: ImageRef,
    ) -> Result<&'s str, GatewayError> {
        let feedback = self
            .reevaluate(&image, &session.user_preference, &session.latest_feedback)
            .await?;
        session.current_image = image;
        session.latest_feedback = feedback;
        session.turn_count += 1;
        Ok(&session.latest_feedback)
    }

    pub async fn recommend_shot_types(&self, feedback: &str) -> Result<Vec<ShotType>, GatewayError> {
        let prompt = build_pose_recommendation_prompt(feedback);
        let answer = self.gateway.critique(&prompt).await?;
        Ok(parse_shot_types(&answer).accepted)
    }

    /// Generates an example photo that applies the session's feedback.
    pub async fn illustrate(
        &self,
        session: &FeedbackSession,
    ) -> Result<Illustration, IllustrationError> {
        if !self.illustration_enabled() {
            return Err(GatewayError::GenerationUnavailable.into());
        }

        let description_prompt = build_generation_prompt(
            &session.latest_feedback,
            &session.user_preference,
            Some(&session.current_image),
        );
        let scene_description = self.gateway.critique(&description_prompt).await?;

        let shot_types = match self.recommend_shot_types(&session.latest_feedback).await {
            Ok(shots) => shots,
            Err(err) => {
                warn!("Shot type recommendation failed, continuing without it: {err}");
                Vec::new()
            }
        };

        let request = self.safety.sanitize(&build_image_request(
            &scene_description,
            &shot_types,
            &self.image_aspect_ratio,
        ));

        let output = match self.gateway.generate_image(&request).await? {
            GeneratedImage::Url(url) => IllustrationOutput::Url(url),
            GeneratedImage::Bytes { data, mime_type } => {
                info!(
                    "Saving generated {} image ({} bytes) to {}",
                    mime_type,
                    data.len(),
                    self.generated_image_path.display()
                );
                let path = write_generated_image(data, self.generated_image_path.clone())
                    .await
                    .map_err(|err| IllustrationError::Save(format!("{err:#}")))?;
                IllustrationOutput::Saved(path)
            }
        };

        Ok(Illustration {
            scene_description,
            shot_types,
            request,
            output,
        })
    }
}
