use crate::config::ReevaluationStyle;
use crate::feedback::image::ImageRef;
use crate::feedback::vocabulary::{vocabulary_list, ShotType, MAX_SHOT_TYPES};

/// Length the scene description handed to the image generator should stay within.
pub const GENERATION_PROMPT_CHAR_BUDGET: usize = 1000;

/// Hard cap applied to a returned scene description before it becomes a generator input.
const IMAGE_REQUEST_DESCRIPTION_LIMIT: usize = GENERATION_PROMPT_CHAR_BUDGET * 3 / 2;

pub const CRITIC_SYSTEM_PROMPT: &str = "You are an expert portrait photography critic. \
Explain your advice to the user in a warm, friendly tone.";

pub const SCENE_DESCRIBER_SYSTEM_PROMPT: &str = "You are someone who describes photographs. \
Describe the image so vividly and precisely that even someone who has not seen it can \
perfectly visualize it in their mind.";

/// Which system instruction a prompt is sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Critic,
    SceneDescriber,
}

impl Persona {
    pub const fn system_prompt(self) -> &'static str {
        match self {
            Persona::Critic => CRITIC_SYSTEM_PROMPT,
            Persona::SceneDescriber => SCENE_DESCRIBER_SYSTEM_PROMPT,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Persona::Critic => "critic",
            Persona::SceneDescriber => "scene_describer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub persona: Persona,
    pub text: String,
    pub image: Option<ImageRef>,
}

impl Prompt {
    fn critic(text: String, image: Option<&ImageRef>) -> Self {
        Prompt {
            persona: Persona::Critic,
            text,
            image: image.cloned(),
        }
    }
}

pub fn build_initial_feedback_prompt(image: Option<&ImageRef>, preference: &str) -> Prompt {
    let text = format!(
        "Analyze this portrait photo and give shooting feedback. The user asked for: '{preference}'.\n\
         First, briefly judge whether the photo as it stands already satisfies that request and whether it is well taken.\n\
         Then comment only on the aspects that need improvement among: composition, pose & facial expression, \
         camera angle, light source position, and zoom in / zoom out.\n\
         Leave out any aspect that does not need to change."
    );
    Prompt::critic(text, image)
}

pub fn build_followup_prompt(feedback: &str, question: &str) -> Prompt {
    let text = format!(
        "The user has a follow-up request: '{question}'\n\n\
         Previous feedback:\n{feedback}\n\n\
         Answer the user's question. Taking the previous feedback and the new request into account, \
         explain concretely what to change in the current photo, as specific actionable edits."
    );
    Prompt::critic(text, None)
}

pub fn build_reevaluation_prompt(
    image: Option<&ImageRef>,
    preference: &str,
    old_feedback: &str,
    style: ReevaluationStyle,
) -> Prompt {
    let judgement = match style {
        ReevaluationStyle::Score => {
            "If the new photo reflects the feedback well, leave a word of praise, \
             and tell the user how well it follows the feedback as a score out of 100."
        }
        ReevaluationStyle::Qualitative => {
            "Judge how much the new photo has improved on the earlier feedback \
             (not at all, partially, mostly, or fully) and say what improved."
        }
    };
    let text = format!(
        "The user uploaded a new photo.\n\
         The user originally asked for: '{preference}'.\n\
         Previous feedback:\n{old_feedback}\n\n\
         {judgement}\n\
         If anything still needs to be fixed, list the remaining gaps."
    );
    Prompt::critic(text, image)
}

/// Asks the scene-describer persona for a bounded description an image generator can draw from.
pub fn build_generation_prompt(
    feedback: &str,
    preference: &str,
    image: Option<&ImageRef>,
) -> Prompt {
    let text = format!(
        "1. Describe the size of the image and the size of the subject within it.\n\
         2. Provide a highly detailed description of the subject's clothing, including the top, bottom, and shoes, \
            specifying color, material, and fit.\n\
         3. Describe the weather and background in great detail.\n\
         4. Based on the feedback below, describe the best camera angle and composition for the subject, \
            choosing from: {shots}.\n\
         5. Specify the exact placement and proportion of the subject within the rule of thirds, giving precise \
            measurements (e.g. lower center of the frame, occupying 1/2 of the image).\n\
         6. To satisfy the request '{preference}', describe in detail the ideal facial expression and pose the subject should take.\n\n\
         Feedback:\n{feedback}\n\n\
         Write the whole scene in this order, within approximately {budget} characters, \
         so that anyone can accurately visualize it.",
        shots = vocabulary_list(),
        budget = GENERATION_PROMPT_CHAR_BUDGET,
    );
    Prompt {
        persona: Persona::SceneDescriber,
        text,
        image: image.cloned(),
    }
}

pub fn build_pose_recommendation_prompt(feedback: &str) -> Prompt {
    let text = format!(
        "Based on the following feedback, recommend suitable shot types:\n{feedback}\n\n\
         You must choose only from this list: {shots}\n\
         Recommend at most {max}. Reply with one entry per line, written exactly as in the list, \
         and nothing else.",
        shots = vocabulary_list(),
        max = MAX_SHOT_TYPES,
    );
    Prompt::critic(text, None)
}

/// Composes the text handed to the image generator. The caller sanitizes it.
pub fn build_image_request(description: &str, shot_types: &[ShotType], aspect_ratio: &str) -> String {
    let description = clamp_chars(description.trim(), IMAGE_REQUEST_DESCRIPTION_LIMIT);
    let mut request = description;
    if !shot_types.is_empty() {
        let labels = shot_types
            .iter()
            .map(|shot| shot.label())
            .collect::<Vec<_>>()
            .join(", ");
        request.push_str(&format!("\nRecommended framing: {labels}."));
    }
    let aspect_ratio = aspect_ratio.trim();
    if aspect_ratio.is_empty() {
        request.push_str("\nGenerate a photograph based on the description above.");
    } else {
        request.push_str(&format!(
            "\nGenerate a photograph with a {aspect_ratio} aspect ratio based on the description above."
        ));
    }
    request
}

fn clamp_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let clipped: String = text.chars().take(limit).collect();
    match clipped.rfind(char::is_whitespace) {
        Some(cut) if cut > limit / 2 => clipped[..cut].trim_end().to_string(),
        _ => clipped,
    }
}
