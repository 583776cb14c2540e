use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBackend {
    None,
    Flux,
    Dalle,
}

impl ImageBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            ImageBackend::None => "none",
            ImageBackend::Flux => "flux",
            ImageBackend::Dalle => "dalle",
        }
    }
}

/// How the re-evaluation prompt asks the model to judge an updated photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReevaluationStyle {
    Score,
    Qualitative,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub chat_temperature: f32,
    pub feedback_language: Option<String>,
    pub reevaluation_style: ReevaluationStyle,
    pub image_backend: ImageBackend,
    pub replicate_api_token: String,
    pub replicate_base_url: String,
    pub flux_model: String,
    pub image_aspect_ratio: String,
    pub flux_prompt_upsampling: bool,
    pub dalle_model: String,
    pub dalle_size: String,
    pub generated_image_path: PathBuf,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub bind_addr: String,
    pub inline_local_images: bool,
    pub request_timeout_seconds: u64,
    pub safety_extra_terms: Vec<String>,
    pub startup_warnings: Vec<String>,
}

/// Typed access to settings read through `lookup`, normally the process environment.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn bool(&self, name: &str, default: bool) -> bool {
        self.raw(name)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn f32(&self, name: &str, default: f32) -> f32 {
        self.raw(name)
            .and_then(|value| value.parse::<f32>().ok())
            .unwrap_or(default)
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.raw(name)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(default)
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.raw(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn parse_term_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect()
}

fn parse_image_backend(value: &str) -> Option<ImageBackend> {
    match value.trim().to_lowercase().as_str() {
        "" | "none" | "off" => Some(ImageBackend::None),
        "flux" | "replicate" => Some(ImageBackend::Flux),
        "dalle" | "dall-e" | "openai" => Some(ImageBackend::Dalle),
        _ => None,
    }
}

fn parse_reevaluation_style(value: &str) -> Option<ReevaluationStyle> {
    match value.trim().to_lowercase().as_str() {
        "" | "score" | "numeric" => Some(ReevaluationStyle::Score),
        "qualitative" | "degree" => Some(ReevaluationStyle::Qualitative),
        _ => None,
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from `lookup`.
    ///
    /// Unknown enum-like values fall back to their defaults and are recorded in
    /// `startup_warnings`, since logging is not installed yet when this runs.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut startup_warnings = Vec::new();

        let openai_api_key = env.string("OPENAI_API_KEY", "");
        if openai_api_key.trim().is_empty() {
            return Err(anyhow!(
                "OPENAI_API_KEY is not set. Add it to the environment or to a .env file."
            ));
        }

        let backend_value = env.string("IMAGE_BACKEND", "none");
        let image_backend = parse_image_backend(&backend_value).unwrap_or_else(|| {
            startup_warnings.push(format!(
                "Unknown IMAGE_BACKEND value '{backend_value}'; image generation disabled."
            ));
            ImageBackend::None
        });
        let replicate_api_token = env.string("REPLICATE_API_TOKEN", "");
        if image_backend == ImageBackend::Flux && replicate_api_token.trim().is_empty() {
            return Err(anyhow!(
                "IMAGE_BACKEND=flux requires REPLICATE_API_TOKEN to be set."
            ));
        }

        let style_value = env.string("REEVALUATION_STYLE", "score");
        let reevaluation_style = parse_reevaluation_style(&style_value).unwrap_or_else(|| {
            startup_warnings.push(format!(
                "Unknown REEVALUATION_STYLE value '{style_value}'; defaulting to score."
            ));
            ReevaluationStyle::Score
        });

        Ok(Config {
            log_level: env.string("LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(env.string("LOG_DIR", "logs")),
            openai_api_key: openai_api_key.trim().to_string(),
            openai_base_url: env.string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            chat_model: env.string("CHAT_MODEL", "gpt-4o"),
            chat_temperature: env.f32("CHAT_TEMPERATURE", 0.7),
            feedback_language: env.optional("FEEDBACK_LANGUAGE"),
            reevaluation_style,
            image_backend,
            replicate_api_token: replicate_api_token.trim().to_string(),
            replicate_base_url: env.string(
                "REPLICATE_BASE_URL",
                "https://api.replicate.com/v1",
            ),
            flux_model: env.string("FLUX_MODEL", "black-forest-labs/flux-1.1-pro"),
            image_aspect_ratio: env.string("IMAGE_ASPECT_RATIO", "3:4"),
            flux_prompt_upsampling: env.bool("FLUX_PROMPT_UPSAMPLING", true),
            dalle_model: env.string("DALLE_MODEL", "dall-e-3"),
            dalle_size: env.string("DALLE_SIZE", "1024x1024"),
            generated_image_path: PathBuf::from(env.string(
                "GENERATED_IMAGE_PATH",
                "output.jpg",
            )),
            upload_dir: PathBuf::from(env.string("UPLOAD_DIR", "uploads")),
            public_base_url: env.string("PUBLIC_BASE_URL", "http://127.0.0.1:8000"),
            bind_addr: env.string("BIND_ADDR", "127.0.0.1:8000"),
            inline_local_images: env.bool("INLINE_LOCAL_IMAGES", true),
            request_timeout_seconds: env.u64("REQUEST_TIMEOUT_SECONDS", 90).max(1),
            safety_extra_terms: parse_term_list(&env.string("SAFETY_EXTRA_TERMS", "")),
            startup_warnings,
        })
    }

    /// Emits the warnings collected while loading; call once logging is installed.
    pub fn log_startup_warnings(&self) {
        for message in &self.startup_warnings {
            warn!("{}", message);
        }
    }

    /// The model name the configured image backend will be called with.
    pub fn image_model(&self) -> &str {
        match self.image_backend {
            ImageBackend::None => "",
            ImageBackend::Flux => &self.flux_model,
            ImageBackend::Dalle => &self.dalle_model,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            openai_api_key: "test-key".to_string(),
            openai_base_url: "http://127.0.0.1:9/v1".to_string(),
            chat_model: "gpt-4o".to_string(),
            chat_temperature: 0.7,
            feedback_language: None,
            reevaluation_style: ReevaluationStyle::Score,
            image_backend: ImageBackend::None,
            replicate_api_token: String::new(),
            replicate_base_url: "http://127.0.0.1:9/v1".to_string(),
            flux_model: "black-forest-labs/flux-1.1-pro".to_string(),
            image_aspect_ratio: "3:4".to_string(),
            flux_prompt_upsampling: true,
            dalle_model: "dall-e-3".to_string(),
            dalle_size: "1024x1024".to_string(),
            generated_image_path: PathBuf::from("output.jpg"),
            upload_dir: PathBuf::from("uploads"),
            public_base_url: "http://127.0.0.1:8000".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            inline_local_images: false,
            request_timeout_seconds: 5,
            safety_extra_terms: Vec::new(),
            startup_warnings: Vec::new(),
        }
    }
}
