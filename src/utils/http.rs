use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::config::Config;

/// Builds the single HTTP client shared by every gateway for the life of the process.
pub fn build_http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .user_agent(concat!("photo-feedback-assistant/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}
