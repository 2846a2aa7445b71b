//! Reasoning-service client implementations for Campusd.
//!
//! All clients implement the `campusd_core::Reasoner` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatReasoner;

use campusd_config::AppConfig;
use campusd_core::error::ReasonerError;

/// Build the reasoner from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<OpenAiCompatReasoner, ReasonerError> {
    let api_key = config.reasoner.api_key.clone().ok_or_else(|| {
        ReasonerError::NotConfigured(
            "No API key — set reasoner.api_key or the CAMPUSD_API_KEY env var".into(),
        )
    })?;

    Ok(
        OpenAiCompatReasoner::new("openai", &config.reasoner.api_url, api_key)
            .with_model(&config.reasoner.model)
            .with_timeout(std::time::Duration::from_secs(config.reasoner.timeout_secs)),
    )
}
