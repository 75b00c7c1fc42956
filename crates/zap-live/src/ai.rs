use crate::settings::AiSettings;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use zap_live_ai::{GenerativeClient, Prompt, PromptModel};

/// Used when no model is configured, every prompt fails
pub struct DisabledModel;

#[async_trait]
impl PromptModel for DisabledModel {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        bail!("AI is not configured, cannot run {}", prompt.name)
    }
}

pub fn build_model(settings: Option<&AiSettings>) -> Arc<dyn PromptModel> {
    match settings {
        Some(ai) => {
            info!("Using generative model {} at {}", ai.model, ai.base_url);
            Arc::new(GenerativeClient::new(
                ai.api_key.clone(),
                ai.base_url.clone(),
                ai.model.clone(),
            ))
        }
        None => {
            warn!("No AI settings, face checks pass and moderation is unavailable");
            Arc::new(DisabledModel)
        }
    }
}
