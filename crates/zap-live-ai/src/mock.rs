use crate::{Prompt, PromptModel};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Mutex;

/// Model which always gives the same answer, or always fails, recording every prompt
pub struct MockModel {
    answer: Option<serde_json::Value>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockModel {
    pub fn answering(v: serde_json::Value) -> Self {
        Self {
            answer: Some(v),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl PromptModel for MockModel {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.clone());
        }
        self.answer
            .clone()
            .ok_or_else(|| anyhow!("{} unavailable", prompt.name))
    }
}
