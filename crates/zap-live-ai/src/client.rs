use crate::prompt::Prompt;
use crate::types::*;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Generative model which answers a [Prompt] with JSON matching its output schema
#[async_trait]
pub trait PromptModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value>;
}

/// HTTP client for a `generateContent` style prompt API
pub struct GenerativeClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GenerativeClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http_client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn build_request(prompt: &Prompt) -> GenerateContentRequest {
        let mut parts = vec![Part {
            text: Some(prompt.text.clone()),
            inline_data: None,
        }];
        parts.extend(prompt.media.iter().map(|m| Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: m.mime_type.clone(),
                data: m.data.clone(),
            }),
        }));
        GenerateContentRequest {
            system_instruction: if prompt.system.is_empty() {
                None
            } else {
                Some(Content {
                    role: None,
                    parts: vec![Part {
                        text: Some(prompt.system.clone()),
                        inline_data: None,
                    }],
                })
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: prompt.output_schema.clone(),
                temperature: None,
            },
        }
    }
}

#[async_trait]
impl PromptModel for GenerativeClient {
    async fn generate(&self, prompt: &Prompt) -> Result<serde_json::Value> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!("Running prompt {} on {}", prompt.name, self.model);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&Self::build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Prompt API error {}: {}", status, error_text));
        }

        let rsp: GenerateContentResponse = response.json().await?;
        let Some(text) = rsp.text() else {
            return Err(match rsp.finish_reason() {
                Some(reason) if reason != "STOP" => {
                    anyhow!("Prompt {} stopped without output: {}", prompt.name, reason)
                }
                _ => anyhow!("Prompt {} returned no output", prompt.name),
            });
        };
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Prompt {} returned invalid JSON: {}", prompt.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Media;

    fn prompt() -> Prompt {
        Prompt {
            name: "test",
            system: "be brief".to_string(),
            text: "hello".to_string(),
            media: vec![Media::from_bytes("image/png", b"img")],
            output_schema: serde_json::json!({ "type": "object" }),
        }
    }

    #[test]
    fn test_build_request() {
        let req = serde_json::to_value(GenerativeClient::build_request(&prompt())).unwrap();
        assert_eq!(req["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(req["contents"][0]["role"], "user");
        assert_eq!(req["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            req["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(
            req["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_generate_parses_candidate_json() -> Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/test-model:generateContent")
            .match_header("x-goog-api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "candidates": [{
                        "content": { "role": "model", "parts": [{ "text": "{\"ok\":true}" }] },
                        "finishReason": "STOP"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GenerativeClient::new(
            "secret".to_string(),
            server.url(),
            "test-model".to_string(),
        );
        let out = client.generate(&prompt()).await?;
        assert_eq!(out, serde_json::json!({ "ok": true }));
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client =
            GenerativeClient::new("k".to_string(), server.url(), "test-model".to_string());
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_generate_blocked_reports_reason() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/test-model:generateContent")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "candidates": [{ "finishReason": "SAFETY" }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client =
            GenerativeClient::new("k".to_string(), server.url(), "test-model".to_string());
        let err = client.generate(&prompt()).await.unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }
}
