use anyhow::{Result, anyhow, bail};
use base64::Engine;
use serde::Serialize;

/// Inline media attached to a prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Media {
    pub mime_type: String,
    /// Base64 encoded payload
    pub data: String,
}

impl Media {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` uri
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| anyhow!("Not a data uri"))?;
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("Invalid data uri"))?;
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("Only base64 data uris are supported");
        };
        if mime_type.is_empty() {
            bail!("Missing mime type in data uri");
        }
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| anyhow!("Invalid base64 payload: {}", e))?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}

/// A single request to the prompt service with a declared output schema
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Flow name, used for logging
    pub name: &'static str,
    pub system: String,
    pub text: String,
    pub media: Vec<Media>,
    pub output_schema: serde_json::Value,
}
