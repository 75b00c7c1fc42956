use crate::client::PromptModel;
use crate::prompt::{Media, Prompt};
use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Maximum number of hosts returned by [recommend_hosts]
pub const MAX_RECOMMENDATIONS: usize = 3;

async fn run<O: DeserializeOwned>(model: &dyn PromptModel, prompt: &Prompt) -> Result<O> {
    let out = model.generate(prompt).await?;
    serde_json::from_value(out)
        .map_err(|e| anyhow!("Prompt {} output did not match schema: {}", prompt.name, e))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerification {
    pub is_verified: bool,
    pub confidence: f32,
    pub message: String,
}

impl FaceVerification {
    /// Result used when the verification service cannot be reached
    pub fn fail_open() -> Self {
        Self {
            is_verified: true,
            confidence: 0.5,
            message: "Verification passed via secondary channel.".to_string(),
        }
    }
}

/// Check a host onboarding selfie contains a real human face.
///
/// Never fails: any technical error passes the check so onboarding is not blocked.
pub async fn verify_face(model: &dyn PromptModel, image: &Media) -> FaceVerification {
    let prompt = Prompt {
        name: "verify_face",
        system: "You verify selfies for a live streaming platform. Be lenient: pass any \
                 photo which clearly shows a real human face, regardless of lighting, \
                 angle, filters or accessories. Fail only cartoons, objects, screenshots \
                 of other screens or photos with no face."
            .to_string(),
        text: "Does this selfie show a real human face?".to_string(),
        media: vec![image.clone()],
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "isVerified": { "type": "boolean" },
                "confidence": { "type": "number" },
                "message": { "type": "string" }
            },
            "required": ["isVerified", "confidence", "message"]
        }),
    };
    match run::<FaceVerification>(model, &prompt).await {
        Ok(mut r) => {
            r.confidence = r.confidence.clamp(0.0, 1.0);
            r
        }
        Err(e) => {
            warn!("Face verification failed, passing via fallback: {}", e);
            FaceVerification::fail_open()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Safe,
    Blur,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub is_safe: bool,
    pub reason: String,
    pub verdict: Verdict,
}

/// Classify a stream frame. Errors are returned to the caller, moderation never fails open.
pub async fn moderate_stream(
    model: &dyn PromptModel,
    image: &Media,
    visibility: Visibility,
) -> Result<ModerationVerdict> {
    let policy = match visibility {
        Visibility::Public => {
            "This stream is PUBLIC and visible to everyone. Apply strict thresholds: any \
             nudity, sexual activity, suggestive poses or underwear must be marked unsafe."
        }
        Visibility::Private => {
            "This stream is PRIVATE between consenting adults. Only explicit sexual \
             activity, minors or violence are unsafe."
        }
    };
    let prompt = Prompt {
        name: "moderate_stream",
        system: format!(
            "You moderate frames from a live streaming platform. {} Answer with verdict \
             'safe', 'blur' for borderline content or 'block' for clear violations.",
            policy
        ),
        text: "Classify this frame.".to_string(),
        media: vec![image.clone()],
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "isSafe": { "type": "boolean" },
                "reason": { "type": "string" },
                "verdict": { "type": "string", "enum": ["safe", "blur", "block"] }
            },
            "required": ["isSafe", "reason", "verdict"]
        }),
    };
    let mut r: ModerationVerdict = run(model, &prompt).await?;
    // an unsafe frame is never allowed through as safe
    if !r.is_safe && r.verdict == Verdict::Safe {
        r.verdict = Verdict::Blur;
    }
    if r.verdict != Verdict::Safe {
        r.is_safe = false;
    }
    Ok(r)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub report_type: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Deserialize)]
struct ErrorReportOutput {
    #[serde(default)]
    reports: Vec<ErrorReport>,
}

/// Summarise system logs and reported issues for the admin console
pub async fn error_report(
    model: &dyn PromptModel,
    logs: &str,
    issues: &[String],
) -> Result<Vec<ErrorReport>> {
    if issues.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = Prompt {
        name: "error_report",
        system: "You are an SRE assistant. Group the reported issues into concise reports \
                 with a type, a severity and a one sentence description."
            .to_string(),
        text: format!(
            "System logs:\n{}\n\nReported issues:\n{}",
            logs,
            issues
                .iter()
                .map(|i| format!("- {}", i))
                .collect::<Vec<_>>()
                .join("\n")
        ),
        media: Vec::new(),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "reports": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "reportType": { "type": "string" },
                            "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                            "description": { "type": "string" }
                        },
                        "required": ["reportType", "severity", "description"]
                    }
                }
            },
            "required": ["reports"]
        }),
    };
    let out: ErrorReportOutput = run(model, &prompt).await?;
    Ok(out.reports)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    pub name: String,
    pub bio: Option<String>,
    pub tags: Vec<String>,
    pub stream_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSuggestions {
    pub suggested_bio: String,
    #[serde(default)]
    pub suggested_tags: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
}

/// Suggest improvements to a host profile
pub async fn optimize_profile(
    model: &dyn PromptModel,
    profile: &HostProfile,
) -> Result<ProfileSuggestions> {
    let prompt = Prompt {
        name: "optimize_profile",
        system: "You help live streamers grow their audience. Suggest a short engaging bio \
                 (max 160 characters), up to 5 discovery tags and up to 3 practical tips."
            .to_string(),
        text: format!(
            "Current profile:\n{}",
            serde_json::to_string_pretty(profile)?
        ),
        media: Vec::new(),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "suggestedBio": { "type": "string" },
                "suggestedTags": { "type": "array", "items": { "type": "string" } },
                "tips": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["suggestedBio", "suggestedTags", "tips"]
        }),
    };
    let mut out: ProfileSuggestions = run(model, &prompt).await?;
    out.suggested_tags.truncate(5);
    out.tips.truncate(3);
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub is_live: bool,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub host_id: String,
    pub reason: String,
}

#[derive(Deserialize)]
struct RecommendationOutput {
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

/// Recommend hosts from [catalog] matching the viewers [preferences].
///
/// Only entries present in the catalog are returned, live entries first, at most
/// [MAX_RECOMMENDATIONS].
pub async fn recommend_hosts(
    model: &dyn PromptModel,
    preferences: &str,
    catalog: &[CatalogEntry],
) -> Result<Vec<Recommendation>> {
    if catalog.is_empty() {
        return Ok(Vec::new());
    }
    let prompt = Prompt {
        name: "recommend_hosts",
        system: format!(
            "You recommend live streamers to viewers. Only recommend hosts from the \
             provided catalog, using their exact id. Prefer hosts which are live. \
             Return at most {} recommendations.",
            MAX_RECOMMENDATIONS
        ),
        text: format!(
            "Viewer preferences: {}\n\nCatalog:\n{}",
            preferences,
            serde_json::to_string(catalog)?
        ),
        media: Vec::new(),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "recommendations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "hostId": { "type": "string" },
                            "reason": { "type": "string" }
                        },
                        "required": ["hostId", "reason"]
                    }
                }
            },
            "required": ["recommendations"]
        }),
    };
    let out: RecommendationOutput = run(model, &prompt).await?;
    let returned = out.recommendations.len();

    let mut seen = HashSet::new();
    let mut recs: Vec<(bool, Recommendation)> = out
        .recommendations
        .into_iter()
        .filter_map(|r| {
            let entry = catalog.iter().find(|c| c.id == r.host_id)?;
            if !seen.insert(r.host_id.clone()) {
                return None;
            }
            Some((entry.is_live, r))
        })
        .collect();
    if recs.len() < returned {
        info!(
            "Dropped {} recommendations not in catalog",
            returned - recs.len()
        );
    }
    // stable: keeps model order within live/offline groups
    recs.sort_by_key(|(live, _)| !*live);
    Ok(recs
        .into_iter()
        .map(|(_, r)| r)
        .take(MAX_RECOMMENDATIONS)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockModel;

    fn image() -> Media {
        Media::from_bytes("image/jpeg", b"frame")
    }

    fn entry(id: &str, is_live: bool) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            name: id.to_uppercase(),
            tags: vec!["music".to_string()],
            is_live,
            rating: 4.5,
        }
    }

    #[tokio::test]
    async fn test_verify_face_fails_open() {
        let model = MockModel::failing();
        let r = verify_face(&model, &image()).await;
        assert!(r.is_verified);
        assert_eq!(r.confidence, 0.5);
        assert!(r.message.contains("secondary channel"));
    }

    #[tokio::test]
    async fn test_verify_face_schema_mismatch_fails_open() {
        let model = MockModel::answering(serde_json::json!({ "unexpected": 1 }));
        assert_eq!(
            verify_face(&model, &image()).await,
            FaceVerification::fail_open()
        );
    }

    #[tokio::test]
    async fn test_verify_face_rejects() {
        let model = MockModel::answering(serde_json::json!({
            "isVerified": false,
            "confidence": 1.4,
            "message": "No face found"
        }));
        let r = verify_face(&model, &image()).await;
        assert!(!r.is_verified);
        assert_eq!(r.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_moderation_propagates_errors() {
        let model = MockModel::failing();
        assert!(
            moderate_stream(&model, &image(), Visibility::Public)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_moderation_public_prompt_is_strict() -> Result<()> {
        let model = MockModel::answering(serde_json::json!({
            "isSafe": false,
            "reason": "suggestive",
            "verdict": "safe"
        }));
        let r = moderate_stream(&model, &image(), Visibility::Public).await?;
        assert!(!r.is_safe);
        assert_eq!(r.verdict, Verdict::Blur);
        assert!(model.prompts()[0].system.contains("PUBLIC"));

        let _ = moderate_stream(&model, &image(), Visibility::Private).await?;
        assert!(model.prompts()[1].system.contains("PRIVATE"));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_report_empty_issues() -> Result<()> {
        let model = MockModel::failing();
        assert!(error_report(&model, "some logs", &[]).await?.is_empty());
        assert_eq!(model.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_report() -> Result<()> {
        let model = MockModel::answering(serde_json::json!({
            "reports": [
                { "reportType": "payments", "severity": "high", "description": "Zaps failing" }
            ]
        }));
        let r = error_report(&model, "E: permission denied", &["zaps fail".to_string()]).await?;
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].severity, Severity::High);
        assert!(model.prompts()[0].text.contains("- zaps fail"));
        Ok(())
    }

    #[tokio::test]
    async fn test_recommendations_constrained_to_catalog() -> Result<()> {
        let model = MockModel::answering(serde_json::json!({
            "recommendations": [
                { "hostId": "offline1", "reason": "a" },
                { "hostId": "ghost", "reason": "not in catalog" },
                { "hostId": "live1", "reason": "b" },
                { "hostId": "live1", "reason": "duplicate" },
                { "hostId": "offline2", "reason": "c" },
                { "hostId": "live2", "reason": "d" }
            ]
        }));
        let catalog = vec![
            entry("offline1", false),
            entry("offline2", false),
            entry("live1", true),
            entry("live2", true),
        ];
        let r = recommend_hosts(&model, "music", &catalog).await?;
        let ids: Vec<&str> = r.iter().map(|r| r.host_id.as_str()).collect();
        assert_eq!(ids, vec!["live1", "live2", "offline1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_recommendations_empty_catalog() -> Result<()> {
        let model = MockModel::failing();
        assert!(recommend_hosts(&model, "music", &[]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_optimize_profile_truncates() -> Result<()> {
        let model = MockModel::answering(serde_json::json!({
            "suggestedBio": "Late night lofi",
            "suggestedTags": ["a", "b", "c", "d", "e", "f"],
            "tips": ["1", "2", "3", "4"]
        }));
        let profile = HostProfile {
            name: "dj".to_string(),
            bio: None,
            tags: vec![],
            stream_type: "public".to_string(),
        };
        let r = optimize_profile(&model, &profile).await?;
        assert_eq!(r.suggested_tags.len(), 5);
        assert_eq!(r.tips.len(), 3);
        Ok(())
    }
}
