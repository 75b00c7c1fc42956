use crate::settings::HandoffSettings;
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

/// Time the app gets to take over before falling back to the download
pub const SCHEME_FALLBACK_DELAY: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Platform {
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_ascii_lowercase();
        if ua.contains("android") {
            Platform::Android
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
            Platform::Ios
        } else {
            Platform::Desktop
        }
    }

    pub fn is_mobile(&self) -> bool {
        !matches!(self, Platform::Desktop)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffLinks {
    pub scheme_url: String,
    pub download_url: String,
    pub landing_url: String,
}

impl HandoffLinks {
    pub fn new(settings: &HandoffSettings, public_url: &str, host_id: &str) -> Self {
        let scheme = settings.app_scheme.trim_end_matches("://");
        let landing = settings
            .landing_url
            .clone()
            .unwrap_or_else(|| public_url.trim_end_matches('/').to_string());
        Self {
            scheme_url: format!("{}://live/{}", scheme, host_id),
            download_url: settings.download_url.clone(),
            landing_url: format!("{}/?host={}", landing.trim_end_matches('/'), host_id),
        }
    }
}

/// What the handoff page does when it loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffAction {
    /// Navigate to the app scheme, then to [fallback_url] once unless the page was hidden
    OpenScheme {
        scheme_url: String,
        fallback_url: String,
        fallback_after: Duration,
    },
    /// Desktop never tries the scheme
    ShowLanding {
        landing_url: String,
        download_url: String,
    },
}

impl HandoffAction {
    pub fn plan(platform: Platform, links: &HandoffLinks) -> Self {
        if platform.is_mobile() {
            HandoffAction::OpenScheme {
                scheme_url: links.scheme_url.clone(),
                fallback_url: links.download_url.clone(),
                fallback_after: SCHEME_FALLBACK_DELAY,
            }
        } else {
            HandoffAction::ShowLanding {
                landing_url: links.landing_url.clone(),
                download_url: links.download_url.clone(),
            }
        }
    }
}

#[derive(Serialize, Default)]
struct HandoffTemplateData {
    host_id: String,
    host_name: String,
    mobile: bool,
    scheme_url: String,
    download_url: String,
    landing_url: String,
    fallback_delay_ms: u64,
}

/// Render the handoff page carrying out [action]
pub fn render_page(action: &HandoffAction, host_id: &str, host_name: &str) -> Result<String> {
    let template = mustache::compile_str(include_str!("handoff.html"))?;
    let data = match action {
        HandoffAction::OpenScheme {
            scheme_url,
            fallback_url,
            fallback_after,
        } => HandoffTemplateData {
            mobile: true,
            scheme_url: scheme_url.clone(),
            download_url: fallback_url.clone(),
            fallback_delay_ms: fallback_after.as_millis() as u64,
            ..Default::default()
        },
        HandoffAction::ShowLanding {
            landing_url,
            download_url,
        } => HandoffTemplateData {
            mobile: false,
            landing_url: landing_url.clone(),
            download_url: download_url.clone(),
            ..Default::default()
        },
    };
    Ok(template.render_to_string(&HandoffTemplateData {
        host_id: host_id.to_string(),
        host_name: host_name.to_string(),
        ..data
    })?)
}
