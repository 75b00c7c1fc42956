use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;
use url::Url;

/// Requests whose url contains any of these are never served from cache
pub const BYPASS_PATTERNS: [&str; 5] = [
    "googlesyndication",
    "google-analytics",
    "googletagmanager",
    "firestore.googleapis.com",
    "/api/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Dynamic or third party request, always go to the network
    Bypass,
    /// Pre-cached route shell
    Shell,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCacheStatus {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub versions: Vec<String>,
}

/// Versioned cache of route shells.
///
/// A version installed while another one is active waits until [ShellCache::skip_waiting].
pub struct ShellCache {
    routes: Vec<String>,
    /// version -> path -> body
    caches: HashMap<String, HashMap<String, String>>,
    active: Option<String>,
    waiting: Option<String>,
}

fn request_path(url: &str) -> Option<String> {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse("http://localhost").ok()?.join(url).ok()?
        }
        Err(_) => return None,
    };
    Some(parsed.path().to_string())
}

impl ShellCache {
    pub fn new(routes: Vec<String>) -> Self {
        Self {
            routes,
            caches: HashMap::new(),
            active: None,
            waiting: None,
        }
    }

    /// Pre-cache every route shell under [version]
    pub fn install<F>(&mut self, version: &str, render: F) -> Result<()>
    where
        F: Fn(&str) -> Result<String>,
    {
        if version.is_empty() {
            bail!("Cache version is empty");
        }
        let mut shells = HashMap::new();
        for route in &self.routes {
            shells.insert(route.clone(), render(route)?);
        }
        self.caches.insert(version.to_string(), shells);
        info!("Installed shell cache {} ({} routes)", version, self.routes.len());

        if self.active.is_none() {
            self.waiting = Some(version.to_string());
            self.activate();
        } else if self.active.as_deref() != Some(version) {
            self.waiting = Some(version.to_string());
        }
        Ok(())
    }

    /// Promote the waiting version and purge every other version, returns the purged versions
    pub fn activate(&mut self) -> Vec<String> {
        let Some(version) = self.waiting.take() else {
            return Vec::new();
        };
        let purged: Vec<String> = self
            .caches
            .keys()
            .filter(|k| **k != version)
            .cloned()
            .collect();
        for k in &purged {
            self.caches.remove(k);
            info!("Purged shell cache {}", k);
        }
        info!("Activated shell cache {}", version);
        self.active = Some(version);
        purged
    }

    /// Activate a waiting version immediately
    pub fn skip_waiting(&mut self) -> Option<String> {
        self.waiting.as_ref()?;
        self.activate();
        self.active.clone()
    }

    pub fn classify(&self, method: &str, url: &str) -> CachePolicy {
        if !method.eq_ignore_ascii_case("GET") {
            return CachePolicy::Bypass;
        }
        if BYPASS_PATTERNS.iter().any(|p| url.contains(p)) {
            return CachePolicy::Bypass;
        }
        match request_path(url) {
            Some(p) if self.routes.contains(&p) => CachePolicy::Shell,
            _ => CachePolicy::Network,
        }
    }

    /// Cached shell for [url] from the active version
    pub fn lookup(&self, url: &str) -> Option<&str> {
        let path = request_path(url)?;
        self.caches
            .get(self.active.as_ref()?)?
            .get(&path)
            .map(|s| s.as_str())
    }

    pub fn status(&self) -> ShellCacheStatus {
        let mut versions: Vec<String> = self.caches.keys().cloned().collect();
        versions.sort();
        ShellCacheStatus {
            active: self.active.clone(),
            waiting: self.waiting.clone(),
            versions,
        }
    }
}

#[derive(Serialize)]
struct ShellTemplateData<'a> {
    route: &'a str,
    version: &'a str,
    public_url: &'a str,
}

/// Render the app shell served for [route]
pub fn render_shell(route: &str, version: &str, public_url: &str) -> Result<String> {
    let template = mustache::compile_str(include_str!("shell.html"))?;
    Ok(template.render_to_string(&ShellTemplateData {
        route,
        version,
        public_url: public_url.trim_end_matches('/'),
    })?)
}
