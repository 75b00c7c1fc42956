use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Binding address for the http server
    pub listen_http: String,

    /// Public facing URL of the http server, used in share links
    pub public_url: String,

    /// Document store, `memory` or a MySQL connection string (mysql://)
    pub database: String,

    /// Secret used to sign anonymous session tokens
    pub auth_secret: String,

    /// Session uids allowed to use the admin API
    #[serde(default)]
    pub admins: Vec<String>,

    /// Coins credited to a new anonymous user
    #[serde(default)]
    pub welcome_coins: f64,

    /// Generative model used by the AI flows, AI calls fail when not set
    pub ai: Option<AiSettings>,

    pub handoff: HandoffSettings,

    #[serde(default)]
    pub shell_cache: ShellCacheSettings,

    #[serde(default)]
    pub payouts: PayoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AiSettings {
    pub api_key: String,
    #[serde(default = "default_ai_url")]
    pub base_url: String,
    pub model: String,
}

fn default_ai_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HandoffSettings {
    /// Custom url scheme of the mobile app, eg. `zaplive://`
    pub app_scheme: String,
    /// Direct package download used when the app is not installed
    pub download_url: String,
    /// Page shown to desktop clients, defaults to the web app
    pub landing_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShellCacheSettings {
    /// Cache version, changing it purges all older shells on activation
    pub version: String,
    /// Route shells which are pre-cached on install
    pub routes: Vec<String>,
}

impl Default for ShellCacheSettings {
    fn default() -> Self {
        Self {
            version: "zap-live-v1".to_string(),
            routes: ["/", "/index.html", "/explore", "/wallet", "/profile", "/become-host"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PayoutSettings {
    /// Minimum earnings in diamonds before a payout can be requested
    pub min_diamonds: f64,
}

impl Default for PayoutSettings {
    fn default() -> Self {
        Self {
            min_diamonds: 1000.0,
        }
    }
}
