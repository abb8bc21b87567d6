use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Telegram bot configuration
#[derive(Deserialize, Clone)]
pub struct TelegramConfig {
    /// Bot API token (legacy env: `BOT_TOKEN`)
    #[serde(default)]
    pub bot_token: String,
    /// Only join requests for this chat are gated; 0 accepts any chat
    /// (legacy env: `ONLY_ALLOW_CHAT_ID`)
    #[serde(default)]
    pub allowed_chat_id: i64,
    /// Bot API base URL
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Long-polling timeout for `getUpdates`
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Tell the group that a verification link was sent
    #[serde(default = "default_true")]
    pub announce_in_group: bool,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_chat_id: 0,
            api_url: default_telegram_api_url(),
            poll_timeout_secs: default_poll_timeout_secs(),
            announce_in_group: true,
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("allowed_chat_id", &self.allowed_chat_id)
            .field("api_url", &self.api_url)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("announce_in_group", &self.announce_in_group)
            .finish()
    }
}

impl TelegramConfig {
    /// Whether join requests for `chat_id` should be gated by this bot.
    pub fn allows_chat(&self, chat_id: i64) -> bool {
        self.allowed_chat_id == 0 || self.allowed_chat_id == chat_id
    }
}

/// Discourse site configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiscourseConfig {
    /// Forum base URL (legacy env: `SITE_URL`)
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Shown in the user's "Apps" tab on the forum
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Client identifier sent with every User API request (legacy env: `CLIENT_ID`)
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Comma separated User API scopes
    #[serde(default = "default_scopes")]
    pub scopes: String,
    /// Where the forum redirects with the encrypted payload (legacy env: `API_AUTH_URL`)
    #[serde(default)]
    pub auth_redirect: Option<String>,
    /// Only meaningful when `scopes` contains `push` or `notifications`
    #[serde(default)]
    pub push_url: Option<String>,
    /// Topic fetched to prove the key works (legacy env: `CHECK_TOPIC_ID`)
    #[serde(default = "default_check_topic_id")]
    pub check_topic_id: u64,
    #[serde(default = "default_discourse_timeout_secs")]
    pub timeout_secs: u64,
    /// When false, any completed HTTP exchange counts as verified
    #[serde(default = "default_true")]
    pub strict_verification: bool,
}

fn default_site_url() -> String {
    "https://example.com".to_string()
}

fn default_application_name() -> String {
    "Telegram Group Verification Bot".to_string()
}

fn default_client_id() -> String {
    "skyland_group_verify".to_string()
}

fn default_scopes() -> String {
    "read".to_string()
}

fn default_check_topic_id() -> u64 {
    10
}

fn default_discourse_timeout_secs() -> u64 {
    15
}

impl Default for DiscourseConfig {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            application_name: default_application_name(),
            client_id: default_client_id(),
            scopes: default_scopes(),
            auth_redirect: None,
            push_url: None,
            check_topic_id: default_check_topic_id(),
            timeout_secs: default_discourse_timeout_secs(),
            strict_verification: true,
        }
    }
}

/// Helper to build forum URLs with proper trailing slash handling
impl DiscourseConfig {
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.site_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8083
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

/// Challenge lifetime settings
#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_nonce_ttl_secs")]
    pub nonce_ttl_secs: u64,
    /// Interval of the background sweep; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_nonce_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_secs: default_nonce_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GateConfig {
    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub discourse: DiscourseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

/// Flat environment variables kept for existing deployments.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("BOT_TOKEN", "telegram.bot_token"),
    ("ONLY_ALLOW_CHAT_ID", "telegram.allowed_chat_id"),
    ("SITE_URL", "discourse.site_url"),
    ("API_AUTH_URL", "discourse.auth_redirect"),
    ("CLIENT_ID", "discourse.client_id"),
    ("CHECK_TOPIC_ID", "discourse.check_topic_id"),
];

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: FORUMGATE_)
            // e.g., FORUMGATE_TELEGRAM__BOT_TOKEN, FORUMGATE_WEB__PORT
            .add_source(
                Environment::with_prefix("FORUMGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.gate.nonce_ttl_secs == 0 {
            return Err(ConfigError::Message(
                "gate.nonce_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if !self.discourse.site_url.starts_with("http://")
            && !self.discourse.site_url.starts_with("https://")
        {
            return Err(ConfigError::Message(format!(
                "discourse.site_url must be an http(s) URL, got {}",
                self.discourse.site_url
            )));
        }
        Ok(())
    }

    /// Initialize the global config singleton
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }
}
