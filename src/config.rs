use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kyozo", about = "Community management server")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub uploads: UploadLimits,
    pub providers: ProvidersConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public URL used when building links in emails and blob URLs
    pub site_url: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub bucket: String,
    /// Route every authenticated upload through the mock store
    pub use_mock: bool,
    pub mock_latency_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub community_cookie_name: String,
    pub session_hours: u64,
    pub magic_link_minutes: i64,
    pub reset_link_minutes: i64,
    pub bcrypt_cost: u32,
}

/// Per content-type upload ceilings, in megabytes.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UploadLimits {
    pub image_mb: u64,
    pub audio_mb: u64,
    pub video_mb: u64,
    pub other_mb: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub resend_api_key: Option<String>,
    pub resend_base_url: String,
    pub email_from: String,
    pub kyozo_api_key: Option<String>,
    pub whatsapp_api_key: Option<String>,
    pub whatsapp_base_url: String,
    pub eventbrite_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub godaddy_api_key: Option<String>,
    pub godaddy_api_secret: Option<String>,
    pub godaddy_base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            site_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            bucket: "kyozo".to_string(),
            use_mock: false,
            mock_latency_ms: 500,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "kyozo_session".to_string(),
            community_cookie_name: "kyozo_community_session".to_string(),
            session_hours: 720,
            magic_link_minutes: 15,
            reset_link_minutes: 60,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            image_mb: 10,
            audio_mb: 50,
            video_mb: 100,
            other_mb: 10,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            resend_base_url: "https://api.resend.com".to_string(),
            email_from: "Kyozo <noreply@kyozo.com>".to_string(),
            kyozo_api_key: None,
            whatsapp_api_key: None,
            whatsapp_base_url: "https://waba-v2.360dialog.io".to_string(),
            eventbrite_base_url: "https://www.eventbriteapi.com/v3".to_string(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            godaddy_api_key: None,
            godaddy_api_secret: None,
            godaddy_base_url: "https://api.godaddy.com".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 20,
            max_retries: 2,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("kyozo.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }

        Ok(config)
    }

    /// Environment variables win over the config file, CLI flags win over both.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("RESEND_API_KEY") {
            self.providers.resend_api_key = Some(v);
        }
        if let Some(v) = non_empty("KYOZO_API_KEY") {
            self.providers.kyozo_api_key = Some(v);
        }
        if let Some(v) = non_empty("WHATSAPP_API_KEY") {
            self.providers.whatsapp_api_key = Some(v);
        }
        if let Some(v) = non_empty("GEMINI_API_KEY") {
            self.providers.gemini_api_key = Some(v);
        }
        if let Some(v) = non_empty("GO_DADDY_API_KEY") {
            self.providers.godaddy_api_key = Some(v);
        }
        if let Some(v) = non_empty("GO_DADDY_API_SECRET") {
            self.providers.godaddy_api_secret = Some(v);
        }
        if let Some(v) = non_empty("NEXT_PUBLIC_SITE_URL") {
            self.server.site_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = non_empty("FIREBASE_STORAGE_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = non_empty("USE_MOCK_ADMIN") {
            self.storage.use_mock = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".kyozo")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("kyozo.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }
}
