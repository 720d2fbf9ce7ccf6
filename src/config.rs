use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared bearer token required on `/api` routes when set.
    pub api_token: Option<String>,
    /// Administrator seeded into an empty users table on startup.
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub temp_dir: String,
    pub max_upload_bytes: usize,
    pub job_activity_timeout_minutes: i64,
    pub stale_check_interval_secs: u64,
    pub datapipe_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AccessControlConfig {
    pub etac_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AnalysisConfig {
    pub scheduled_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub access_control: AccessControlConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub security: Option<SecurityConfig>,
}

const DEFAULTS: &str = include_str!("../config/default.toml");

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        match ::config::Config::builder()
            .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
        {
            Ok(app_cfg) => app_cfg,
            Err(e) => panic!("embedded default config is invalid: {}", e),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        // Mirror defaults from config/default.toml
        Self {
            temp_dir: "data/ingest".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            job_activity_timeout_minutes: 20,
            stale_check_interval_secs: 60,
            datapipe_interval_secs: 5,
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(DEFAULTS, ::config::FileFormat::Toml))
        // Optional local file: bhapi.toml (in CWD)
        .add_source(::config::File::with_name("bhapi").required(false));

    if let Ok(custom_path) = std::env::var("BHAPI_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("BHAPI").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    if cfg.database.url.trim().is_empty() {
        return Err(anyhow::anyhow!("database.url must not be empty"));
    }

    let ingest = &cfg.ingest;
    if ingest.temp_dir.trim().is_empty() {
        return Err(anyhow::anyhow!("ingest.temp_dir must not be empty"));
    }
    if ingest.max_upload_bytes == 0 {
        return Err(anyhow::anyhow!("ingest.max_upload_bytes must be > 0"));
    }
    if ingest.job_activity_timeout_minutes <= 0 {
        return Err(anyhow::anyhow!("ingest.job_activity_timeout_minutes must be > 0"));
    }
    if ingest.stale_check_interval_secs == 0 {
        return Err(anyhow::anyhow!("ingest.stale_check_interval_secs must be > 0"));
    }
    if ingest.datapipe_interval_secs == 0 {
        return Err(anyhow::anyhow!("ingest.datapipe_interval_secs must be > 0"));
    }

    if let Some(token) = &cfg.auth.api_token {
        if token.trim().is_empty() {
            tracing::warn!("auth.api_token is set but empty; bearer check disabled");
        }
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
