use std::env;
use std::time::Duration;

use anyhow::Context;

fn env_or(k: &str, default: &str) -> String {
    env::var(k).unwrap_or_else(|_| default.to_string())
}

fn env_required(k: &str) -> anyhow::Result<String> {
    env::var(k)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} must be set", k))
}

/// `LOG_FORMAT` and `LOG_LEVEL`, shared by the server and the bot
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: String,
    pub level: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::new(&env_or("LOG_FORMAT", "json"), &env_or("LOG_LEVEL", "INFO"))
    }

    fn new(format: &str, level: &str) -> Self {
        Self {
            format: format.trim().to_lowercase(),
            level: level.trim().to_string(),
        }
    }
}

fn check_enc_key(key: &str) -> anyhow::Result<()> {
    if key.len() != 32 {
        anyhow::bail!("ENC_KEY must be exactly 32 bytes, got {}", key.len());
    }
    Ok(())
}

/// Process configuration, read once from the environment at startup
/// and passed by reference to everything that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub version: String,
    pub host: String,
    pub port: u16,
    pub log: LogSettings,
    pub sc_client_id: String,
    pub sc_client_secret: String,
    // must match the redirect uri registered with the soundcloud app,
    // e.g. https://your-app.example.com/callback
    pub redirect_uri: String,
    pub sc_api_base: String,
    pub sc_connect_url: String,
    pub db_url: String,
    pub enc_key: String,
    pub static_dir: String,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let enc_key = env_required("ENC_KEY")?;
        check_enc_key(&enc_key)?;
        let upstream_timeout = env_or("UPSTREAM_TIMEOUT_SECONDS", "15")
            .parse::<u64>()
            .context("invalid UPSTREAM_TIMEOUT_SECONDS")?;
        Ok(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: env_or("HOST", "0.0.0.0"),
            port: env_or("PORT", "5000").parse().context("invalid PORT")?,
            log: LogSettings::from_env(),
            sc_client_id: env_required("SC_CLIENT_ID")?,
            sc_client_secret: env_required("SC_CLIENT_SECRET")?,
            redirect_uri: env_required("REDIRECT_URI")?,
            sc_api_base: env_or("SC_API_BASE", "https://api.soundcloud.com"),
            sc_connect_url: env_or("SC_CONNECT_URL", "https://soundcloud.com/connect"),
            db_url: env_or("DATABASE_URL", "sqlite://users.db"),
            enc_key,
            static_dir: env_or("STATIC_DIR", "static"),
            upstream_timeout: Duration::from_secs(upstream_timeout),
        })
    }

    pub fn log_initialized(&self, log: &slog::Logger) {
        slog::info!(
            log, "initialized config";
            "version" => &self.version,
            "host" => &self.host,
            "port" => self.port,
            "log_format" => &self.log.format,
            "log_level" => &self.log.level,
            "sc_api_base" => &self.sc_api_base,
            "db_url" => &self.db_url,
            "upstream_timeout_seconds" => self.upstream_timeout.as_secs(),
        );
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the telegram bot process. Kept separate from
/// `Config` since the bot never talks to soundcloud.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub webapp_url: String,
    pub telegram_api_base: String,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bot_token: env_required("BOT_TOKEN")?,
            webapp_url: env_required("WEBAPP_URL")?,
            telegram_api_base: env_or("TELEGRAM_API_BASE", "https://api.telegram.org"),
        })
    }
}

#[cfg(test)]
impl Config {
    /// A config pointing upstream at `api_base`, for route tests.
    pub fn for_tests(api_base: &str) -> Self {
        Self {
            version: "test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            log: LogSettings::new("pretty", "DEBUG"),
            sc_client_id: "client-id".to_string(),
            sc_client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:5000/callback".to_string(),
            sc_api_base: api_base.trim_end_matches('/').to_string(),
            sc_connect_url: "https://soundcloud.test/connect".to_string(),
            db_url: "sqlite::memory:".to_string(),
            enc_key: "01234567890123456789012345678901".to_string(),
            static_dir: "static".to_string(),
            upstream_timeout: Duration::from_secs(5),
        }
    }
}
