use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_REPLY_LANGUAGE: &str = "Thai";
pub const DEFAULT_MAX_TOKENS: u32 = 300;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_SESSION_IDLE_SECONDS: u64 = 30 * 60;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 8;

#[derive(Clone)]
pub struct RelayConfig {
    pub line_access_token: String,
    pub line_channel_secret: String,
    pub openai_api_key: String,
    pub record_store_url: Url,
    pub admin_user_id: Option<String>,
    pub bind: String,
    pub openai_model: String,
    pub reply_language: String,
    pub max_tokens: u32,
    pub history_limit: usize,
    pub session_idle: Duration,
    pub upstream_timeout: Duration,
    pub scripts_path: Option<PathBuf>,
    pub database_url: Option<String>,
}

#[derive(Clone)]
pub struct LocalConfig {
    pub openai_api_key: Option<String>,
    pub record_store_url: Option<Url>,
    pub admin_user_id: Option<String>,
    pub bind: String,
    pub openai_model: String,
    pub reply_language: String,
    pub max_tokens: u32,
    pub history_limit: usize,
    pub session_idle: Duration,
    pub upstream_timeout: Duration,
    pub scripts_path: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl LocalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    // Every value is optional here; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| non_blank(&lookup, key);

        let record_store_url = optional("RELAY_RECORD_STORE_URL")
            .map(|raw| parse_http_url("RELAY_RECORD_STORE_URL", &raw))
            .transpose()?;
        let max_tokens = parse_number("RELAY_MAX_TOKENS", optional("RELAY_MAX_TOKENS"))?
            .unwrap_or(DEFAULT_MAX_TOKENS)
            .clamp(16, 4_096);
        let history_limit =
            parse_number::<usize>("RELAY_HISTORY_LIMIT", optional("RELAY_HISTORY_LIMIT"))?
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .min(100);
        let session_idle = Duration::from_secs(
            parse_number("RELAY_SESSION_IDLE_SECONDS", optional("RELAY_SESSION_IDLE_SECONDS"))?
                .unwrap_or(DEFAULT_SESSION_IDLE_SECONDS)
                .max(60),
        );
        let upstream_timeout = Duration::from_secs(
            parse_number(
                "RELAY_UPSTREAM_TIMEOUT_SECONDS",
                optional("RELAY_UPSTREAM_TIMEOUT_SECONDS"),
            )?
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECONDS)
            .clamp(1, 30),
        );

        Ok(Self {
            openai_api_key: optional("RELAY_OPENAI_API_KEY"),
            record_store_url,
            admin_user_id: optional("RELAY_ADMIN_USER_ID"),
            bind: optional("RELAY_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            openai_model: optional("RELAY_OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            reply_language: optional("RELAY_REPLY_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_REPLY_LANGUAGE.to_string()),
            max_tokens,
            history_limit,
            session_idle,
            upstream_timeout,
            scripts_path: optional("RELAY_SCRIPTS_PATH").map(PathBuf::from),
            database_url: optional("RELAY_DATABASE_URL"),
        })
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |key: &'static str| non_blank(&lookup, key).ok_or(ConfigError::Missing(key));

        let line_access_token = required("RELAY_LINE_ACCESS_TOKEN")?;
        let line_channel_secret = required("RELAY_LINE_CHANNEL_SECRET")?;
        let openai_api_key = required("RELAY_OPENAI_API_KEY")?;
        required("RELAY_RECORD_STORE_URL")?;

        let local = LocalConfig::from_lookup(&lookup)?;
        let record_store_url = local
            .record_store_url
            .ok_or(ConfigError::Missing("RELAY_RECORD_STORE_URL"))?;

        Ok(Self {
            line_access_token,
            line_channel_secret,
            openai_api_key,
            record_store_url,
            admin_user_id: local.admin_user_id,
            bind: local.bind,
            openai_model: local.openai_model,
            reply_language: local.reply_language,
            max_tokens: local.max_tokens,
            history_limit: local.history_limit,
            session_idle: local.session_idle,
            upstream_timeout: local.upstream_timeout,
            scripts_path: local.scripts_path,
            database_url: local.database_url,
        })
    }
}

fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("line_access_token", &"<redacted>")
            .field("line_channel_secret", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .field("record_store_url", &self.record_store_url.as_str())
            .field("admin_user_id", &self.admin_user_id)
            .field("bind", &self.bind)
            .field("openai_model", &self.openai_model)
            .field("reply_language", &self.reply_language)
            .field("max_tokens", &self.max_tokens)
            .field("history_limit", &self.history_limit)
            .field("session_idle", &self.session_idle)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("scripts_path", &self.scripts_path)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .finish()
    }
}

pub fn parse_http_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|err| ConfigError::Invalid {
                key,
                reason: err.to_string(),
            })
        })
        .transpose()
}
