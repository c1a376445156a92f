//! Runtime configuration from environment variables

use crate::decoder::DecodeMode;
use crate::history::BotId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_BOT_NAME: &str = "Course Bot";
const DEFAULT_SCROLL_POLL_MS: u64 = 100;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 240;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub bot_id: BotId,
    pub bot_name: String,
    pub csrf_token: String,
    pub session_id: Option<String>,
    pub decode_mode: DecodeMode,
    pub scroll_poll_interval: Duration,
    pub request_timeout: Duration,
    pub log_path: PathBuf,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Empty values count as unset
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bot_id = var("CONCORDIA_BOT_ID").ok_or(ConfigError::Missing("CONCORDIA_BOT_ID"))?;
        let bot_id = bot_id
            .trim()
            .parse::<i64>()
            .map(BotId)
            .map_err(|e| ConfigError::Invalid {
                name: "CONCORDIA_BOT_ID",
                value: bot_id.clone(),
                reason: e.to_string(),
            })?;

        let csrf_token =
            var("CONCORDIA_CSRF_TOKEN").ok_or(ConfigError::Missing("CONCORDIA_CSRF_TOKEN"))?;

        let decode_mode = match var("CONCORDIA_DECODE_MODE") {
            Some(value) => value.parse::<DecodeMode>().map_err(|reason| ConfigError::Invalid {
                name: "CONCORDIA_DECODE_MODE",
                value: value.clone(),
                reason,
            })?,
            None => DecodeMode::default(),
        };

        let scroll_poll_ms = parse_u64(
            "CONCORDIA_SCROLL_POLL_MS",
            var("CONCORDIA_SCROLL_POLL_MS"),
            DEFAULT_SCROLL_POLL_MS,
        )?;
        let timeout_secs = parse_u64(
            "CONCORDIA_REQUEST_TIMEOUT_SECS",
            var("CONCORDIA_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let log_path = var("CONCORDIA_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.concordia-chat/chat.log"))
            });

        Ok(Self {
            base_url: var("CONCORDIA_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            bot_id,
            bot_name: var("CONCORDIA_BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            csrf_token,
            session_id: var("CONCORDIA_SESSION_ID"),
            decode_mode,
            scroll_poll_interval: Duration::from_millis(scroll_poll_ms.max(1)),
            request_timeout: Duration::from_secs(timeout_secs),
            log_path,
        })
    }
}

fn parse_u64(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        Some(value) => value.trim().parse().map_err(|e: std::num::ParseIntError| {
            ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: e.to_string(),
            }
        }),
        None => Ok(default),
    }
}
