//! Relay configuration

use std::env;
use std::time::Duration;

use deskrelay_shared::{RoomId, UserId};

const DEFAULT_GREETING_LOCAL: &str = "Thanks for reaching out! Your request has been forwarded \
to our support team and someone will answer you right here.";
const DEFAULT_GREETING_FOREIGN: &str = "Thanks for reaching out! Your request has been forwarded \
to our support team. You are writing from another server, so replies may take a moment to arrive.";
const DEFAULT_FAREWELL: &str = "Your request has been closed. If you need anything else, \
just write to us again.";

/// Minimum length of the token the homeserver presents on pushed transactions
const MIN_HS_TOKEN_LEN: usize = 16;

/// Relay configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Transport
    pub homeserver_url: String,
    pub access_token: String,
    pub hs_token: String,
    pub user_id: UserId,
    pub operator_room: RoomId,
    pub bot_display_name: Option<String>,

    // Behaviour
    pub silent: bool,
    pub ignore_unthreaded: bool,
    pub leave_on_close: bool,
    pub greeting_local: String,
    pub greeting_foreign: String,
    pub farewell: String,

    // Jobs
    pub retention: Duration,
    pub sync_interval: Duration,
    pub sweep_interval: Duration,

    // Caches
    pub mapping_cache_size: usize,
    pub identity_cache_size: usize,

    // Feature flags
    pub tracker_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),

            // Transport
            homeserver_url: required("MATRIX_HOMESERVER_URL")?,
            access_token: required("MATRIX_ACCESS_TOKEN")?,
            hs_token: {
                let token = required("MATRIX_HS_TOKEN")?;
                if token.len() < MIN_HS_TOKEN_LEN {
                    return Err(ConfigError::WeakSecret(
                        "MATRIX_HS_TOKEN must be at least 16 characters",
                    ));
                }
                token
            },
            user_id: {
                let user = UserId::from(required("MATRIX_USER_ID")?);
                if !user.as_str().starts_with('@') || user.server_name().is_err() {
                    return Err(ConfigError::Invalid("MATRIX_USER_ID"));
                }
                user
            },
            operator_room: RoomId::from(required("OPERATOR_ROOM_ID")?),
            bot_display_name: env::var("BOT_DISPLAY_NAME").ok().filter(|n| !n.is_empty()),

            // Behaviour
            silent: flag("SILENT", false)?,
            ignore_unthreaded: flag("IGNORE_UNTHREADED", true)?,
            leave_on_close: flag("LEAVE_ON_CLOSE", true)?,
            greeting_local: env::var("GREETING_LOCAL")
                .unwrap_or_else(|_| DEFAULT_GREETING_LOCAL.to_string()),
            greeting_foreign: env::var("GREETING_FOREIGN")
                .unwrap_or_else(|_| DEFAULT_GREETING_FOREIGN.to_string()),
            farewell: env::var("FAREWELL").unwrap_or_else(|_| DEFAULT_FAREWELL.to_string()),

            // Jobs
            retention: Duration::from_secs(number("RETENTION_DAYS", 7)? * 24 * 60 * 60),
            sync_interval: Duration::from_secs(number("SYNC_INTERVAL_SECS", 300)?),
            sweep_interval: Duration::from_secs(number("SWEEP_INTERVAL_SECS", 3600)?),

            // Caches
            mapping_cache_size: number("MAPPING_CACHE_SIZE", 4096)? as usize,
            identity_cache_size: number("IDENTITY_CACHE_SIZE", 1024)? as usize,

            // Feature flags
            tracker_enabled: flag("TRACKER_ENABLED", false)?,
        })
    }

    /// Configuration with every optional value at its default
    pub fn with_defaults(
        homeserver_url: impl Into<String>,
        user_id: UserId,
        operator_room: RoomId,
    ) -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            homeserver_url: homeserver_url.into(),
            access_token: String::new(),
            hs_token: String::new(),
            user_id,
            operator_room,
            bot_display_name: None,
            silent: false,
            ignore_unthreaded: true,
            leave_on_close: true,
            greeting_local: DEFAULT_GREETING_LOCAL.to_string(),
            greeting_foreign: DEFAULT_GREETING_FOREIGN.to_string(),
            farewell: DEFAULT_FAREWELL.to_string(),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            sync_interval: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(3600),
            mapping_cache_size: 4096,
            identity_cache_size: 1024,
            tracker_enabled: false,
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn number(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
