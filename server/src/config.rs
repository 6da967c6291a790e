//! Environment-variable configuration (spec §6). Loaded once at startup and
//! passed by value into the server façade; never mutated afterwards.

use std::env;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tunnel_protocol::AuthKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("REGISTRATION_API_KEY is required")]
    MissingRegistrationKey,
    #[error("REGISTRATION_API_KEY must be at least 32 bytes")]
    RegistrationKeyTooShort,
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub registration_api_key: AuthKey,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub trust_proxy: bool,
    pub public_base_url: Option<String>,
    pub ws_path: String,

    pub registration_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub client_timeout_check_interval: Duration,
    pub drain_deadline: Duration,
    pub shutdown_deadline: Duration,
    pub outbound_queue_capacity: usize,
    pub outbound_enqueue_deadline: Duration,
    pub max_frame_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_key =
            env::var("REGISTRATION_API_KEY").map_err(|_| ConfigError::MissingRegistrationKey)?;
        // The global registration secret must be at least as strong as any
        // per-tunnel auth key, and at least 32 bytes besides.
        if raw_key.len() < 32 {
            return Err(ConfigError::RegistrationKeyTooShort);
        }
        let registration_api_key =
            AuthKey::new(raw_key).map_err(|_| ConfigError::RegistrationKeyTooShort)?;

        let host = parse_env_or("HOST", "0.0.0.0", "HOST")?;
        let port = parse_env_or("PORT", 3001, "PORT")?;
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let trust_proxy = parse_env_or("TRUST_PROXY", false, "TRUST_PROXY")?;
        let public_base_url = env::var("PUBLIC_BASE_URL").ok();
        let ws_path = env::var("WS_PATH").unwrap_or_else(|_| "/ws".to_string());

        Ok(Self {
            registration_api_key,
            host,
            port,
            log_level,
            trust_proxy,
            public_base_url,
            ws_path,
            registration_timeout: Duration::from_millis(10_000),
            ping_interval: Duration::from_millis(5_000),
            pong_timeout: Duration::from_millis(10_000),
            client_timeout_check_interval: Duration::from_millis(5_000),
            drain_deadline: Duration::from_millis(2_000),
            shutdown_deadline: Duration::from_millis(10_000),
            outbound_queue_capacity: 256,
            outbound_enqueue_deadline: Duration::from_millis(250),
            max_frame_bytes: tunnel_protocol::DEFAULT_MAX_FRAME_BYTES,
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(
    name: &'static str,
    default: T,
    label: &'static str,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(label, raw)),
        Err(_) => Ok(default),
    }
}
