use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use pulse_api::session_from_token;
use pulse_gateway::{BackoffPolicy, GatewayConfig, HEARTBEAT_INTERVAL};
use pulse_types::Session;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub session: Session,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load `.env` if present, then read `PULSE_*` variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("PULSE_API_URL").unwrap_or_else(|| "http://localhost:3000".into());
        let gateway_url = match lookup("PULSE_GATEWAY_URL") {
            Some(url) => url,
            None => default_gateway_url(&api_url)?,
        };

        let token = lookup("PULSE_TOKEN").ok_or_else(|| anyhow!("PULSE_TOKEN is not set"))?;
        let user_id = lookup("PULSE_USER_ID");
        let session = session_from_token(&token, user_id.as_deref())?;

        let defaults = BackoffPolicy::default();
        let backoff = BackoffPolicy {
            base: parse_or(&lookup, "PULSE_RECONNECT_BASE_MS", defaults.base.as_millis() as u64).map(Duration::from_millis)?,
            max: parse_or(&lookup, "PULSE_RECONNECT_MAX_MS", defaults.max.as_millis() as u64).map(Duration::from_millis)?,
            max_attempts: match lookup("PULSE_MAX_RECONNECT_ATTEMPTS") {
                Some(raw) => Some(raw.parse().context("PULSE_MAX_RECONNECT_ATTEMPTS")?),
                None => defaults.max_attempts,
            },
        };
        let heartbeat_secs = parse_or(&lookup, "PULSE_HEARTBEAT_SECS", HEARTBEAT_INTERVAL.as_secs())?;

        Ok(Self {
            api_url,
            session,
            gateway: GatewayConfig {
                url: gateway_url,
                backoff,
                heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{} has an invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

/// `http://host/api` becomes `ws://host/api/gateway`.
fn default_gateway_url(api_url: &str) -> Result<String> {
    let base = api_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(anyhow!("PULSE_API_URL must start with http:// or https://, got {}", api_url));
    };
    Ok(format!("{}/gateway", ws))
}
