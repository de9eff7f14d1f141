use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::store::StoreBackend;

pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

pub struct ProxyConfig {
    pub port: u16,
    pub auth_key: String,
    pub store_backend: StoreBackend,
    pub data_dir: PathBuf,
    pub store_timeout: Duration,
    pub write_attempts: u32,
    pub allow_origin: String,
}

impl ProxyConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("PROXY_PORT", "8787")?,
            auth_key: read_secret("AUTH_KEY_SECRET")?,
            store_backend: try_load("STORE_BACKEND", "fs")?,
            data_dir: try_load("COMMENTS_DIR", "./data")?,
            store_timeout: Duration::from_millis(try_load("STORE_TIMEOUT_MS", "5000")?),
            write_attempts: try_load::<u32>("WRITE_ATTEMPTS", "5")?.max(1),
            allow_origin: try_load("CORS_ALLOW_ORIGIN", "*")?,
        })
    }
}

pub struct SiteConfig {
    pub port: u16,
    pub proxy_url: String,
    pub auth_key: String,
    pub public_read_url: Option<String>,
    pub turnstile_secret: String,
    pub verify_url: String,
    pub request_timeout: Duration,
}

impl SiteConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            port: try_load("SITE_PORT", "3000")?,
            proxy_url: try_load("COMMENTS_PROXY_URL", "http://127.0.0.1:8787/comments.json")?,
            auth_key: read_secret("AUTH_KEY_SECRET")?,
            public_read_url: var("COMMENTS_PUBLIC_URL").ok(),
            turnstile_secret: read_secret("TURNSTILE_SECRET_KEY")?,
            verify_url: try_load("TURNSTILE_VERIFY_URL", TURNSTILE_VERIFY_URL)?,
            request_timeout: Duration::from_millis(try_load("REQUEST_TIMEOUT_MS", "5000")?),
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key)
        .map(|value| value.trim().to_string())
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    parse_or_default(key, var(key).ok(), default)
}

fn parse_or_default<T: FromStr>(key: &str, value: Option<String>, default: &str) -> Result<T>
where
    T::Err: Display,
{
    value
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow!("Environment misconfigured: invalid {key} value: {e}")
        })
}

/// Docker secret file first, then the environment variable of the same name.
fn read_secret(secret_name: &str) -> Result<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(secret) => Ok(secret.trim().to_string()),
        Err(e) => {
            warn!("Failed to read {secret_name} from file: {e}, falling back to environment");

            var(secret_name)
                .map_err(|_| anyhow!("secret {secret_name} is not set"))
                .context("Secrets misconfigured!")
        }
    }
}
