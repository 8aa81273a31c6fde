use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use agora_db::Backend;

/// Secrets that ship in examples and must never sign real sessions.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const MAX_SESSION_DAYS: i64 = 3650;

pub struct Config {
    pub jwt_secret: String,
    pub db_backend: Backend,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("AGORA_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("AGORA_JWT_SECRET is unset or a placeholder; sessions can be forged");
        }

        let backend_name = lookup("AGORA_DB_BACKEND").unwrap_or_else(|| "sqlite".into());
        let db_backend: Backend = backend_name
            .parse()
            .with_context(|| format!("Invalid AGORA_DB_BACKEND '{}'", backend_name))?;

        let session_days = parse_or(&lookup, "AGORA_SESSION_DAYS", 30)?;
        if !(1..=MAX_SESSION_DAYS).contains(&session_days) {
            bail!(
                "Invalid AGORA_SESSION_DAYS value '{}': must be between 1 and {}",
                session_days,
                MAX_SESSION_DAYS
            );
        }

        Ok(Self {
            jwt_secret,
            db_backend,
            db_path: lookup("AGORA_DB_PATH").unwrap_or_else(|| "agora.db".into()).into(),
            host: lookup("AGORA_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "AGORA_PORT", 3000)?,
            static_dir: lookup("AGORA_STATIC_DIR").unwrap_or_else(|| "./static".into()).into(),
            max_upload_bytes: parse_or(&lookup, "AGORA_MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            session_days,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value '{}'", key, raw)),
        None => {
            info!("{} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
