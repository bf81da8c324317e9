use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::rate_limit::RateLimitConfig;

pub const MIN_SECRET_LEN: usize = 32;
/// Upper bounds keep `now + ttl` representable.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);
pub const MAX_RESET_TTL_MINUTES: u64 = 24 * 60;

/// Token signing settings.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in: Duration,
}

/// Outbound mail settings. `smtp_host = None` selects the logging mailer.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from: "Quillpost <no-reply@quillpost.local>".into(),
        }
    }
}

/// Process configuration. Built once in `main` and shared by reference.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: Option<String>,
    /// Origin used in emailed links. Falls back to the request host when unset.
    pub public_url: Option<String>,
    /// Snapshot directory of the in-memory store.
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub bcrypt_cost: u32,
    pub reset_token_ttl: Duration,
    pub mail: MailConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            frontend_url: None,
            public_url: None,
            data_dir: PathBuf::from("data"),
            database_url: None,
            jwt: JwtConfig {
                secret: jwt_secret.into(),
                expires_in: Duration::from_secs(90 * 24 * 60 * 60),
            },
            bcrypt_cost: bcrypt::DEFAULT_COST,
            reset_token_ttl: Duration::from_secs(10 * 60),
            mail: MailConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn with_token_expiry(mut self, expires_in: Duration) -> Self {
        self.jwt.expires_in = expires_in;
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn from_env() -> Result<Self> {
        let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.len() < MIN_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long");
        }
        let mut cfg = Self::new(secret);

        if let Ok(v) = env::var("JWT_EXPIRES_IN") {
            let ttl = parse_duration(&v)
                .with_context(|| format!("JWT_EXPIRES_IN has an invalid value '{v}'"))?;
            if ttl > MAX_TOKEN_TTL {
                bail!("JWT_EXPIRES_IN must not exceed 365d");
            }
            cfg.jwt.expires_in = ttl;
        }
        if let Ok(v) = env::var("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg.frontend_url = env::var("FRONTEND_URL").ok();
        cfg.public_url = env::var("PUBLIC_URL")
            .ok()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        if let Ok(v) = env::var("QUILL_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        cfg.database_url = env::var("DATABASE_URL").ok();
        if let Ok(v) = env::var("BCRYPT_COST") {
            cfg.bcrypt_cost = v.parse().context("BCRYPT_COST must be a number")?;
        }
        if let Ok(v) = env::var("RESET_TOKEN_TTL_MINUTES") {
            let minutes: u64 = v.parse().context("RESET_TOKEN_TTL_MINUTES must be a number")?;
            if minutes == 0 || minutes > MAX_RESET_TTL_MINUTES {
                bail!("RESET_TOKEN_TTL_MINUTES must be between 1 and {MAX_RESET_TTL_MINUTES}");
            }
            cfg.reset_token_ttl = Duration::from_secs(minutes * 60);
        }

        cfg.mail.smtp_host = env::var("SMTP_HOST").ok().filter(|h| !h.is_empty());
        if let Ok(v) = env::var("SMTP_PORT") {
            cfg.mail.smtp_port = v.parse().context("SMTP_PORT must be a valid port")?;
        }
        cfg.mail.smtp_username = env::var("SMTP_USERNAME").ok();
        cfg.mail.smtp_password = env::var("SMTP_PASSWORD").ok();
        if let Ok(v) = env::var("MAIL_FROM") {
            cfg.mail.from = v;
        }

        cfg.rate_limit = RateLimitConfig::from_env()?;
        Ok(cfg)
    }
}

/// Parses `90d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let n: u64 = digits.parse().with_context(|| format!("no number in '{raw}'"))?;
    let scale: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => bail!("unknown duration unit '{other}'"),
    };
    let secs = n
        .checked_mul(scale)
        .with_context(|| format!("duration '{raw}' is too large"))?;
    if secs == 0 {
        bail!("duration must be positive");
    }
    Ok(Duration::from_secs(secs))
}
