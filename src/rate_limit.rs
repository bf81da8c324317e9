use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    hits: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl SlidingWindowLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { hits: Arc::new(DashMap::new()), enabled }
    }

    /// Records a hit for `key`; false when `limit` hits already fall inside `window`.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut hits = self.hits.entry(key.to_string()).or_default();
        while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
            hits.pop_front();
        }
        if hits.len() >= limit {
            return false;
        }
        hits.push_back(now);
        true
    }
}

/// Per-action limits for the credential endpoints.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub signup_limit: usize,
    pub signup_window: Duration,
    pub login_limit: usize,
    pub login_window: Duration,
    pub reset_limit: usize,
    pub reset_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signup_limit: 5,
            signup_window: Duration::from_secs(3600),
            login_limit: 10,
            login_window: Duration::from_secs(60),
            reset_limit: 3,
            reset_window: Duration::from_secs(900),
        }
    }
}

impl RateLimitConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    /// Reads the `RL_*` variables; unset ones keep their defaults, malformed ones are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        fn parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
            match std::env::var(name) {
                Ok(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{name} has an invalid value '{v}'")),
                Err(_) => Ok(default),
            }
        }
        fn window(name: &str, default: Duration) -> anyhow::Result<Duration> {
            let secs = parsed(name, default.as_secs())?;
            if secs == 0 {
                anyhow::bail!("{name} must be a positive number of seconds");
            }
            Ok(Duration::from_secs(secs))
        }
        let d = Self::default();
        let enabled = match std::env::var("RL_ENABLED") {
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => anyhow::bail!("RL_ENABLED has an invalid value '{v}'"),
            },
            Err(_) => d.enabled,
        };
        Ok(Self {
            enabled,
            signup_limit: parsed("RL_SIGNUP_LIMIT", d.signup_limit)?,
            signup_window: window("RL_SIGNUP_WINDOW", d.signup_window)?,
            login_limit: parsed("RL_LOGIN_LIMIT", d.login_limit)?,
            login_window: window("RL_LOGIN_WINDOW", d.login_window)?,
            reset_limit: parsed("RL_RESET_LIMIT", d.reset_limit)?,
            reset_window: window("RL_RESET_WINDOW", d.reset_window)?,
        })
    }
}

/// Guard used by the user handlers, keyed by client address.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: SlidingWindowLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self { limiter: SlidingWindowLimiter::new(cfg.enabled), cfg }
    }
    pub fn allow_signup(&self, ip: &str) -> bool { self.limiter.check(&format!("signup:{ip}"), self.cfg.signup_limit, self.cfg.signup_window) }
    pub fn allow_login(&self, ip: &str) -> bool { self.limiter.check(&format!("login:{ip}"), self.cfg.login_limit, self.cfg.login_window) }
    pub fn allow_reset(&self, ip: &str) -> bool { self.limiter.check(&format!("reset:{ip}"), self.cfg.reset_limit, self.cfg.reset_window) }
}
