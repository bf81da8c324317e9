#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quillpost::{
    auth::{hash_password, issue_token},
    mail::{Email, MailError, Mailer},
    models::{NewUser, Role, User},
    rate_limit::RateLimitConfig,
    repo::{inmem::InMemRepo, UserRepo},
    AppConfig,
};

pub const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

pub fn test_config() -> AppConfig {
    AppConfig::new(SECRET)
        .with_bcrypt_cost(4)
        .with_rate_limit(RateLimitConfig::disabled())
}

/// Records every message; can be switched to fail delivery.
#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<Email>>,
    pub fail: AtomicBool,
}

impl MockMailer {
    pub fn failing() -> Self {
        Self { fail: AtomicBool::new(true), ..Self::default() }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Email> {
        self.sent.lock().unwrap().last().cloned()
    }

    /// Queued mail is delivered by a background task; give it a moment.
    pub async fn wait_for(&self, n: usize) {
        for _ in 0..100 {
            if self.count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Transport("smtp unreachable".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub async fn seed_user(repo: &InMemRepo, username: &str, role: Role) -> User {
    repo.create_user(NewUser {
        username: username.into(),
        email: format!("{username}@example.com"),
        password_hash: hash_password("password123", 4).unwrap(),
        role,
        email_verify_key: None,
    })
    .await
    .unwrap()
}

pub fn bearer(user: &User) -> (&'static str, String) {
    let token = issue_token(&test_config().jwt, user.id).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

/// Pulls the path segment following `marker/` out of a mail body.
pub fn token_after(body: &str, marker: &str) -> String {
    let start = body.find(marker).expect("marker in body") + marker.len() + 1;
    body[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect()
}

pub async fn json_body<B: actix_web::body::MessageBody>(
    resp: actix_web::dev::ServiceResponse<B>,
) -> serde_json::Value {
    let bytes = actix_web::test::read_body(resp).await;
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}
