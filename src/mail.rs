use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("mail queue closed")]
    QueueClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

// ---------------- SMTP (lettre) ----------------

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &MailConfig) -> anyhow::Result<Self> {
        let host = cfg.smtp_host.as_deref().context("SMTP_HOST must be set for SMTP delivery")?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid SMTP relay '{host}'"))?
            .port(cfg.smtp_port);
        if let (Some(user), Some(pass)) = (&cfg.smtp_username, &cfg.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = cfg.from.parse::<Mailbox>()
            .with_context(|| format!("MAIL_FROM '{}' is not a valid mailbox", cfg.from))?;
        info!("SMTP mailer configured for {host}:{}", cfg.smtp_port);
        Ok(Self { transport: builder.build(), from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let to = email.to.parse::<Mailbox>().map_err(|e| MailError::Address(e.to_string()))?;
        let content_type = if email.html { ContentType::TEXT_HTML } else { ContentType::TEXT_PLAIN };
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(content_type)
            .body(email.body.clone())
            .map_err(|e| MailError::Transport(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

// ---------------- Log only (no SMTP configured) ----------------

/// Writes outgoing mail to the log instead of delivering it.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!("[mail] to={} subject={:?}\n{}", email.to, email.subject, email.body);
        Ok(())
    }
}

pub fn build_mailer(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    if cfg.smtp_host.is_some() {
        Ok(Arc::new(SmtpMailer::new(cfg)?))
    } else {
        warn!("SMTP_HOST not set; outgoing mail will only be logged");
        Ok(Arc::new(LogMailer))
    }
}

// ---------------- Background queue ----------------

/// Hands mail to a background worker so the request that produced it never
/// waits on delivery. The worker logs its own failures.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<Email>,
}

impl MailQueue {
    /// Spawns the delivery worker on the current tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Email>();
        let handle = tokio::spawn(async move {
            while let Some(email) = rx.recv().await {
                match mailer.send(&email).await {
                    Ok(()) => info!("delivered '{}' to {}", email.subject, email.to),
                    Err(e) => error!("failed to deliver '{}' to {}: {e}", email.subject, email.to),
                }
            }
            info!("mail queue drained; worker exiting");
        });
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, email: Email) -> Result<(), MailError> {
        self.tx.send(email).map_err(|_| MailError::QueueClosed)
    }
}

pub fn verification_email(to: &str, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Please verify your email address".into(),
        body: format!(
            "<p>Please click this <a href=\"{link}\">link</a> to verify your email address!</p>"
        ),
        html: true,
    }
}

pub fn password_reset_email(to: &str, link: &str, ttl_minutes: u64) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("Your password reset token (valid for {ttl_minutes} min)"),
        body: format!(
            "Forgot your password? Submit a PATCH request with your new password to: {link}\n\
             If you didn't forget your password, please ignore this email!"
        ),
        html: false,
    }
}
