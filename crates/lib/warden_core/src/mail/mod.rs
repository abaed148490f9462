//! Outgoing mail.
//!
//! The domain only sees the [`Mailer`] trait. Production uses
//! [`zepto::ZeptoMailer`]; when no provider is configured the
//! [`LogMailer`] writes messages to the log instead.

pub mod templates;
pub mod zepto;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use zepto::{ZeptoConfig, ZeptoMailer};

/// Mail dispatch errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("{0}")]
    Delivery(String),

    #[error("{0}")]
    Config(String),
}

/// A rendered message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to_address: String,
    pub to_name: String,
    pub subject: String,
    pub html_body: String,
}

/// Mail dispatch collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Development mailer: logs the message instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        info!(
            to = %mail.to_address,
            subject = %mail.subject,
            body = %mail.html_body,
            "mail not sent (no provider configured)"
        );
        Ok(())
    }
}

/// In-memory mailer that records every message; can be switched to fail.
#[derive(Debug, Default)]
pub struct MailRecorder {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
}

impl MailRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with [`MailError::Delivery`].
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Messages sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Most recent message addressed to `address`.
    pub fn last_to(&self, address: &str) -> Option<OutgoingMail> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.to_address == address)
    }
}

#[async_trait]
impl Mailer for MailRecorder {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("mail recorder set to fail".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(mail.clone());
        Ok(())
    }
}

/// Pull the `token=` query value out of a link in a rendered body.
pub fn extract_token(html_body: &str) -> Option<String> {
    let start = html_body.find("token=")? + "token=".len();
    let token: String = html_body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(to: &str) -> OutgoingMail {
        OutgoingMail {
            to_address: to.into(),
            to_name: "N".into(),
            subject: "S".into(),
            html_body: "<a href=\"http://x/verify?token=abc123\">go</a>".into(),
        }
    }

    #[tokio::test]
    async fn recorder_captures_and_fails_on_demand() {
        let recorder = MailRecorder::new();
        recorder.send(&mail("a@example.com")).await.unwrap();
        assert_eq!(recorder.sent().len(), 1);

        recorder.set_failing(true);
        assert!(matches!(
            recorder.send(&mail("b@example.com")).await,
            Err(MailError::Delivery(_))
        ));
        assert!(recorder.last_to("b@example.com").is_none());
        assert!(recorder.last_to("a@example.com").is_some());
    }

    #[test]
    fn extracts_token_from_link() {
        assert_eq!(
            extract_token(&mail("a@b.c").html_body).as_deref(),
            Some("abc123")
        );
        assert_eq!(extract_token("no link here"), None);
    }
}
