//! Outbound mail boundary. The engine hands fully rendered emails to a
//! `Mailer`; retries, suppression lists and pixel tracking belong to the
//! provider behind it.

use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Provider message id returned on accepted sends.
pub type DeliveryId = String;

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub account_id: String,
    pub campaign_id: Uuid,
    pub journey_id: Uuid,
    pub contact_id: String,
    pub step_id: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("recipient rejected: {0}")]
    Rejected(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> Result<DeliveryId, MailerError>;
}

/// Records every send for assertions. Accepts everything.
#[derive(Default)]
pub struct CaptureMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl CaptureMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().iter().map(|e| e.subject.clone()).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Mailer for CaptureMailer {
    fn send(&self, email: &OutboundEmail) -> Result<DeliveryId, MailerError> {
        let mut sent = self.sent.lock();
        sent.push(email.clone());
        Ok(format!("cap-{}", sent.len()))
    }
}

/// Always refuses. Exercises the journey-failure path.
pub struct FailingMailer {
    message: String,
}

impl FailingMailer {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Mailer for FailingMailer {
    fn send(&self, _email: &OutboundEmail) -> Result<DeliveryId, MailerError> {
        Err(MailerError::Unavailable(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_email() -> OutboundEmail {
        OutboundEmail {
            to_email: "ada@example.com".into(),
            to_name: Some("Ada Lovelace".into()),
            subject: "Welcome".into(),
            html_body: "<p>hi</p>".into(),
            account_id: "acct-1".into(),
            campaign_id: Uuid::new_v4(),
            journey_id: Uuid::new_v4(),
            contact_id: "c-1".into(),
            step_id: "welcome".into(),
        }
    }

    #[test]
    fn test_capture_mailer_records_sends() {
        let mailer = CaptureMailer::new();
        let id = mailer.send(&sample_email()).unwrap();
        assert_eq!(id, "cap-1");
        assert_eq!(mailer.count(), 1);
        assert_eq!(mailer.subjects(), vec!["Welcome".to_string()]);
        assert_eq!(mailer.sent()[0].step_id, "welcome");
    }

    #[test]
    fn test_failing_mailer_refuses() {
        let mailer = FailingMailer::new("smtp down");
        let err = mailer.send(&sample_email()).unwrap_err();
        assert!(err.to_string().contains("smtp down"));
    }
}
