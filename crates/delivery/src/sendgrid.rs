//! SendGrid mail provider. Builds the v3 mail-send payload with the journey
//! coordinates as custom args so engagement webhooks can be routed back to
//! the journey that sent the email.

use crate::mailer::{DeliveryId, Mailer, MailerError, OutboundEmail};
use dripline_core::config::DeliveryConfig;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SendGridMailer {
    config: DeliveryConfig,
}

impl SendGridMailer {
    pub fn new(config: DeliveryConfig) -> Self {
        info!(
            from = %config.from_email,
            sandbox = config.sandbox,
            "SendGrid mailer initialized"
        );
        Self { config }
    }

    /// SendGrid v3 mail-send payload. The custom args come back verbatim on
    /// every engagement webhook for this message.
    pub fn build_payload(&self, email: &OutboundEmail) -> Value {
        serde_json::json!({
            "personalizations": [{
                "to": [{"email": email.to_email, "name": email.to_name}],
                "custom_args": {
                    "account_id": email.account_id,
                    "campaign_id": email.campaign_id.to_string(),
                    "journey_id": email.journey_id.to_string(),
                    "contact_id": email.contact_id,
                    "step_id": email.step_id
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": email.subject,
            "content": [{
                "type": "text/html",
                "value": email.html_body
            }],
            "tracking_settings": {
                "click_tracking": {"enable": true},
                "open_tracking": {"enable": true}
            },
            "mail_settings": {
                "sandbox_mode": {"enable": self.config.sandbox}
            }
        })
    }
}

impl Mailer for SendGridMailer {
    /// In production: POST to https://api.sendgrid.com/v3/mail/send
    fn send(&self, email: &OutboundEmail) -> Result<DeliveryId, MailerError> {
        if email.to_email.is_empty() {
            return Err(MailerError::Rejected("empty recipient address".into()));
        }

        let _payload = self.build_payload(email);
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            step_id = %email.step_id,
            sandbox = self.config.sandbox,
            "Sending email via SendGrid"
        );
        metrics::counter!("sendgrid.emails_sent").increment(1);

        Ok(format!("sg-{}", Uuid::new_v4()))
    }
}
