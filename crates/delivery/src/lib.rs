//! Email delivery and scheduled-action execution.
//!
//! The executor drains due journeys each tick and performs their scheduled
//! actions; the mailer seam keeps providers swappable, with a SendGrid
//! adapter and a webhook ingestor translating provider callbacks back into
//! engine events.

pub mod executor;
pub mod mailer;
pub mod scheduler;
pub mod sendgrid;
pub mod webhooks;

pub use executor::{ActionExecutor, TickSummary};
pub use mailer::{CaptureMailer, DeliveryId, FailingMailer, Mailer, MailerError, OutboundEmail};
pub use scheduler::SchedulerLoop;
pub use sendgrid::SendGridMailer;
pub use webhooks::{EmailEventType, EmailWebhookEvent, WebhookIngestor};
