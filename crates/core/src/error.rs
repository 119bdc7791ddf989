use thiserror::Error;
use uuid::Uuid;

pub type AutomationResult<T> = Result<T, AutomationError>;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Campaign validation error: {0}")]
    Validation(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Journey not found: {0}")]
    JourneyNotFound(Uuid),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    #[error("Unknown flow node: {0}")]
    UnknownNode(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
