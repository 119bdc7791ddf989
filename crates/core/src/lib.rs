pub mod clock;
pub mod config;
pub mod contacts;
pub mod error;
pub mod event_bus;
pub mod history;
pub mod templates;
pub mod types;
pub mod webhooks;

pub use config::AppConfig;
pub use error::{AutomationError, AutomationResult};
pub use types::TriggerEvent;
