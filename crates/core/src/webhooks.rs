//! Outbound webhook seam for `call_webhook` post-actions. The engine only
//! needs fire-and-forget semantics; transports live behind the trait.

use crate::error::AutomationResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub trait WebhookCaller: Send + Sync {
    fn call(&self, url: &str, payload: &Value) -> AutomationResult<()>;
}

pub struct NoOpWebhookCaller;

impl WebhookCaller for NoOpWebhookCaller {
    fn call(&self, _url: &str, _payload: &Value) -> AutomationResult<()> {
        Ok(())
    }
}

/// Logs the call instead of performing it. Used in sandbox mode.
pub struct LoggingWebhookCaller;

impl WebhookCaller for LoggingWebhookCaller {
    fn call(&self, url: &str, payload: &Value) -> AutomationResult<()> {
        info!(url = %url, payload = %payload, "webhook call (sandbox)");
        Ok(())
    }
}

/// Records calls for assertions in tests.
#[derive(Default)]
pub struct CaptureWebhookCaller {
    calls: Mutex<Vec<(String, Value)>>,
}

impl CaptureWebhookCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl WebhookCaller for CaptureWebhookCaller {
    fn call(&self, url: &str, payload: &Value) -> AutomationResult<()> {
        self.calls.lock().push((url.to_string(), payload.clone()));
        Ok(())
    }
}

pub fn noop_webhook_caller() -> Arc<dyn WebhookCaller> {
    Arc::new(NoOpWebhookCaller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_caller_records() {
        let caller = CaptureWebhookCaller::new();
        caller
            .call("https://example.com/hook", &json!({"contact_id": "c-1"}))
            .unwrap();
        assert_eq!(caller.count(), 1);
        assert_eq!(caller.calls()[0].0, "https://example.com/hook");
    }
}
