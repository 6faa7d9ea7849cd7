//! Notification abstraction. Template rendering and channel selection
//! (WhatsApp, SMS, email) belong to the implementation.

use super::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Contact {
    /// At least one channel is reachable
    pub fn is_reachable(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
            || self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

/// Fire-and-forget from the engine's side: failures are logged and recorded, never retried indefinitely
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    async fn notify(&self, contact: &Contact, template: &str, data: &Value) -> Result<(), ServiceError>;
}
