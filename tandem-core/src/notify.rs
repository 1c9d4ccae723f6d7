use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Fire-and-forget user notification port. Delivery mechanics (push, SMS,
/// email) live behind this interface; failures are logged, never propagated.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn send(&self, user_id: Uuid, event_type: &str, payload: Value);
}

/// Default emitter that only writes to the log stream.
pub struct LogNotifier;

#[async_trait]
impl NotificationEmitter for LogNotifier {
    async fn send(&self, user_id: Uuid, event_type: &str, payload: Value) {
        tracing::info!("Notification {} -> {}: {}", event_type, user_id, payload);
    }
}
