use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use tandem_domain::events::{BookingEvent, EventSink};

/// In-process event bus over a broadcast channel. The side-effect worker
/// subscribes; publication never fails the emitting transition — with no
/// live subscriber the event is dropped and logged.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BookingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event: BookingEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
        match self.tx.send(event) {
            Ok(receivers) => {
                info!("Published {} to {} subscriber(s)", payload, receivers);
            }
            Err(_) => {
                debug!("No subscribers for {}, dropped", payload);
            }
        }
    }
}
