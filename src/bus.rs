/// In-process event bus: a `tokio::sync::broadcast` channel carrying the
/// `sync_complete` events the Ingestor publishes after each tick, which
/// the API Service's WebSocket broker fans out to subscribed connections.
use serde::Serialize;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct SyncCompleteEvent {
    pub symbol: String,
    pub new_records: usize,
    pub total: i64,
    pub last_price: Option<f64>,
    pub last_record_ts: Option<i64>,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncCompleteEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUS_CAPACITY);
        EventBus { tx }
    }

    pub fn publish(&self, event: SyncCompleteEvent) {
        // No receivers is a normal state (no WS clients yet); ignore the error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncCompleteEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
