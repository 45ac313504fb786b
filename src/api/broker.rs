/// WebSocket subscription broker.
///
/// Makes the outbound bound and drop policy explicit and per-connection:
/// a fixed-capacity queue per connection, oldest-drop on overflow, and a
/// per-symbol subscriber index so fan-out touches only the connections
/// that asked for a given symbol — O(subscribers), not O(all clients).
use crate::bus::SyncCompleteEvent;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tracing::warn;

pub type ConnId = u64;

struct ConnEntry {
    subscriptions: HashSet<String>,
    queue: Mutex<VecDeque<String>>,
    drops: AtomicU64,
    notify: Arc<Notify>,
}

struct BrokerState {
    connections: HashMap<ConnId, Arc<ConnEntry>>,
    by_symbol: HashMap<String, HashSet<ConnId>>,
}

pub struct Broker {
    queue_capacity: usize,
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub total_connections: usize,
    pub subscriptions: HashMap<String, usize>,
}

impl Broker {
    pub fn new(queue_capacity: usize) -> Self {
        Broker {
            queue_capacity,
            state: Mutex::new(BrokerState {
                connections: HashMap::new(),
                by_symbol: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection and returns its id plus the `Notify` the
    /// connection's drain task should await.
    pub fn register(&self) -> (ConnId, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        let entry = Arc::new(ConnEntry {
            subscriptions: HashSet::new(),
            queue: Mutex::new(VecDeque::new()),
            drops: AtomicU64::new(0),
            notify: Arc::clone(&notify),
        });
        // subscriptions live in `by_symbol`, not on the entry (kept
        // immutable-by-replace below); entry itself only buffers outbound
        // frames.
        let mut state = self.state.lock().unwrap();
        state.connections.insert(id, entry);
        (id, notify)
    }

    pub fn unregister(&self, id: ConnId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.connections.remove(&id) {
            for symbol in &entry.subscriptions {
                if let Some(subs) = state.by_symbol.get_mut(symbol) {
                    subs.remove(&id);
                    if subs.is_empty() {
                        state.by_symbol.remove(symbol);
                    }
                }
            }
        }
    }

    pub fn subscribe(&self, id: ConnId, symbols: &[String]) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.connections.get(&id).cloned() else {
            return;
        };
        let mut updated = entry.subscriptions.clone();
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            updated.insert(symbol.clone());
            state.by_symbol.entry(symbol).or_default().insert(id);
        }
        state.connections.insert(
            id,
            Arc::new(ConnEntry {
                subscriptions: updated,
                queue: Mutex::new(std::mem::take(&mut *entry.queue.lock().unwrap())),
                drops: AtomicU64::new(entry.drops.load(Ordering::Relaxed)),
                notify: Arc::clone(&entry.notify),
            }),
        );
    }

    pub fn unsubscribe(&self, id: ConnId, symbols: &[String]) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.connections.get(&id).cloned() else {
            return;
        };
        let mut updated = entry.subscriptions.clone();
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            updated.remove(&symbol);
            if let Some(subs) = state.by_symbol.get_mut(&symbol) {
                subs.remove(&id);
                if subs.is_empty() {
                    state.by_symbol.remove(&symbol);
                }
            }
        }
        state.connections.insert(
            id,
            Arc::new(ConnEntry {
                subscriptions: updated,
                queue: Mutex::new(std::mem::take(&mut *entry.queue.lock().unwrap())),
                drops: AtomicU64::new(entry.drops.load(Ordering::Relaxed)),
                notify: Arc::clone(&entry.notify),
            }),
        );
    }

    /// Pops the next buffered frame for `id`, if any.
    pub fn pop(&self, id: ConnId) -> Option<String> {
        let state = self.state.lock().unwrap();
        let entry = state.connections.get(&id)?;
        entry.queue.lock().unwrap().pop_front()
    }

    pub fn drop_count(&self, id: ConnId) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .connections
            .get(&id)
            .map(|e| e.drops.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock().unwrap();
        let subscriptions = state
            .by_symbol
            .iter()
            .map(|(symbol, conns)| (symbol.clone(), conns.len()))
            .collect();
        BrokerStats {
            total_connections: state.connections.len(),
            subscriptions,
        }
    }

    /// Enqueues `payload` for every connection subscribed to `symbol`.
    /// Oldest-drop on a full queue; never blocks. O(subscribers of
    /// `symbol`), not O(all connections).
    fn enqueue_for_symbol(&self, symbol: &str, payload: String) {
        let state = self.state.lock().unwrap();
        let Some(conn_ids) = state.by_symbol.get(symbol) else {
            return;
        };
        for id in conn_ids {
            let Some(entry) = state.connections.get(id) else {
                continue;
            };
            let mut queue = entry.queue.lock().unwrap();
            if queue.len() >= self.queue_capacity {
                queue.pop_front();
                entry.drops.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(payload.clone());
            entry.notify.notify_one();
        }
    }

    /// Spawns the single broadcaster task that reads `sync_complete`
    /// events off the bus and fans them out. One broker-owned task per
    /// process.
    pub fn spawn_bus_listener(self: &Arc<Self>, mut rx: broadcast::Receiver<SyncCompleteEvent>) {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => broker.broadcast_sync_complete(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "broker bus receiver lagged, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn broadcast_sync_complete(&self, event: &SyncCompleteEvent) {
        let frame = serde_json::json!({
            "type": "sync_complete",
            "symbol": event.symbol,
            "timestamp": Utc::now().timestamp_millis(),
            "statistics": {
                "new_records": event.new_records,
                "total_records": event.total,
                "last_price": event.last_price,
                "last_record": event.last_record_ts,
            }
        });
        if let Ok(payload) = serde_json::to_string(&frame) {
            self.enqueue_for_symbol(&event.symbol, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_is_o_subscribers_and_drops_oldest() {
        let broker = Broker::new(2);
        let (fast, _n1) = broker.register();
        let (slow, _n2) = broker.register();
        broker.subscribe(fast, &["BTCUSDT".into()]);
        broker.subscribe(slow, &["BTCUSDT".into()]);

        for i in 0..5 {
            broker.broadcast_sync_complete(&SyncCompleteEvent {
                symbol: "BTCUSDT".into(),
                new_records: i,
                total: 100,
                last_price: Some(1.0),
                last_record_ts: Some(0),
            });
        }
        // fast drains promptly: receives all 5 in order.
        let mut received = Vec::new();
        while let Some(msg) = broker.pop(fast) {
            received.push(msg);
        }
        assert_eq!(received.len(), 5);

        // slow never drains: queue capped at 2, with 3 drops recorded.
        let mut slow_count = 0;
        while broker.pop(slow).is_some() {
            slow_count += 1;
        }
        assert_eq!(slow_count, 2);
        assert_eq!(broker.drop_count(slow), 3);
    }

    #[test]
    fn unrelated_symbol_is_not_enqueued() {
        let broker = Broker::new(4);
        let (id, _n) = broker.register();
        broker.subscribe(id, &["ETHUSDT".into()]);
        broker.broadcast_sync_complete(&SyncCompleteEvent {
            symbol: "BTCUSDT".into(),
            new_records: 1,
            total: 1,
            last_price: None,
            last_record_ts: None,
        });
        assert!(broker.pop(id).is_none());
    }
}
