//! In-process bus with consumer-group semantics.
//!
//! Messages are retained for the process lifetime; a production broker
//! binding would trim by retention policy. All state sits behind one
//! mutex — the lock is never held across an await.

use crate::bus::{BusError, Envelope, MessageBus};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
struct GroupState {
    /// Index into the channel log of the next undelivered message.
    cursor: usize,
    /// Delivered but not yet acked (CONTRACT.md §4.1).
    pending: BTreeSet<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    logs: HashMap<String, Vec<Envelope>>,
    groups: HashMap<(String, String), GroupState>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryBus {
    inner: Mutex<Inner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        InMemoryBus::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, BusError> {
        self.inner
            .lock()
            .map_err(|_| BusError::Transport("bus mutex poisoned".to_string()))
    }

    /// Messages a group has fetched but not acked. Test observability.
    pub fn pending_count(&self, channel: &str, group: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .groups
                    .get(&(channel.to_string(), group.to_string()))
                    .map(|g| g.pending.len())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<u64, BusError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        let envelope = Envelope {
            id,
            channel: channel.to_string(),
            payload,
            published_ts_ms: now_ms(),
        };
        inner.logs.entry(channel.to_string()).or_default().push(envelope);
        Ok(id)
    }

    async fn read_latest(&self, channel: &str) -> Result<Option<Envelope>, BusError> {
        let inner = self.lock()?;
        Ok(inner.logs.get(channel).and_then(|log| log.last().cloned()))
    }

    async fn fetch(
        &self,
        channel: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<Envelope>, BusError> {
        let mut inner = self.lock()?;
        let log = inner.logs.get(channel).cloned().unwrap_or_default();
        let state = inner
            .groups
            .entry((channel.to_string(), group.to_string()))
            .or_default();

        let mut batch = Vec::new();
        // Redeliver pending first, in original publish order.
        for id in state.pending.iter().take(max) {
            if let Some(envelope) = log.iter().find(|e| e.id == *id) {
                batch.push(envelope.clone());
            }
        }
        // Then new messages from the cursor.
        while batch.len() < max && state.cursor < log.len() {
            let envelope = log[state.cursor].clone();
            state.cursor += 1;
            state.pending.insert(envelope.id);
            batch.push(envelope);
        }
        Ok(batch)
    }

    async fn ack(&self, channel: &str, group: &str, id: u64) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        if let Some(state) = inner
            .groups
            .get_mut(&(channel.to_string(), group.to_string()))
        {
            state.pending.remove(&id);
        }
        Ok(())
    }
}
