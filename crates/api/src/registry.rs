use dashmap::DashMap;
use std::sync::Arc;
use stream::CancelSignal;
use tracing::debug;
use uuid::Uuid;

/// Cancellation handles for streams that are still being produced.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<Uuid, CancelSignal>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (Uuid, CancelSignal) {
        let id = Uuid::new_v4();
        let cancel = CancelSignal::new();
        self.streams.insert(id, cancel.clone());
        debug!(stream_id = %id, active = self.streams.len(), "Stream registered");
        (id, cancel)
    }

    /// Returns false when no such stream is running.
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.streams.get(id) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    /// Used on shutdown so open connections can drain.
    pub fn cancel_all(&self) -> usize {
        for entry in self.streams.iter() {
            entry.value().cancel();
        }
        self.streams.len()
    }

    pub fn remove(&self, id: &Uuid) {
        self.streams.remove(id);
    }

    pub fn active(&self) -> usize {
        self.streams.len()
    }
}
