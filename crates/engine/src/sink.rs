//! Change broadcast sink
//!
//! A [`ChangeSink`] receives one [`ChangeEvent`] after every successful
//! write. It is an explicit constructor dependency of the entity facade
//! and the transaction coordinator; an entity built without one simply
//! never broadcasts. Publication is fire-and-forget: a sink cannot fail
//! or roll back the write that produced the event.

use unitable_core::Meta;

/// One successful write, as broadcast to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Entity name
    pub entity: String,
    /// Domain fields of the written item, as a JSON object
    pub value: serde_json::Value,
    /// Post-write metadata
    pub meta: Meta,
}

/// Receiver of post-write change events
pub trait ChangeSink: Send + Sync {
    /// Handle one event; must not block for long and cannot fail
    fn publish(&self, event: ChangeEvent);
}

/// Sink that records every event in order
///
/// Test support for broadcast-counting assertions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<ChangeEvent>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event published so far
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Number of events published so far
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True when nothing has been published
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl ChangeSink for CollectingSink {
    fn publish(&self, event: ChangeEvent) {
        self.events.lock().push(event);
    }
}
