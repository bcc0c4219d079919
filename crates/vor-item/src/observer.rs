use std::sync::Mutex;

use vor_types::ItemId;

/// What happened to an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Set,
    Add,
    Remove,
}

/// One queued change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub item: ItemId,
    pub op: ChangeOp,
    pub name: String,
    /// The change was a collection mutation rather than a whole-value one.
    pub collection: bool,
}

/// Receiver of fire-and-forget change signals.
///
/// Called after both sides of a bidirectional reference are installed.
/// Delivery is not required for correctness.
pub trait ChangeObserver: Send + Sync {
    fn fire_changes(&self, item: ItemId, op: ChangeOp, name: &str);

    /// A collection attribute gained or lost a member.
    fn notify_change(&self, item: ItemId, op: ChangeOp, name: &str) {
        self.fire_changes(item, op, name);
    }
}

/// Observer that keeps every event, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("lock poisoned").clear();
    }

    fn push(&self, item: ItemId, op: ChangeOp, name: &str, collection: bool) {
        self.events.lock().expect("lock poisoned").push(ChangeEvent {
            item,
            op,
            name: name.to_string(),
            collection,
        });
    }
}

impl ChangeObserver for RecordingObserver {
    fn fire_changes(&self, item: ItemId, op: ChangeOp, name: &str) {
        self.push(item, op, name, false);
    }

    fn notify_change(&self, item: ItemId, op: ChangeOp, name: &str) {
        self.push(item, op, name, true);
    }
}
