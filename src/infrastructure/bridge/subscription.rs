//! Subscription handles and the slots that hold them

use crate::domain::models::StreamKind;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tokio::task::AbortHandle;

/// What a subscription is for. At most one subscription occupies a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Search,
    AutoConnect,
    StreamTypes,
    Stream(StreamKind),
    RecordingStatus,
    Recording,
    ListExercises,
    FetchExercise,
    RemoveExercise,
}

impl Slot {
    /// Slots whose subscription can be cancelled by a later command. Output
    /// from a cancelled subscription must not reach the host.
    pub fn is_disposable(&self) -> bool {
        matches!(
            self,
            Self::Search
                | Self::AutoConnect
                | Self::StreamTypes
                | Self::Stream(_)
                | Self::ListExercises
        )
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => f.write_str("search"),
            Self::AutoConnect => f.write_str("auto-connect"),
            Self::StreamTypes => f.write_str("stream type query"),
            Self::Stream(kind) => write!(f, "{} stream", kind),
            Self::RecordingStatus => f.write_str("recording status"),
            Self::Recording => f.write_str("recording start/stop"),
            Self::ListExercises => f.write_str("exercise listing"),
            Self::FetchExercise => f.write_str("exercise fetch"),
            Self::RemoveExercise => f.write_str("exercise removal"),
        }
    }
}

/// A running SDK operation, cancelled by [`Subscription::dispose`].
///
/// Dropping the handle without disposing leaves the operation running.
#[derive(Debug)]
pub struct Subscription {
    serial: u64,
    handle: AbortHandle,
}

impl Subscription {
    /// Spawn `operation` on the current tokio runtime
    pub fn spawn<F>(serial: u64, operation: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(operation).abort_handle();
        Self { serial, handle }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn dispose(self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionSlots {
    slots: HashMap<Slot, Subscription>,
}

impl SubscriptionSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        self.slots.contains_key(&slot)
    }

    /// True when `slot` holds a subscription whose operation already ended
    pub fn is_finished(&self, slot: Slot) -> bool {
        self.slots.get(&slot).map_or(false, Subscription::is_finished)
    }

    /// True while `serial` is the subscription occupying `slot`
    pub fn holds(&self, slot: Slot, serial: u64) -> bool {
        self.slots
            .get(&slot)
            .map_or(false, |s| s.serial() == serial)
    }

    /// Put `subscription` in `slot`, handing back whatever was there
    pub fn replace(&mut self, slot: Slot, subscription: Subscription) -> Option<Subscription> {
        self.slots.insert(slot, subscription)
    }

    /// Dispose the subscription in `slot`; false when the slot was empty
    pub fn dispose(&mut self, slot: Slot) -> bool {
        match self.slots.remove(&slot) {
            Some(subscription) => {
                subscription.dispose();
                true
            }
            None => false,
        }
    }

    /// Clear `slot` after its operation finished, unless it was replaced meanwhile
    pub fn release(&mut self, slot: Slot, serial: u64) -> bool {
        if self.holds(slot, serial) {
            self.slots.remove(&slot);
            true
        } else {
            false
        }
    }

    pub fn dispose_all(&mut self) -> usize {
        let count = self.slots.len();
        for (_, subscription) in self.slots.drain() {
            subscription.dispose();
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
