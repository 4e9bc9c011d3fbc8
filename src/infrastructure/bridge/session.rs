//! Per-device bridge state

use crate::domain::models::{ExerciseEntry, StreamKind};
use crate::infrastructure::bridge::subscription::SubscriptionSlots;
use std::collections::BTreeSet;

/// Everything the bridge tracks for one device: which streams the SDK declared
/// ready, the subscriptions running against it, and the exercise entries from
/// the last listing.
#[derive(Debug, Default)]
pub struct DeviceSession {
    ready: BTreeSet<StreamKind>,
    pub subscriptions: SubscriptionSlots,
    exercises: Vec<ExerciseEntry>,
    pub recording_supported: bool,
}

impl DeviceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, kind: StreamKind) -> bool {
        self.ready.contains(&kind)
    }

    pub fn mark_ready(&mut self, kind: StreamKind) {
        self.ready.insert(kind);
    }

    pub fn ready_streams(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.ready.iter().copied()
    }

    pub fn exercises(&self) -> &[ExerciseEntry] {
        &self.exercises
    }

    pub fn clear_exercises(&mut self) {
        self.exercises.clear();
    }

    pub fn push_exercise(&mut self, entry: ExerciseEntry) {
        self.exercises.push(entry);
    }

    /// The entry with `entry_id`, or the first known entry when no id is given
    pub fn find_exercise(&self, entry_id: Option<&str>) -> Option<&ExerciseEntry> {
        match entry_id {
            Some(id) => self.exercises.iter().find(|e| e.id == id),
            None => self.exercises.first(),
        }
    }

    pub fn forget_exercise(&mut self, entry_id: &str) -> Option<ExerciseEntry> {
        let index = self.exercises.iter().position(|e| e.id == entry_id)?;
        Some(self.exercises.remove(index))
    }

    /// Dispose every subscription; the session is about to be dropped
    pub fn close(&mut self) -> usize {
        self.subscriptions.dispose_all()
    }
}
