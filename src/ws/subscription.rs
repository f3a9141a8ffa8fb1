#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use crate::types::Frame;

/// A subscribe request that was successfully written to the transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    /// The exact frame that was sent
    pub frame: Frame,
    /// When the subscription was first sent
    pub created_at: Instant,
}

/// Ordered, append-only record of subscribe requests.
///
/// Entries are replayed front-to-back after every reconnect and are never removed,
/// so a replay that fails leaves them in place for the next attempt.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request after it has been written.
    pub fn push(&self, frame: Frame) {
        // We can recover from a poisoned lock because a Vec push leaves no partial state.
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SubscriptionEntry {
                frame,
                created_at: Instant::now(),
            });
    }

    /// Copy of all entries in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_registration_order() {
        let registry = SubscriptionRegistry::new();
        registry.push(Frame::from("A"));
        registry.push(Frame::from("B"));
        registry.push(Frame::from("C"));

        let frames: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|entry| entry.frame)
            .collect();
        assert_eq!(
            frames,
            [Frame::from("A"), Frame::from("B"), Frame::from("C")]
        );
    }

    #[test]
    fn duplicates_are_kept() {
        let registry = SubscriptionRegistry::new();
        registry.push(Frame::from("A"));
        registry.push(Frame::from("A"));

        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn snapshot_is_not_a_drain() {
        let registry = SubscriptionRegistry::new();
        registry.push(Frame::Binary(vec![1]));

        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }
}
