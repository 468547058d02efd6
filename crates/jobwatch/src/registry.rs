//! In-memory keyed store of notifications.  Read access is public; every
//! mutation goes through [`crate::lifecycle::ToastController`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::notification::{Notification, NotificationId};

#[derive(Debug, Default)]
pub struct NotificationRegistry {
    entries: HashMap<NotificationId, Notification>,
    next_generation: u64,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.values()
    }

    /// All entries, oldest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        let mut all: Vec<Notification> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Returns the entry for `id`, creating it with `make` under a fresh
    /// generation when absent.  The flag is true when it was created.
    pub(crate) fn get_or_insert_with(
        &mut self,
        id: &str,
        make: impl FnOnce() -> Notification,
    ) -> (&Notification, bool) {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(existing) => (existing.into_mut(), false),
            Entry::Vacant(slot) => {
                self.next_generation += 1;
                let mut notification = make();
                notification.generation = self.next_generation;
                (slot.insert(notification), true)
            }
        }
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.entries.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Notification> {
        self.entries.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{DisplayInfo, NotificationKind, NotificationState};
    use tokio_util::sync::CancellationToken;

    fn entry(id: &str) -> Notification {
        Notification::new(
            id.to_string(),
            NotificationKind::Track,
            DisplayInfo::new(id, ""),
            NotificationState::Pending,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_generations_are_unique_across_reinsertion() {
        let mut registry = NotificationRegistry::new();
        let first = registry.get_or_insert_with("job-1", || entry("job-1")).0.generation;
        let (again, created) = registry.get_or_insert_with("job-1", || entry("job-1"));
        assert!(!created);
        assert_eq!(again.generation, first);

        registry.remove("job-1");
        let (fresh, created) = registry.get_or_insert_with("job-1", || entry("job-1"));
        assert!(created);
        assert_ne!(fresh.generation, first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_oldest_first() {
        let mut registry = NotificationRegistry::new();
        let older = entry("zeta");
        let mut newer = entry("alpha");
        newer.created_at = older.created_at + std::time::Duration::from_secs(1);
        registry.get_or_insert_with("alpha", || newer);
        registry.get_or_insert_with("zeta", || older);
        let ids: Vec<_> = registry.snapshot().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["zeta".to_string(), "alpha".to_string()]);
    }
}
