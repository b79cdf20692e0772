use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::rate_limit::ThrottleEntry;

/// Backing store for throttle entries.
///
/// `check` only goes through `update`, which must apply the closure
/// atomically for one key. A shared remote cache can sit behind this trait
/// as long as it honours that.
pub trait ThrottleStore: Send + Sync {
    fn get(&self, key: &str) -> Option<ThrottleEntry>;

    fn set(&self, key: &str, entry: ThrottleEntry);

    fn delete(&self, key: &str) -> Option<ThrottleEntry>;

    // Visits every entry, dropping the ones `keep` rejects
    fn retain(&self, keep: &mut dyn FnMut(&str, &ThrottleEntry) -> bool);

    // Read-modify-write of a single key, returns what was stored
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<ThrottleEntry>) -> ThrottleEntry,
    ) -> ThrottleEntry;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// In-process store, one shard lock held per update
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, ThrottleEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThrottleStore for MemoryStore {
    fn get(&self, key: &str) -> Option<ThrottleEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn set(&self, key: &str, entry: ThrottleEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    fn delete(&self, key: &str) -> Option<ThrottleEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &ThrottleEntry) -> bool) {
        self.entries.retain(|key, entry| keep(key, entry));
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<ThrottleEntry>) -> ThrottleEntry,
    ) -> ThrottleEntry {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = apply(Some(*occupied.get()));
                occupied.insert(next);
                next
            }
            Entry::Vacant(vacant) => {
                let next = apply(None);
                vacant.insert(next);
                next
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(count: u32) -> ThrottleEntry {
        ThrottleEntry {
            window_start_ms: 1_000,
            window_ms: 60_000,
            count,
            limit: 5,
        }
    }

    #[test]
    fn set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("login:a").is_none());

        store.set("login:a", entry(2));
        assert_eq!(store.get("login:a").map(|e| e.count), Some(2));
        assert_eq!(store.len(), 1);

        assert_eq!(store.delete("login:a").map(|e| e.count), Some(2));
        assert!(store.is_empty());
        assert!(store.delete("login:a").is_none());
    }

    #[test]
    fn update_sees_previous_value() {
        let store = MemoryStore::new();

        let first = store.update("api:a", &mut |current| {
            assert!(current.is_none());
            entry(1)
        });
        assert_eq!(first.count, 1);

        let second = store.update("api:a", &mut |current| {
            let mut next = current.expect("stored by first update");
            next.count += 1;
            next
        });
        assert_eq!(second.count, 2);
        assert_eq!(store.get("api:a").map(|e| e.count), Some(2));
    }

    #[test]
    fn retain_drops_rejected_entries() {
        let store = MemoryStore::new();
        store.set("a", entry(1));
        store.set("b", entry(7));

        let mut visited = 0;
        store.retain(&mut |_, e| {
            visited += 1;
            e.count < 5
        });

        assert_eq!(visited, 2);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }
}
