// ── Generic reactive entity collection ──
//
// Concurrent name-keyed storage with O(1) lookups and push-based
// change notification via `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent, reactive collection keyed by entity name.
///
/// Uses `DashMap` for O(1) concurrent lookups and a `watch` channel
/// carrying a name-sorted snapshot that every mutation rebuilds.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_name: DashMap<String, Arc<T>>,

    /// Full snapshot sorted by name, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_name: DashMap::new(),
            snapshot,
        }
    }

    /// Modify an existing entity in place. Returns `false` if absent.
    pub(crate) fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let updated = match self.by_name.get_mut(name) {
            Some(mut entry) => {
                f(Arc::make_mut(entry.value_mut()));
                true
            }
            None => false,
        };
        // The shard guard is released before rebuilding the snapshot.
        if updated {
            self.publish();
        }
        updated
    }

    /// Swap the whole contents in one step: subscribers see a single change.
    pub(crate) fn replace_all(&self, entities: Vec<(String, T)>) {
        self.by_name.clear();
        for (name, entity) in entities {
            self.by_name.insert(name, Arc::new(entity));
        }
        self.publish();
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<T>> {
        self.by_name.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot (cheap `Arc` clone), sorted by name.
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.by_name.clear();
        self.publish();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_name.len()
    }

    /// All names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_name
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();

        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
