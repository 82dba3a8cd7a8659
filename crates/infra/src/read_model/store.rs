use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Key/value storage for read models that can be rebuilt from the event store.
pub trait ReadStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    fn list(&self) -> Vec<V>;
    /// Drop every record (rebuild support).
    fn clear(&self);
}

impl<K, V, S> ReadStore<K, V> for Arc<S>
where
    S: ReadStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) {
        (**self).upsert(key, value)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// In-memory store for tests and single-node runs.
#[derive(Debug)]
pub struct InMemoryReadStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryReadStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReadStore<K, V> for InMemoryReadStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key, value);
        }
    }

    fn list(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn clear(&self) {
        if let Ok(mut map) = self.inner.write() {
            map.clear();
        }
    }
}
