use std::sync::{Arc, Mutex, MutexGuard};

use crate::env::{replay_changes, EnvChange, EnvMap};

/// Cross-run variables shared by every script call of a process.
///
/// Cloning the store clones the handle; all clones see the same map.
#[derive(Debug, Clone, Default)]
pub struct GlobalStore {
    inner: Arc<Mutex<EnvMap>>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: EnvMap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(values)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EnvMap> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(name.into(), value.into());
    }

    pub fn unset(&self, name: &str) -> Option<String> {
        self.lock().remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn snapshot(&self) -> EnvMap {
        self.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn apply(&self, changes: &[EnvChange]) {
        if changes.is_empty() {
            return;
        }
        replay_changes(changes, &mut self.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let store = GlobalStore::new();
        let other = store.clone();
        store.set("base", "https://example.com");
        assert_eq!(other.get("base").as_deref(), Some("https://example.com"));
        assert_eq!(other.unset("base").as_deref(), Some("https://example.com"));
        assert!(!store.has("base"));
    }

    #[test]
    fn apply_replays_change_log() {
        let store = GlobalStore::with_values(
            [("a".to_string(), "1".to_string())].into_iter().collect(),
        );
        store.apply(&[
            EnvChange::set("b", "2", None),
            EnvChange::unset("a", Some("1".into())),
        ]);
        assert_eq!(store.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let store = GlobalStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.set(format!("k{i}"), i.to_string()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.snapshot().len(), 8);
    }
}
