use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::env::EnvMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Set,
    Unset,
}

/// One logged mutation. `previous` is the live value seen when the call was made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

impl EnvChange {
    pub fn set(name: impl Into<String>, value: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            kind: ChangeKind::Set,
            name: name.into(),
            value: Some(value.into()),
            previous,
        }
    }

    pub fn unset(name: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            kind: ChangeKind::Unset,
            name: name.into(),
            value: None,
            previous,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    backing: Option<EnvMap>,
    changes: Vec<EnvChange>,
}

impl TrackerState {
    fn lookup(&self, name: &str) -> Option<String> {
        for change in self.changes.iter().rev() {
            if change.name == name {
                return match change.kind {
                    ChangeKind::Set => change.value.clone(),
                    ChangeKind::Unset => None,
                };
            }
        }
        self.backing.as_ref().and_then(|map| map.get(name).cloned())
    }
}

/// Change-logged key/value store.
///
/// Writes are appended to an ordered log and only reach the backing map when
/// [`MutationTracker::apply_changes`] replays them. Reads walk the log newest
/// first, so a pending `unset` hides a key that the backing map still holds.
#[derive(Debug, Default)]
pub struct MutationTracker {
    state: Mutex<TrackerState>,
}

impl MutationTracker {
    pub fn new(backing: Option<EnvMap>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                backing,
                changes: Vec::new(),
            }),
        }
    }

    pub fn from_map(backing: EnvMap) -> Self {
        Self::new(Some(backing))
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A poisoned tracker still holds a consistent log; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().lookup(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().lookup(name).is_some()
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        let mut state = self.lock();
        let previous = state.lookup(name);
        state.changes.push(EnvChange::set(name, value, previous));
    }

    pub fn unset(&self, name: &str) {
        let mut state = self.lock();
        let previous = state.lookup(name);
        state.changes.push(EnvChange::unset(name, previous));
    }

    pub fn changes(&self) -> Vec<EnvChange> {
        self.lock().changes.clone()
    }

    pub fn has_changes(&self) -> bool {
        !self.lock().changes.is_empty()
    }

    /// Commits the log to the backing map, creating the map when there is none.
    /// The log itself is kept; replaying it again yields the same map.
    pub fn apply_changes(&self) {
        let mut state = self.lock();
        let TrackerState { backing, changes } = &mut *state;
        replay_changes(changes, backing.get_or_insert_with(EnvMap::new));
    }

    /// Backing map with the pending log applied, without committing anything.
    pub fn snapshot(&self) -> EnvMap {
        let state = self.lock();
        let mut view = state.backing.clone().unwrap_or_default();
        replay_changes(&state.changes, &mut view);
        view
    }

    pub fn backing(&self) -> Option<EnvMap> {
        self.lock().backing.clone()
    }
}

/// Replays a change log oldest-first onto `target`.
pub fn replay_changes(changes: &[EnvChange], target: &mut EnvMap) {
    for change in changes {
        match change.kind {
            ChangeKind::Set => {
                target.insert(
                    change.name.clone(),
                    change.value.clone().unwrap_or_default(),
                );
            }
            ChangeKind::Unset => {
                target.remove(&change.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backing(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reads_fall_through_to_backing_store() {
        let tracker = MutationTracker::from_map(backing(&[("host", "localhost")]));
        assert_eq!(tracker.get("host").as_deref(), Some("localhost"));
        assert!(tracker.has("host"));
        assert!(!tracker.has("missing"));
    }

    #[test]
    fn latest_change_wins_for_live_reads() {
        let tracker = MutationTracker::from_map(backing(&[("token", "old")]));
        tracker.set("token", "a");
        tracker.set("token", "b");
        assert_eq!(tracker.get("token").as_deref(), Some("b"));

        tracker.unset("token");
        assert!(!tracker.has("token"));
        assert_eq!(tracker.backing().unwrap().get("token").map(String::as_str), Some("old"));
    }

    #[test]
    fn set_set_unset_round_trip() {
        let tracker = MutationTracker::new(None);
        tracker.set("k", "a");
        tracker.set("k", "b");
        tracker.unset("k");
        assert_eq!(tracker.get("k"), None);

        let changes = tracker.changes();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0], EnvChange::set("k", "a", None));
        assert_eq!(changes[1], EnvChange::set("k", "b", Some("a".into())));
        assert_eq!(changes[2], EnvChange::unset("k", Some("b".into())));

        tracker.apply_changes();
        assert_eq!(tracker.get("k"), None);
        assert_eq!(tracker.changes().len(), 3);
        assert!(tracker.backing().is_some());
    }

    #[test]
    fn apply_changes_creates_backing_store() {
        let tracker = MutationTracker::new(None);
        assert!(tracker.backing().is_none());
        tracker.apply_changes();
        assert_eq!(tracker.backing(), Some(EnvMap::new()));
    }

    #[test]
    fn apply_changes_matches_live_reads() {
        let tracker = MutationTracker::from_map(backing(&[("a", "1"), ("b", "2")]));
        tracker.unset("a");
        tracker.set("b", "3");
        tracker.set("c", "4");
        tracker.unset("c");
        tracker.set("c", "5");
        let live = tracker.snapshot();

        tracker.apply_changes();
        assert_eq!(tracker.backing().unwrap(), live);
        assert_eq!(live, backing(&[("b", "3"), ("c", "5")]));
    }

    #[test]
    fn replay_changes_is_order_sensitive() {
        let mut target = EnvMap::new();
        replay_changes(
            &[
                EnvChange::unset("x", None),
                EnvChange::set("x", "1", None),
            ],
            &mut target,
        );
        assert_eq!(target.get("x").map(String::as_str), Some("1"));

        replay_changes(
            &[
                EnvChange::set("x", "2", None),
                EnvChange::unset("x", None),
            ],
            &mut target,
        );
        assert!(target.get("x").is_none());
    }

    #[test]
    fn change_serializes_with_type_tag() {
        let json = serde_json::to_value(EnvChange::set("k", "v", None)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "set", "name": "k", "value": "v"}));
    }
}
