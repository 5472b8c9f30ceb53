//! Read-only local copy of remote-owned state slices.

use ferry_types::broadcast::SliceSnapshot;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// A slice value the mirror accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceChange {
    pub slice: String,
    pub value: Value,
    pub rev: u64,
}

struct Mirrored {
    value: Value,
    rev: u64,
}

/// The client's mirror of remote state.
///
/// Only the connection that owns it writes to it, by applying pushes and
/// bootstrap snapshots from the remote. Updates replace a slice's value
/// whole. An update whose revision is not newer than the mirrored one is
/// dropped, so duplicate deliveries and a snapshot racing with pushes settle
/// on the newest value. Revision 0 marks an unversioned update and is always
/// applied.
///
/// Values held across a re-attach are stale until a snapshot from the new
/// remote replaces them.
pub struct StateMirror {
    slices: RwLock<HashMap<String, Mirrored>>,
    stale: AtomicBool,
    changes: broadcast::Sender<SliceChange>,
}

impl StateMirror {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            slices: RwLock::new(HashMap::new()),
            stale: AtomicBool::new(false),
            changes,
        }
    }

    /// Apply one pushed value. Returns whether it was accepted.
    pub(crate) fn apply(&self, slice: &str, value: Value, rev: u64) -> bool {
        {
            let mut slices = self.slices.write().unwrap_or_else(|e| e.into_inner());
            match slices.get_mut(slice) {
                Some(held) if rev != 0 && rev <= held.rev => {
                    debug!(slice, rev, held = held.rev, "Dropping stale state update");
                    return false;
                }
                Some(held) => {
                    held.value = value.clone();
                    held.rev = held.rev.max(rev);
                }
                None => {
                    slices.insert(
                        slice.to_string(),
                        Mirrored {
                            value: value.clone(),
                            rev,
                        },
                    );
                }
            }
        }
        let _ = self.changes.send(SliceChange {
            slice: slice.to_string(),
            value,
            rev,
        });
        true
    }

    /// Apply a bootstrap snapshot. Returns how many slices were accepted.
    pub(crate) fn apply_snapshot(&self, snapshot: BTreeMap<String, SliceSnapshot>) -> usize {
        snapshot
            .into_iter()
            .filter(|(slice, s)| self.apply(slice, s.value.clone(), s.rev))
            .count()
    }

    /// Replace the mirror with a full snapshot from a new remote. Slices the
    /// snapshot lacks are dropped. Clears the stale mark.
    pub(crate) fn replace_with_snapshot(&self, snapshot: BTreeMap<String, SliceSnapshot>) -> usize {
        {
            let mut slices = self.slices.write().unwrap_or_else(|e| e.into_inner());
            slices.retain(|name, _| snapshot.contains_key(name));
        }
        self.stale.store(false, Ordering::SeqCst);
        self.apply_snapshot(snapshot)
    }

    /// Mark held values as stale and forget their revisions, so a restarted
    /// remote whose revisions begin again is not mistaken for stale. Values
    /// are kept until replaced. Returns whether anything is held.
    pub(crate) fn mark_stale(&self) -> bool {
        let mut slices = self.slices.write().unwrap_or_else(|e| e.into_inner());
        for held in slices.values_mut() {
            held.rev = 0;
        }
        let held = !slices.is_empty();
        if held {
            self.stale.store(true, Ordering::SeqCst);
        }
        held
    }

    /// Whether the held values came from a previous remote and have not been
    /// refreshed yet.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Clear the stale mark, returning whether it was set.
    pub(crate) fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }

    /// Current value of a slice.
    pub fn get(&self, slice: &str) -> Option<Value> {
        self.slices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(slice)
            .map(|m| m.value.clone())
    }

    /// Current value of a slice, deserialized. `None` if absent or if it does
    /// not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, slice: &str) -> Option<T> {
        self.get(slice).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Revision of the mirrored value.
    pub fn rev(&self, slice: &str) -> Option<u64> {
        self.slices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(slice)
            .map(|m| m.rev)
    }

    /// Names of the mirrored slices, sorted.
    pub fn slices(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Subscribe to accepted changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SliceChange> {
        self.changes.subscribe()
    }
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_applies_in_order() {
        let mirror = StateMirror::new();
        assert!(mirror.apply("settings", json!("v1"), 2));
        assert!(mirror.apply("settings", json!("v2"), 3));
        assert_eq!(mirror.get("settings"), Some(json!("v2")));
        assert_eq!(mirror.rev("settings"), Some(3));
    }

    #[test]
    fn test_stale_and_duplicate_dropped() {
        let mirror = StateMirror::new();
        mirror.apply("settings", json!("v2"), 3);
        assert!(!mirror.apply("settings", json!("v1"), 2));
        assert!(!mirror.apply("settings", json!("v2"), 3));
        assert_eq!(mirror.get("settings"), Some(json!("v2")));
    }

    #[test]
    fn test_unversioned_always_applies() {
        let mirror = StateMirror::new();
        mirror.apply("s", json!(1), 5);
        assert!(mirror.apply("s", json!(0), 0));
        assert_eq!(mirror.get("s"), Some(json!(0)));
        assert_eq!(mirror.rev("s"), Some(5));
    }

    #[test]
    fn test_snapshot_and_push_commute() {
        let mirror = StateMirror::new();
        mirror.apply("settings", json!({"theme": "dark"}), 4);

        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "settings".to_string(),
            SliceSnapshot {
                value: json!({"theme": "light"}),
                rev: 3,
            },
        );
        snapshot.insert(
            "accounts".to_string(),
            SliceSnapshot {
                value: json!([]),
                rev: 1,
            },
        );
        assert_eq!(mirror.apply_snapshot(snapshot), 1);
        assert_eq!(mirror.get("settings"), Some(json!({"theme": "dark"})));
        assert_eq!(mirror.slices(), vec!["accounts", "settings"]);
    }

    #[test]
    fn test_mark_stale_accepts_restarted_remote() {
        let mirror = StateMirror::new();
        assert!(!mirror.mark_stale());
        assert!(!mirror.is_stale());

        mirror.apply("s", json!("old"), 9);
        assert!(mirror.mark_stale());
        assert!(mirror.is_stale());
        assert_eq!(mirror.get("s"), Some(json!("old")));
        assert!(mirror.apply("s", json!("new"), 1));
        assert_eq!(mirror.get_as::<String>("s").as_deref(), Some("new"));
    }

    #[test]
    fn test_replace_with_snapshot_drops_vanished_slices() {
        let mirror = StateMirror::new();
        mirror.apply("settings", json!({"theme": "dark"}), 7);
        mirror.apply("legacy", json!(1), 2);
        mirror.mark_stale();

        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "settings".to_string(),
            SliceSnapshot {
                value: json!({"theme": "light"}),
                rev: 1,
            },
        );
        assert_eq!(mirror.replace_with_snapshot(snapshot), 1);
        assert!(!mirror.is_stale());
        assert_eq!(mirror.get("settings"), Some(json!({"theme": "light"})));
        assert_eq!(mirror.slices(), vec!["settings"]);
        assert!(!mirror.take_stale());
    }

    #[tokio::test]
    async fn test_subscribe_sees_accepted_only() {
        let mirror = StateMirror::new();
        let mut rx = mirror.subscribe();
        mirror.apply("s", json!(1), 2);
        mirror.apply("s", json!(0), 1);
        mirror.apply("s", json!(2), 3);
        assert_eq!(rx.recv().await.unwrap().value, json!(1));
        assert_eq!(rx.recv().await.unwrap().value, json!(2));
    }
}
