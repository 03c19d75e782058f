//! Registry of live groups.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::group::{GroupSnapshot, GroupState};
use crate::config::GroupConfig;

/// A group shared between connection tasks.
pub type SharedGroup = Arc<Mutex<GroupState>>;

/// Map from group name to group state.
///
/// The map lock is only held long enough to look up, insert or remove an
/// entry and is never held while waiting for a group lock.
#[derive(Debug)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, SharedGroup>>,
    pacing_rounds: u32,
}

impl GroupRegistry {
    pub fn new(config: &GroupConfig) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            pacing_rounds: config.aggregate_pacing_rounds,
        }
    }

    /// Look up `name`, creating the group when `size` is a positive size.
    ///
    /// Returns `None` for an unknown group without a usable size.
    pub async fn resolve(&self, name: &str, size: Option<u64>) -> Option<SharedGroup> {
        if let Some(group) = self.groups.read().await.get(name) {
            return Some(group.clone());
        }

        let size = size
            .filter(|size| *size > 0)
            .and_then(|size| usize::try_from(size).ok())?;

        let mut groups = self.groups.write().await;
        let group = groups
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(group = name, size, "creating group");
                Arc::new(Mutex::new(GroupState::new(name, size, self.pacing_rounds)))
            })
            .clone();
        Some(group)
    }

    /// Remove `name` if it still maps to `group`.
    ///
    /// A group created under the same name after `group` was evicted is
    /// left alone.
    pub async fn evict(&self, name: &str, group: &SharedGroup) -> bool {
        let mut groups = self.groups.write().await;
        match groups.get(name) {
            Some(current) if Arc::ptr_eq(current, group) => {
                groups.remove(name);
                info!(group = name, remaining = groups.len(), "group evicted");
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.groups.read().await.contains_key(name)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn snapshot(&self, name: &str) -> Option<GroupSnapshot> {
        let group = self.groups.read().await.get(name).cloned()?;
        let state = group.lock().await;
        Some(state.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GroupRegistry {
        GroupRegistry::new(&GroupConfig::default())
    }

    #[tokio::test]
    async fn test_resolve_creates_with_size() {
        let registry = registry();
        assert!(registry.resolve("g1", None).await.is_none());
        assert!(registry.resolve("g1", Some(0)).await.is_none());
        assert_eq!(registry.group_count().await, 0);

        let group = registry.resolve("g1", Some(3)).await.unwrap();
        assert_eq!(group.lock().await.expected_size(), 3);
        assert!(registry.contains("g1").await);
    }

    #[tokio::test]
    async fn test_resolve_ignores_later_sizes() {
        let registry = registry();
        let first = registry.resolve("g1", Some(2)).await.unwrap();
        let second = registry.resolve("g1", Some(5)).await.unwrap();
        let third = registry.resolve("g1", None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(second.lock().await.expected_size(), 2);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let registry = registry();
        let g1 = registry.resolve("g1", Some(1)).await.unwrap();
        let g2 = registry.resolve("g2", Some(1)).await.unwrap();

        g1.lock().await.register("a", None, Some("t"));
        assert_eq!(g2.lock().await.client_count(), 0);
        assert_eq!(registry.group_count().await, 2);
    }

    #[tokio::test]
    async fn test_evict_only_matching_instance() {
        let registry = registry();
        let old = registry.resolve("g1", Some(1)).await.unwrap();
        assert!(registry.evict("g1", &old).await);
        assert!(!registry.contains("g1").await);

        let new = registry.resolve("g1", Some(1)).await.unwrap();
        assert!(!registry.evict("g1", &old).await);
        assert!(registry.contains("g1").await);
        assert!(registry.evict("g1", &new).await);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let registry = registry();
        assert!(registry.snapshot("g1").await.is_none());

        let group = registry.resolve("g1", Some(2)).await.unwrap();
        group.lock().await.register("a", Some("host-a"), Some("client"));

        let snap = registry.snapshot("g1").await.unwrap();
        assert_eq!(snap.name, "g1");
        assert_eq!(snap.expected_size, 2);
        assert_eq!(snap.clients, vec!["a"]);
    }
}
