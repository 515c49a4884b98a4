//! Tool activation flags.
//!
//! Which tools are offered to the model is user- (or selector-) controlled
//! state, separate from the registry that knows how to run them. Every
//! mutation is one atomic read-modify-write of the whole flag list, so a
//! selector writing many flags and a user toggling one never corrupt each
//! other.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::store::kv::KvCell;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFlag {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub is_activated: bool,
}

pub struct ToolActivationStore {
    cell: KvCell<Vec<ToolFlag>>,
}

impl ToolActivationStore {
    pub fn open(dir: &Path) -> Self {
        Self {
            cell: KvCell::open(dir, "tools", Vec::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cell: KvCell::in_memory("tools", Vec::new()),
        }
    }

    /// Syncs the flag list with the registered tool set. New tools arrive
    /// deactivated, known tools keep their flag (description and category
    /// are refreshed), and flags for tools that no longer exist are dropped.
    pub async fn register(&self, tools: Vec<ToolFlag>) {
        self.cell
            .set(|prev| {
                tools
                    .into_iter()
                    .map(|mut flag| {
                        if let Some(existing) = prev.iter().find(|p| p.name == flag.name) {
                            flag.is_activated = existing.is_activated;
                        }
                        flag
                    })
                    .collect()
            })
            .await;
    }

    /// Returns false when no tool of that name is registered.
    pub async fn set_active(&self, name: &str, active: bool) -> bool {
        let mut found = false;
        self.cell
            .set(|mut flags| {
                if let Some(flag) = flags.iter_mut().find(|f| f.name == name) {
                    flag.is_activated = active;
                    found = true;
                }
                flags
            })
            .await;
        found
    }

    pub async fn set_category_active(&self, category: &str, active: bool) {
        self.cell
            .set(|mut flags| {
                for flag in flags.iter_mut().filter(|f| f.category == category) {
                    flag.is_activated = active;
                }
                flags
            })
            .await;
    }

    pub async fn deactivate_all(&self) {
        self.cell
            .set(|mut flags| {
                for flag in flags.iter_mut() {
                    flag.is_activated = false;
                }
                flags
            })
            .await;
    }

    pub fn all(&self) -> Vec<ToolFlag> {
        self.cell.get()
    }

    pub fn activated_names(&self) -> Vec<String> {
        self.cell
            .get()
            .into_iter()
            .filter(|f| f.is_activated)
            .map(|f| f.name)
            .collect()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.cell
            .get()
            .iter()
            .any(|f| f.name == name && f.is_activated)
    }

    /// Flag list as-is, for restoring after a failed selection pass.
    pub fn snapshot(&self) -> Vec<ToolFlag> {
        self.cell.get()
    }

    pub async fn restore(&self, snapshot: Vec<ToolFlag>) {
        self.cell.set(|_| snapshot).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ToolFlag>> {
        self.cell.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(name: &str, category: &str) -> ToolFlag {
        ToolFlag {
            name: name.into(),
            description: format!("{name} description"),
            category: category.into(),
            is_activated: false,
        }
    }

    #[tokio::test]
    async fn register_preserves_existing_flags_and_drops_stale() {
        let store = ToolActivationStore::in_memory();
        store.register(vec![flag("a", "Tabs"), flag("b", "Tabs")]).await;
        store.set_active("a", true).await;

        store.register(vec![flag("a", "Tabs"), flag("c", "Misc")]).await;
        let names: Vec<_> = store.all().into_iter().map(|f| (f.name, f.is_activated)).collect();
        assert_eq!(
            names,
            vec![("a".to_string(), true), ("c".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn set_active_reports_unknown_names() {
        let store = ToolActivationStore::in_memory();
        store.register(vec![flag("a", "Tabs")]).await;
        assert!(store.set_active("a", true).await);
        assert!(!store.set_active("nope", true).await);
        assert!(store.is_active("a"));
    }

    #[tokio::test]
    async fn category_toggle_spares_other_categories() {
        let store = ToolActivationStore::in_memory();
        store
            .register(vec![flag("a", "Tabs"), flag("b", "Tabs"), flag("c", "Misc")])
            .await;
        store.set_category_active("Tabs", true).await;
        assert_eq!(store.activated_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip() {
        let store = ToolActivationStore::in_memory();
        store.register(vec![flag("a", "Tabs"), flag("b", "Tabs")]).await;
        store.set_active("b", true).await;
        let snap = store.snapshot();

        store.deactivate_all().await;
        assert!(store.activated_names().is_empty());

        store.restore(snap).await;
        assert_eq!(store.activated_names(), vec!["b"]);
    }
}
