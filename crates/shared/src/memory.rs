//! Long-lived notes the model asks to remember via `[memory]...[/memory]`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub text: String,
    pub added_at: DateTime<Utc>,
}

pub trait MemoryStore: Send + Sync {
    fn add_entry(&self, text: &str) -> Result<()>;

    fn entries(&self) -> Vec<String>;
}

/// Process-local store; hosts with persistence supply their own.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries.read().clone()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl MemoryStore for InMemoryStore {
    fn add_entry(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        self.entries.write().push(MemoryEntry {
            text: text.to_string(),
            added_at: Utc::now(),
        });
        Ok(())
    }

    fn entries(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.text.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_list() {
        let store = InMemoryStore::new();
        store.add_entry("  likes cats ").unwrap();
        store.add_entry("   ").unwrap();
        store.add_entry("lives in Oslo").unwrap();

        assert_eq!(store.entries(), vec!["likes cats", "lives in Oslo"]);
        store.clear();
        assert!(store.entries().is_empty());
    }
}
