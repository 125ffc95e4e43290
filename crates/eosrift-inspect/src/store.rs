//! Bounded in-memory store of captured exchanges

use crate::redact::redact_entry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One captured HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: String,

    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tunnel_id: String,

    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_entries: 200 }
    }
}

#[derive(Debug)]
struct Inner {
    next_id: u64,
    entries: VecDeque<Entry>,
}

/// Captured-exchange store. Oldest entries are evicted past the cap.
#[derive(Debug)]
pub struct Store {
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let max_entries = if config.max_entries == 0 {
            StoreConfig::default().max_entries
        } else {
            config.max_entries
        };

        Self {
            max_entries,
            inner: Mutex::new(Inner {
                next_id: 0,
                entries: VecDeque::new(),
            }),
        }
    }

    /// Record an exchange. Assigns the id, redacts sensitive material, and
    /// returns the stored entry.
    pub fn add(&self, mut entry: Entry) -> Entry {
        let mut inner = self.inner.lock().unwrap();

        inner.next_id += 1;
        entry.id = inner.next_id.to_string();

        let entry = redact_entry(entry);

        inner.entries.push_back(entry.clone());
        while inner.entries.len() > self.max_entries {
            inner.entries.pop_front();
        }

        entry
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<Entry> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().rev().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        let inner = self.inner.lock().unwrap();
        inner.entries.iter().find(|e| e.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> Entry {
        Entry {
            started_at: Utc::now(),
            method: "GET".into(),
            path: path.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let store = Store::new(StoreConfig::default());
        let first = store.add(entry("/a"));
        let second = store.add(entry("/b"));
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
    }

    #[test]
    fn test_list_is_newest_first() {
        let store = Store::new(StoreConfig::default());
        store.add(entry("/a"));
        store.add(entry("/b"));

        let listed = store.list();
        assert_eq!(listed[0].path, "/b");
        assert_eq!(listed[1].path, "/a");
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let store = Store::new(StoreConfig { max_entries: 2 });
        store.add(entry("/a"));
        store.add(entry("/b"));
        store.add(entry("/c"));

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, "/c");
        assert_eq!(listed[1].path, "/b");
        assert!(store.get("1").is_none());
        assert!(store.get("3").is_some());
    }
}
