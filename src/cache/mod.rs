//! In-memory answer cache.
//!
//! Repeated questions over the same scope are expensive for the worker
//! (embedding plus similarity search plus generation), so successful query
//! results are kept in a bounded, time-expiring table.
//!
//! # Design
//!
//! - Key: scope (one document, or global) + normalized question text
//! - TTL: entries are visible only while younger than the configured TTL;
//!   expiry is checked lazily on read
//! - Capacity: fixed maximum entry count; when full, the earliest-inserted
//!   entry is evicted first (plain FIFO, deliberately not LRU)
//! - Error responses are never stored; only the gateway writes entries, and
//!   only for successful results

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;

/// Default time-to-live for cached answers.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of cached answers.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Identifies which slice of the vector store a question ran against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Search across all stored documents.
    Global,
    /// Search restricted to one document.
    Document(String),
}

impl Scope {
    /// Build a scope from an optional document id, `None` meaning global.
    pub fn from_document_id(document_id: Option<&str>) -> Self {
        match document_id {
            Some(id) => Scope::Document(id.to_string()),
            None => Scope::Global,
        }
    }
}

/// Composite cache key: scope plus normalized question text.
///
/// Two questions differing only in casing or surrounding whitespace map to
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: Scope,
    question: String,
}

impl CacheKey {
    pub fn new(scope: Scope, question: &str) -> Self {
        Self {
            scope,
            question: normalize_question(question),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Normalize free-text question for key derivation: trim and case-fold.
pub fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
}

/// Bounded TTL cache for successful query results.
#[derive(Debug)]
pub struct AnswerCache {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Keys in insertion order, oldest at the front. Drives FIFO eviction.
    order: VecDeque<CacheKey>,
    ttl: Duration,
    max_entries: usize,
}

impl AnswerCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_entries,
        }
    }

    /// Look up a cached result. Expired entries are removed and treated
    /// as absent.
    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        let created_at = self.entries.get(key)?.created_at;
        if created_at.elapsed() >= self.ttl {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert a result, evicting the earliest-inserted entry if at capacity.
    ///
    /// Re-inserting an existing key refreshes its value, timestamp, and
    /// insertion-order position.
    pub fn put(&mut self, key: CacheKey, value: Value) {
        if self.max_entries == 0 {
            return;
        }

        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        } else if self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        self.order.push_back(key);
    }

    /// Remove one entry. Returns true if it existed.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Drop every entry cached for a scope.
    ///
    /// Called when a document is deleted, so stale answers do not outlive
    /// the vectors they were derived from. Returns how many entries went.
    pub fn invalidate_scope(&mut self, scope: &Scope) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.scope() != scope);
        self.order.retain(|key| key.scope() != scope);
        before - self.entries.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Current entry count, including not-yet-collected expired entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
