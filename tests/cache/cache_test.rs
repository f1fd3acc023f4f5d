//! Integration tests for the answer cache through its public API.
//!
//! Unit tests next to the implementation cover each operation in
//! isolation; these exercise the interactions between TTL expiry, FIFO
//! eviction, and scope invalidation under mixed workloads.

use std::thread;
use std::time::Duration;

use serde_json::json;
use tether::cache::{AnswerCache, CacheKey, Scope};

fn doc(id: &str) -> Scope {
    Scope::Document(id.to_string())
}

fn key(scope: Scope, question: &str) -> CacheKey {
    CacheKey::new(scope, question)
}

#[test]
fn test_expiry_frees_a_capacity_slot() {
    // An expired entry is removed on read, so a subsequent insert must
    // not evict the surviving newer entry.
    let mut cache = AnswerCache::new(Duration::from_millis(30), 2);

    cache.put(key(Scope::Global, "old"), json!(1));
    thread::sleep(Duration::from_millis(60));
    cache.put(key(Scope::Global, "fresh"), json!(2));

    assert!(cache.get(&key(Scope::Global, "old")).is_none());
    cache.put(key(Scope::Global, "newest"), json!(3));

    assert_eq!(cache.get(&key(Scope::Global, "fresh")), Some(json!(2)));
    assert_eq!(cache.get(&key(Scope::Global, "newest")), Some(json!(3)));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_scope_invalidation_preserves_eviction_order() {
    // After doc-1 entries are dropped, the remaining entries keep their
    // relative insertion order for eviction.
    let mut cache = AnswerCache::new(Duration::from_secs(60), 3);

    cache.put(key(Scope::Global, "g1"), json!(1));
    cache.put(key(doc("doc-1"), "q"), json!(2));
    cache.put(key(Scope::Global, "g2"), json!(3));

    assert_eq!(cache.invalidate_scope(&doc("doc-1")), 1);
    assert_eq!(cache.len(), 2);

    // Fill back to capacity, then overflow once. The oldest survivor
    // ("g1") must be the one that goes.
    cache.put(key(Scope::Global, "g3"), json!(4));
    cache.put(key(Scope::Global, "g4"), json!(5));

    assert!(cache.get(&key(Scope::Global, "g1")).is_none());
    assert!(cache.get(&key(Scope::Global, "g2")).is_some());
    assert!(cache.get(&key(Scope::Global, "g3")).is_some());
    assert!(cache.get(&key(Scope::Global, "g4")).is_some());
}

#[test]
fn test_same_question_across_scopes_counts_separately() {
    let mut cache = AnswerCache::new(Duration::from_secs(60), 10);

    cache.put(key(Scope::Global, "What is X?"), json!("global"));
    cache.put(key(doc("doc-1"), "What is X?"), json!("one"));
    cache.put(key(doc("doc-2"), "What is X?"), json!("two"));
    assert_eq!(cache.len(), 3);

    assert_eq!(cache.invalidate_scope(&doc("doc-2")), 1);
    assert_eq!(cache.get(&key(Scope::Global, "what is x?")), Some(json!("global")));
    assert_eq!(cache.get(&key(doc("doc-1"), "  WHAT IS X?")), Some(json!("one")));
    assert!(cache.get(&key(doc("doc-2"), "What is X?")).is_none());
}

#[test]
fn test_churn_never_exceeds_capacity() {
    let mut cache = AnswerCache::new(Duration::from_secs(60), 5);

    for i in 0..50 {
        let question = format!("question {}", i);
        cache.put(key(Scope::Global, &question), json!(i));
        assert!(cache.len() <= 5);
    }

    // Only the five newest entries remain.
    for i in 0..45 {
        let question = format!("question {}", i);
        assert!(cache.get(&key(Scope::Global, &question)).is_none());
    }
    for i in 45..50 {
        let question = format!("question {}", i);
        assert_eq!(cache.get(&key(Scope::Global, &question)), Some(json!(i)));
    }
}

#[test]
fn test_invalidate_missing_scope_is_a_no_op() {
    let mut cache = AnswerCache::new(Duration::from_secs(60), 10);
    cache.put(key(Scope::Global, "q"), json!(1));

    assert_eq!(cache.invalidate_scope(&doc("nonexistent")), 0);
    assert_eq!(cache.len(), 1);
}
