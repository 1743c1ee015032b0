//! Byte-budgeted LRU map.
//!
//! Entries live in a slab arena and are threaded onto an intrusive
//! doubly-linked recency list through integer ids (`prev`/`next` fields),
//! with a hash index from key to arena id. Head is most recently used,
//! tail is least recently used; evictions pop the tail. Integer links keep
//! the list free of owning/non-owning pointer asymmetry while all
//! operations stay O(1).

use rustc_hash::FxHashMap;
use slab::Slab;

/// Sentinel id for "no neighbor" in the recency list.
const NIL: usize = usize::MAX;

struct Node {
    key: String,
    value: Vec<u8>,
    prev: usize,
    next: usize,
}

impl Node {
    fn cost(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Bounded LRU key/value map. Not thread-safe; see
/// [`ThreadSafeLru`](crate::ThreadSafeLru) for the shared configuration.
///
/// Every public operation leaves the map within its byte budget and keeps
/// the index and the recency list in lockstep. Operations fail by returning
/// `false` (or `None`) without partial mutation; an oversize pair is
/// rejected before any eviction runs.
pub struct SimpleLru {
    max_bytes: usize,
    current_bytes: usize,
    nodes: Slab<Node>,
    index: FxHashMap<String, usize>,
    head: usize,
    tail: usize,
}

impl SimpleLru {
    /// Create a map that will hold at most `max_bytes` of combined key and
    /// value bytes.
    pub fn new(max_bytes: usize) -> Self {
        SimpleLru {
            max_bytes,
            current_bytes: 0,
            nodes: Slab::new(),
            index: FxHashMap::default(),
            head: NIL,
            tail: NIL,
        }
    }

    /// Insert or replace `key`. Fails only when `key.len() + value.len()`
    /// exceeds the byte budget on its own.
    pub fn put(&mut self, key: &str, value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        match self.index.get(key) {
            Some(&id) => self.update_value(id, value),
            None => self.insert_new(key, value),
        }
        true
    }

    /// Insert `key` only if absent. Fails on an existing key or an
    /// oversize pair.
    pub fn put_if_absent(&mut self, key: &str, value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        if self.index.contains_key(key) {
            return false;
        }
        self.insert_new(key, value);
        true
    }

    /// Replace the value of an existing `key`. Fails on a missing key or
    /// an oversize pair.
    pub fn set(&mut self, key: &str, value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        match self.index.get(key) {
            Some(&id) => {
                self.update_value(id, value);
                true
            }
            None => false,
        }
    }

    /// Remove `key`. Fails if it is absent.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(id) => {
                self.unlink(id);
                let node = self.nodes.remove(id);
                self.current_bytes -= node.cost();
                true
            }
            None => false,
        }
    }

    /// Return the value of `key` and promote the entry to head.
    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        let id = *self.index.get(key)?;
        self.move_to_head(id);
        Some(self.nodes[id].value.clone())
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Combined byte cost of all stored entries.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Configured byte budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    // -----------------------------------------------------------------------
    // Recency list plumbing
    // -----------------------------------------------------------------------

    /// Detach `id` from the recency list without touching the arena or the
    /// byte count.
    fn unlink(&mut self, id: usize) {
        let (prev, next) = {
            let node = &self.nodes[id];
            (node.prev, node.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
    }

    /// Link an already-detached `id` in front of the current head.
    fn push_front(&mut self, id: usize) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[id];
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head == NIL {
            self.tail = id;
        } else {
            self.nodes[old_head].prev = id;
        }
        self.head = id;
    }

    fn move_to_head(&mut self, id: usize) {
        if self.head == id {
            return;
        }
        self.unlink(id);
        self.push_front(id);
    }

    /// Drop the least-recently-used entry, adjusting index and byte count.
    fn evict_tail(&mut self) {
        let id = self.tail;
        debug_assert_ne!(id, NIL, "evict_tail on empty list");
        self.unlink(id);
        let node = self.nodes.remove(id);
        self.current_bytes -= node.cost();
        self.index.remove(&node.key);
    }

    /// Update path: promote first, evict tails until the grown entry fits,
    /// then swap the value. The caller has already checked the pair fits
    /// the budget, so eviction can never reach the promoted entry itself.
    fn update_value(&mut self, id: usize, value: &[u8]) {
        self.move_to_head(id);
        let old_len = self.nodes[id].value.len();
        while self.current_bytes + value.len() - old_len > self.max_bytes {
            self.evict_tail();
        }
        self.current_bytes -= old_len;
        self.current_bytes += value.len();
        self.nodes[id].value = value.to_vec();
    }

    /// Insert path: evict tails until the new pair fits, then link at head.
    fn insert_new(&mut self, key: &str, value: &[u8]) {
        let cost = key.len() + value.len();
        while self.current_bytes + cost > self.max_bytes {
            self.evict_tail();
        }
        let id = self.nodes.insert(Node {
            key: key.to_owned(),
            value: value.to_vec(),
            prev: NIL,
            next: NIL,
        });
        self.push_front(id);
        self.index.insert(key.to_owned(), id);
        self.current_bytes += cost;
    }
}

impl std::fmt::Debug for SimpleLru {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleLru")
            .field("entries", &self.index.len())
            .field("current_bytes", &self.current_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Keys from head (most recent) to tail (least recent).
    fn recency_order(lru: &SimpleLru) -> Vec<String> {
        let mut out = Vec::new();
        let mut id = lru.head;
        while id != NIL {
            out.push(lru.nodes[id].key.clone());
            id = lru.nodes[id].next;
        }
        out
    }

    /// Check every structural invariant of the map.
    fn check_invariants(lru: &SimpleLru) {
        assert!(lru.current_bytes <= lru.max_bytes);

        let forward = recency_order(lru);

        // Walk backwards from tail and compare.
        let mut backward = Vec::new();
        let mut id = lru.tail;
        while id != NIL {
            backward.push(lru.nodes[id].key.clone());
            id = lru.nodes[id].prev;
        }
        backward.reverse();
        assert_eq!(forward, backward, "prev/next links disagree");

        // Index and list must cover exactly the same keys.
        assert_eq!(forward.len(), lru.index.len());
        let mut bytes = 0;
        for key in &forward {
            let id = *lru.index.get(key).expect("listed key missing from index");
            assert_eq!(&lru.nodes[id].key, key);
            bytes += lru.nodes[id].cost();
        }
        assert_eq!(bytes, lru.current_bytes, "byte accounting drifted");
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut lru = SimpleLru::new(1024);
        assert!(lru.put("hello", b"world"));
        assert_eq!(lru.get("hello"), Some(b"world".to_vec()));
        assert_eq!(lru.current_bytes(), 10);
        check_invariants(&lru);
    }

    #[test]
    fn test_empty_store() {
        let mut lru = SimpleLru::new(16);
        assert!(!lru.delete("missing"));
        assert_eq!(lru.get("missing"), None);
        assert!(lru.put("a", b"1"));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        // max_bytes = 10: "a"/"1" and "bb"/"22" fit together; inserting
        // "ccc"/"333" forces the oldest entry out.
        let mut lru = SimpleLru::new(10);
        assert!(lru.put("a", b"1"));
        assert!(lru.put("bb", b"22"));
        assert!(lru.put("ccc", b"333"));
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("ccc"), Some(b"333".to_vec()));
        check_invariants(&lru);
    }

    #[test]
    fn test_touch_on_get_changes_victim() {
        // max_bytes = 6: after get("a") the LRU entry is "b", so inserting
        // "d" evicts "b" and not "a".
        let mut lru = SimpleLru::new(6);
        assert!(lru.put("a", b"1"));
        assert!(lru.put("b", b"2"));
        assert!(lru.put("c", b"3"));
        assert_eq!(lru.get("a"), Some(b"1".to_vec()));
        assert!(lru.put("d", b"4"));

        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.get("a"), Some(b"1".to_vec()));
        assert_eq!(lru.get("c"), Some(b"3".to_vec()));
        assert_eq!(lru.get("d"), Some(b"4".to_vec()));
        check_invariants(&lru);
    }

    #[test]
    fn test_oversize_rejected_without_side_effects() {
        let mut lru = SimpleLru::new(4);
        assert!(!lru.put("keyX", b"v"));
        assert!(lru.is_empty());
        assert_eq!(lru.current_bytes(), 0);

        // Same precheck applies when other entries are present.
        assert!(lru.put("k", b"1"));
        assert!(!lru.put("keyX", b"v"));
        assert_eq!(lru.len(), 1);
        check_invariants(&lru);
    }

    #[test]
    fn test_update_never_evicts_itself() {
        // The grown pair alone would exceed the budget; the precheck must
        // reject it before any eviction happens.
        let mut lru = SimpleLru::new(10);
        assert!(lru.put("k", b"12345"));
        assert!(!lru.put("k", b"0123456789"));
        assert_eq!(lru.get("k"), Some(b"12345".to_vec()));
        assert_eq!(lru.current_bytes(), 6);
        check_invariants(&lru);
    }

    #[test]
    fn test_update_evicts_tail_until_fit() {
        let mut lru = SimpleLru::new(10);
        assert!(lru.put("a", b"1"));
        assert!(lru.put("b", b"2"));
        assert!(lru.put("k", b"12"));
        assert_eq!(lru.current_bytes(), 7);

        // Growing "k" to 8 value bytes needs 13 - 4 = 9 bytes freed twice
        // over: both "a" and "b" must go.
        assert!(lru.set("k", b"01234567"));
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.get("k"), Some(b"01234567".to_vec()));
        assert_eq!(lru.current_bytes(), 9);
        check_invariants(&lru);
    }

    #[test]
    fn test_put_promotes_existing_to_head() {
        let mut lru = SimpleLru::new(64);
        lru.put("a", b"1");
        lru.put("b", b"2");
        lru.put("a", b"9");
        assert_eq!(recency_order(&lru), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(lru.get("a"), Some(b"9".to_vec()));
    }

    #[test]
    fn test_put_if_absent() {
        let mut lru = SimpleLru::new(64);
        assert!(lru.put_if_absent("a", b"1"));
        assert!(!lru.put_if_absent("a", b"2"));
        assert_eq!(lru.get("a"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_set_requires_presence() {
        let mut lru = SimpleLru::new(64);
        assert!(!lru.set("a", b"1"));
        assert!(lru.put("a", b"1"));
        assert!(lru.set("a", b"2"));
        assert_eq!(lru.get("a"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_delete_unlinks_every_position() {
        for victim in ["a", "b", "c"] {
            let mut lru = SimpleLru::new(64);
            lru.put("a", b"1");
            lru.put("b", b"2");
            lru.put("c", b"3");
            assert!(lru.delete(victim));
            assert!(!lru.delete(victim));
            assert_eq!(lru.len(), 2);
            check_invariants(&lru);
        }
    }

    #[test]
    fn test_eviction_takes_a_tail_prefix() {
        let mut lru = SimpleLru::new(12);
        lru.put("a", b"1");
        lru.put("b", b"2");
        lru.put("c", b"3");
        lru.put("d", b"4");
        lru.put("e", b"5");
        lru.put("f", b"6");
        // Budget full at 12 bytes; a 4-byte insert must drop exactly the
        // two oldest entries.
        let before = recency_order(&lru);
        assert!(lru.put("gg", b"77"));
        let after = recency_order(&lru);
        assert_eq!(&before[..4], &after[1..]);
        assert_eq!(after[0], "gg");
        check_invariants(&lru);
    }

    #[test]
    fn test_invariants_under_random_workload() {
        // Deterministic mixed workload over a small key space so that
        // collisions, updates and evictions all occur.
        let mut lru = SimpleLru::new(48);
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..2000 {
            let r = next();
            let key = format!("key{}", r % 11);
            let value = vec![b'v'; (next() % 9) as usize];
            match r % 5 {
                0 => {
                    lru.put(&key, &value);
                }
                1 => {
                    lru.put_if_absent(&key, &value);
                }
                2 => {
                    lru.set(&key, &value);
                }
                3 => {
                    lru.delete(&key);
                }
                _ => {
                    if let Some(v) = lru.get(&key) {
                        // A successful get promotes to head.
                        assert_eq!(recency_order(&lru)[0], key);
                        assert!(v.iter().all(|&b| b == b'v'));
                    }
                }
            }
            check_invariants(&lru);
        }
    }
}
