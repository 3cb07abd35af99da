use std::collections::{HashMap, VecDeque};

use quickrag_core::RetrievalResult;

/// Bounded query-result memo with insertion-order eviction.
///
/// Entries are tagged with the index generation they were computed
/// against; a lookup or insert from a stale generation is ignored, so a
/// slow reader finishing after a swap can never repopulate old rankings.
#[derive(Debug)]
pub(crate) struct ResultCache {
    capacity: usize,
    generation: u64,
    entries: HashMap<String, Vec<RetrievalResult>>,
    order: VecDeque<String>,
}

impl ResultCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { capacity, generation: 0, entries: HashMap::new(), order: VecDeque::new() }
    }

    pub(crate) fn key(tokens: &[String], top_k: usize) -> String {
        format!("{}:{top_k}", tokens.join(" "))
    }

    pub(crate) fn get(&self, generation: u64, key: &str) -> Option<Vec<RetrievalResult>> {
        if generation != self.generation {
            return None;
        }
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, generation: u64, key: String, results: Vec<RetrievalResult>) {
        if generation != self.generation || self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.entries.insert(key, results);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, results);
    }

    /// Drop everything and start accepting entries for `generation`.
    pub(crate) fn reset(&mut self, generation: u64) {
        self.generation = generation;
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
