//! Okapi BM25 statistics and postings-driven scoring.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use quickrag_core::config::Bm25Settings;

/// Scoring knobs. `idf_floor` keeps terms that occur in half or more of the
/// corpus from contributing zero or negative weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub min_score: f32,
    pub idf_floor: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, min_score: 0.001, idf_floor: 0.01 }
    }
}

impl From<&Bm25Settings> for Bm25Params {
    fn from(s: &Bm25Settings) -> Self {
        Self { k1: s.k1, b: s.b, min_score: s.min_score, idf_floor: s.idf_floor }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Position of the chunk in corpus order.
    pub doc: u32,
    pub tf: u32,
}

/// Aggregates derived from the tokenized corpus. Always rebuildable from
/// the token lists alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub doc_lengths: Vec<u32>,
    pub avg_doc_len: f32,
    pub postings: HashMap<String, Vec<Posting>>,
}

impl CorpusStats {
    pub fn build(tokenized: &[Vec<String>]) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(tokenized.len());
        let mut total: u64 = 0;
        for (ordinal, tokens) in tokenized.iter().enumerate() {
            let mut tf: HashMap<&str, u32> = HashMap::new();
            for t in tokens {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            // Sorted so postings (and the snapshot) come out identical on every rebuild.
            let mut terms: Vec<_> = tf.into_iter().collect();
            terms.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (term, count) in terms {
                postings.entry(term.to_string()).or_default().push(Posting { doc: ordinal as u32, tf: count });
            }
            doc_lengths.push(tokens.len() as u32);
            total += tokens.len() as u64;
        }
        let avg_doc_len = if tokenized.is_empty() { 0.0 } else { total as f32 / tokenized.len() as f32 };
        Self { doc_lengths, avg_doc_len, postings }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Consistent with a corpus of `docs` chunks.
    pub fn matches_corpus(&self, docs: usize) -> bool {
        self.doc_lengths.len() == docs && self.postings.values().flatten().all(|p| (p.doc as usize) < docs)
    }
}

pub fn idf(n: usize, df: usize, floor: f32) -> f32 {
    let n = n as f32;
    let df = df as f32;
    ((n - df + 0.5) / (df + 0.5)).ln().max(floor)
}

/// Score every chunk containing at least one query token. Returns
/// `(ordinal, score)` pairs above `min_score`, best first, ties by corpus order.
pub fn score(stats: &CorpusStats, params: &Bm25Params, query_tokens: &[String]) -> Vec<(usize, f32)> {
    let n = stats.doc_count();
    if n == 0 || query_tokens.is_empty() {
        return Vec::new();
    }
    let avgdl = if stats.avg_doc_len > 0.0 { stats.avg_doc_len } else { 1.0 };
    let mut acc: HashMap<u32, f32> = HashMap::new();
    for token in query_tokens {
        let Some(postings) = stats.postings.get(token) else { continue };
        let w = idf(n, postings.len(), params.idf_floor);
        for p in postings {
            let tf = p.tf as f32;
            let dl = stats.doc_lengths[p.doc as usize] as f32;
            let norm = tf + params.k1 * (1.0 - params.b + params.b * dl / avgdl);
            *acc.entry(p.doc).or_insert(0.0) += w * tf * (params.k1 + 1.0) / norm;
        }
    }
    let mut scored: Vec<(usize, f32)> = acc
        .into_iter()
        .filter(|(_, s)| *s > params.min_score)
        .map(|(d, s)| (d as usize, s))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
}
