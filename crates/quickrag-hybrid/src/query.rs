//! Query normalization, classification and rewriting.
//!
//! The processor turns a raw user query into a [`ProcessedQuery`] and
//! derives the string that is actually sent to the indexes. The raw query
//! is kept on the processed value for answer generation downstream.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Instant;
use tracing::debug;

static DISALLOWED: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\w\s\-\.]").ok());
static WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\w+").ok());
static LEADING_QUESTION: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(what is|what are|define)\b").ok());

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is", "are", "was",
    "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will", "would", "could", "should",
    "may", "might", "can", "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "me", "him",
    "her", "us", "them",
];

const CONTRACTIONS: &[(&str, &str)] = &[
    ("don't", "do not"),
    ("won't", "will not"),
    ("can't", "cannot"),
    ("shouldn't", "should not"),
    ("wouldn't", "would not"),
    ("couldn't", "could not"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("wasn't", "was not"),
    ("weren't", "were not"),
];

const EXPANSIONS: &[(&str, &[&str])] = &[
    ("auth", &["authentication", "authorize", "login", "signin", "access"]),
    ("api", &["application programming interface", "endpoint", "service"]),
    ("db", &["database", "data store", "storage"]),
    ("vector", &["embedding", "semantic search", "similarity"]),
    ("ml", &["machine learning", "artificial intelligence", "ai"]),
    ("rag", &["retrieval augmented generation", "retrieval"]),
];

const QUESTION_WORDS: &[&str] = &["what", "how", "when", "where", "why", "who"];
const TECHNICAL_TERMS: &[&str] = &["api", "auth", "vector", "database", "config", "setup"];
const ACTION_WORDS: &[&str] = &["configure", "setup", "install", "create", "delete", "update"];
const PROCEDURE_TERMS: &[&str] = &["setup", "configure", "install", "create"];
const PROBLEM_TERMS: &[&str] = &["error", "problem", "issue", "fail"];

const KEY_TERM_LIMIT: usize = 10;
const MAX_VARIANTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Definition,
    Procedure,
    Comparison,
    Troubleshooting,
    Configuration,
    Policy,
    General,
}

impl QueryType {
    /// Classification table. Earlier rows win ties.
    const TABLE: [(QueryType, &'static [&'static str]); 6] = [
        (QueryType::Definition, &["what is", "define", "definition of", "meaning of"]),
        (QueryType::Procedure, &["how to", "steps to", "process for", "way to"]),
        (QueryType::Comparison, &["vs", "versus", "difference between", "compare"]),
        (QueryType::Troubleshooting, &["error", "problem", "issue", "fix", "solve"]),
        (QueryType::Configuration, &["setup", "configure", "install", "enable"]),
        (QueryType::Policy, &["policy", "rule", "guideline", "requirement"]),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Definition => "definition",
            QueryType::Procedure => "procedure",
            QueryType::Comparison => "comparison",
            QueryType::Troubleshooting => "troubleshooting",
            QueryType::Configuration => "configuration",
            QueryType::Policy => "policy",
            QueryType::General => "general",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub normalized: String,
    pub tokens: Vec<String>,
    pub key_terms: Vec<String>,
    pub query_type: QueryType,
    pub intent_score: f32,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate_percent: f64,
    pub cache_size: usize,
}

fn expansions_of(term: &str) -> &'static [&'static str] {
    EXPANSIONS.iter().find(|(k, _)| *k == term).map(|(_, v)| *v).unwrap_or(&[])
}

fn words(text: &str) -> Vec<&str> {
    WORD.as_ref().map_or_else(|| text.split_whitespace().collect(), |re| re.find_iter(text).map(|m| m.as_str()).collect())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, expand contractions, replace punctuation other than `-` and
/// `.` with spaces and collapse whitespace.
pub fn normalize_query(text: &str) -> String {
    let mut lowered = text.to_lowercase().replace('\u{2019}', "'");
    for (short, long) in CONTRACTIONS {
        lowered = lowered.replace(short, long);
    }
    let stripped = match DISALLOWED.as_ref() {
        Some(re) => re.replace_all(&lowered, " ").into_owned(),
        None => lowered,
    };
    collapse_whitespace(&stripped)
}

/// Word runs minus stop words and single characters.
pub fn query_tokens(normalized: &str) -> Vec<String> {
    words(normalized)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Unique tokens, longest first, each followed by its expansions.
pub fn key_terms(tokens: &[String]) -> Vec<String> {
    let mut unique: Vec<&str> = tokens.iter().map(String::as_str).collect::<HashSet<_>>().into_iter().collect();
    unique.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
    let mut terms = Vec::new();
    for t in unique {
        terms.push(t.to_string());
        terms.extend(expansions_of(t).iter().map(|e| (*e).to_string()));
    }
    terms.truncate(KEY_TERM_LIMIT);
    terms
}

/// Best matching type and its confidence. Patterns match on whole words.
pub fn classify(normalized: &str) -> (QueryType, f32) {
    let padded = format!(" {} ", words(normalized).join(" "));
    let mut best = (QueryType::General, 0.0_f32);
    for (kind, patterns) in QueryType::TABLE {
        let hits = patterns.iter().filter(|p| padded.contains(&format!(" {p} "))).count();
        let score = hits as f32 / patterns.len() as f32;
        if score > best.1 {
            best = (kind, score);
        }
    }
    match best {
        (QueryType::General, _) => (QueryType::General, 0.5),
        (kind, score) => (kind, (score * 2.0).min(1.0)),
    }
}

/// Title case: every cased run starts upper and continues lower.
fn is_title(word: &str) -> bool {
    let mut cased = false;
    let mut in_run = false;
    for c in word.chars() {
        if c.is_uppercase() {
            if in_run {
                return false;
            }
            in_run = true;
            cased = true;
        } else if c.is_lowercase() {
            if !in_run {
                return false;
            }
            cased = true;
        } else {
            in_run = false;
        }
    }
    cased
}

/// Fraction of five specificity signals present in the query.
pub fn intent_strength(raw: &str, tokens: &[String]) -> f32 {
    let has_any = |set: &[&str]| tokens.iter().any(|t| set.contains(&t.as_str()));
    let signals = [
        has_any(QUESTION_WORDS),
        has_any(TECHNICAL_TERMS),
        tokens.len() >= 3,
        has_any(ACTION_WORDS),
        raw.split_whitespace().any(is_title),
    ];
    signals.iter().filter(|s| **s).count() as f32 / signals.len() as f32
}

fn expanded_tokens(tokens: &[String]) -> Vec<String> {
    let extra = tokens.iter().flat_map(|t| expansions_of(t).iter().map(|e| (*e).to_string()));
    let mut out: Vec<String> = Vec::new();
    for term in tokens.iter().cloned().chain(extra) {
        if !out.contains(&term) {
            out.push(term);
        }
    }
    out
}

fn pick<'a>(tokens: &'a [String], set: &[&str]) -> Vec<&'a str> {
    tokens.iter().map(String::as_str).filter(|t| set.contains(t)).collect()
}

/// Query analysis with a bounded memo keyed on the raw query.
pub struct QueryProcessor {
    cache: Mutex<HashMap<String, ProcessedQuery>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryProcessor {
    fn default() -> Self {
        Self::new(500)
    }
}

impl QueryProcessor {
    /// Once `capacity` queries are memoized, new ones are computed but not kept.
    pub fn new(capacity: usize) -> Self {
        Self { cache: Mutex::new(HashMap::new()), capacity, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn process(&self, raw: &str) -> ProcessedQuery {
        let started = Instant::now();
        let key = blake3::hash(raw.as_bytes()).to_hex().to_string();
        if let Some(mut hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            hit.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            return hit;
        }

        let normalized = normalize_query(raw);
        let tokens = query_tokens(&normalized);
        let key_terms = key_terms(&tokens);
        let (query_type, confidence) = classify(&normalized);
        let intent_score = (confidence + intent_strength(raw, &tokens)) / 2.0;
        let processed = ProcessedQuery {
            original: raw.to_string(),
            normalized,
            tokens,
            key_terms,
            query_type,
            intent_score,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        debug!(query_type = %processed.query_type, intent = processed.intent_score, "processed query");

        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut c) = self.cache.lock() {
            if c.len() < self.capacity {
                c.insert(key, processed.clone());
            }
        }
        processed
    }

    /// The string handed to the indexes.
    pub fn optimize_for_retrieval(&self, q: &ProcessedQuery) -> String {
        let mut optimized = q.normalized.clone();
        match q.query_type {
            QueryType::Procedure => {
                let actions = pick(&q.tokens, PROCEDURE_TERMS);
                if !actions.is_empty() {
                    optimized = format!("{} {optimized}", actions.join(" "));
                }
            }
            QueryType::Definition => {
                if let Some(re) = LEADING_QUESTION.as_ref() {
                    optimized = re.replace_all(&optimized, "").into_owned();
                }
            }
            QueryType::Troubleshooting => {
                let problems = pick(&q.tokens, PROBLEM_TERMS);
                if !problems.is_empty() {
                    optimized = format!("{optimized} {}", problems.join(" "));
                }
            }
            _ => {}
        }
        if !q.key_terms.is_empty() {
            let top: Vec<&str> = q.key_terms.iter().take(3).map(String::as_str).collect();
            optimized = format!("{optimized} {}", top.join(" "));
        }
        collapse_whitespace(&optimized)
    }

    /// Up to three distinct rewrites of the query for cache warming.
    pub fn variants(&self, q: &ProcessedQuery) -> Vec<String> {
        let mut candidates = vec![q.normalized.clone()];
        let optimized = self.optimize_for_retrieval(q);
        if optimized != q.normalized {
            candidates.push(optimized);
        }
        if q.key_terms.len() >= 2 {
            candidates.push(q.key_terms.iter().take(4).cloned().collect::<Vec<_>>().join(" "));
        }
        let expanded = expanded_tokens(&q.tokens);
        if expanded.len() > q.tokens.len() {
            candidates.push(expanded.into_iter().take(6).collect::<Vec<_>>().join(" "));
        }
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|v| !v.trim().is_empty() && seen.insert(v.clone()))
            .take(MAX_VARIANTS)
            .collect()
    }

    pub fn stats(&self) -> QueryStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        QueryStats {
            cache_hits: hits,
            cache_misses: misses,
            hit_rate_percent: if total == 0 { 0.0 } else { (hits as f64 / total as f64 * 1000.0).round() / 10.0 },
            cache_size: self.cache.lock().map(|c| c.len()).unwrap_or(0),
        }
    }
}
