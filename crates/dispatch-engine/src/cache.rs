use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use dispatch_core::{ModelTier, SuggestedAction};

use crate::error::CacheWriteError;

/// Words that do not change what is being asked.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "please", "pls", "kindly", "can", "could", "would", "you", "tell", "me",
    "us", "i", "just", "hey", "hi", "hello", "quick", "quickly", "question",
];

/// Contractions expanded before filler removal so "what's" and "what is"
/// produce the same key.
const CONTRACTIONS: &[(&str, &str)] = &[
    ("what's", "what is"),
    ("whats", "what is"),
    ("how's", "how is"),
    ("where's", "where is"),
    ("who's", "who is"),
    ("it's", "it is"),
    ("there's", "there is"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("don't", "do not"),
    ("doesn't", "does not"),
];

/// Cache key for a question asked on a page: `page::normalized question`.
///
/// Pure: the same inputs always produce the same key. Case, punctuation,
/// spacing and filler words are ignored; page paths ignore case and a
/// trailing slash.
pub fn normalize(question: &str, page: &str) -> String {
    format!("{}::{}", normalize_page(page), normalize_question(question))
}

/// [`normalize`], or `None` when nothing but filler remains of the
/// question. Such questions ("hi", "please") are never cached: they would
/// all share one key per page.
pub fn cache_key(question: &str, page: &str) -> Option<String> {
    let question = normalize_question(question);
    if question.is_empty() {
        return None;
    }
    Some(format!("{}::{question}", normalize_page(page)))
}

fn normalize_page(page: &str) -> String {
    let page = page.trim().to_lowercase();
    let page = page.trim_end_matches('/');
    if page.is_empty() {
        "/".to_string()
    } else {
        page.to_string()
    }
}

fn normalize_question(question: &str) -> String {
    let lowered = question.to_lowercase().replace('\u{2019}', "'");
    let mut words: Vec<&str> = Vec::new();
    for raw in lowered.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        match CONTRACTIONS.iter().find(|(short, _)| *short == token) {
            Some((_, long)) => words.extend(long.split(' ')),
            None => words.push(token),
        }
    }

    let mut out = String::new();
    for word in words {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.is_empty() || FILLER_WORDS.contains(&cleaned.as_str()) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cleaned);
    }
    out
}

/// A previously generated answer. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub query_key: String,
    pub tier: ModelTier,
    /// Answer text with annotation markers removed.
    pub response_text: String,
    pub suggestions: Vec<String>,
    pub actions: Vec<SuggestedAction>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub created_at: DateTime<Utc>,
}

/// Key-value store of answers. A `put` for an existing key replaces the
/// entry.
pub trait ResponseCache: Send + Sync {
    fn get(&self, query_key: &str) -> Option<CacheEntry>;

    fn put(&self, entry: CacheEntry) -> Result<(), CacheWriteError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local cache. Entries never expire.
#[derive(Default)]
pub struct MemoryResponseCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseCache for MemoryResponseCache {
    fn get(&self, query_key: &str) -> Option<CacheEntry> {
        self.entries.get(query_key).map(|e| e.value().clone())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheWriteError> {
        if entry.query_key.is_empty() {
            return Err(CacheWriteError("empty cache key".into()));
        }
        self.entries.insert(entry.query_key.clone(), entry);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
