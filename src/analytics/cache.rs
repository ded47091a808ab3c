//! Process-wide question → SQL cache
//!
//! Keys are SHA-256 digests of the normalized question (lowercased, all
//! whitespace removed), so "How many patients?" and "how  many patients ?"
//! share an entry. Expired entries are evicted lazily on read, or in bulk by
//! [`QueryCache::purge_expired`].

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

const TOP_QUERIES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub question: String,
    pub sql: String,
    pub inserted_at: DateTime<Utc>,
    pub hits: u64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularQuery {
    pub question: String,
    pub hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_hits: u64,
    /// hits / (hits + entries)
    pub hit_rate: f64,
    pub top_queries: Vec<PopularQuery>,
}

pub fn normalize_question(question: &str) -> String {
    question.to_lowercase().split_whitespace().collect()
}

pub fn cache_key(question: &str) -> String {
    format!("{:x}", Sha256::digest(normalize_question(question).as_bytes()))
}

pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, question: &str) -> Option<String> {
        self.get_at(question, Utc::now())
    }

    /// Lookup as of `now`. A hit bumps the entry's hit count under the shard
    /// lock, so concurrent readers never lose an increment.
    pub fn get_at(&self, question: &str, now: DateTime<Utc>) -> Option<String> {
        let key = cache_key(question);
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if now - entry.inserted_at <= self.ttl {
                entry.hits += 1;
                entry.last_accessed = now;
                return Some(entry.sql.clone());
            }
        } else {
            return None;
        }

        let ttl = self.ttl;
        if self
            .entries
            .remove_if(&key, |_, entry| now - entry.inserted_at > ttl)
            .is_some()
        {
            debug!("Evicted expired cache entry for: {}", question);
        }
        None
    }

    pub fn set(&self, question: &str, sql: &str) {
        self.set_at(question, sql, Utc::now());
    }

    /// Insert or overwrite with zero hits.
    pub fn set_at(&self, question: &str, sql: &str, now: DateTime<Utc>) {
        self.entries.insert(
            cache_key(question),
            CacheEntry {
                question: question.to_string(),
                sql: sql.to_string(),
                inserted_at: now,
                hits: 0,
                last_accessed: now,
            },
        );
    }

    pub fn remove(&self, question: &str) -> Option<CacheEntry> {
        self.entries.remove(&cache_key(question)).map(|(_, entry)| entry)
    }

    /// Drop every entry older than the TTL; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.inserted_at <= ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        let total_entries = entries.len();
        let total_hits: u64 = entries.iter().map(|e| e.hits).sum();

        // DashMap iteration order is arbitrary; break ties deterministically.
        entries.sort_by(|a, b| {
            b.hits
                .cmp(&a.hits)
                .then(a.inserted_at.cmp(&b.inserted_at))
                .then_with(|| a.question.cmp(&b.question))
        });

        CacheStats {
            total_entries,
            total_hits,
            hit_rate: total_hits as f64 / (total_hits + total_entries as u64).max(1) as f64,
            top_queries: entries
                .into_iter()
                .take(TOP_QUERIES)
                .map(|e| PopularQuery {
                    question: e.question,
                    hits: e.hits,
                })
                .collect(),
        }
    }
}
