//! Patient name resolution
//!
//! Maps a name mentioned in a question ("Dr. john smith", "Smith") to a
//! patient id. The store does the case-insensitive partial match; candidates
//! are then re-ranked by Jaro-Winkler similarity so the closest name wins.

use crate::db::{PatientRecord, RecordStore};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strsim::jaro_winkler;
use tracing::{info, warn};

const TITLES: [&str; 11] = [
    "mr", "mrs", "ms", "miss", "dr", "prof", "professor", "sir", "madam", "lord", "lady",
];

/// A successful lookup; an empty resolution is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub patient: Option<PatientRecord>,
    pub score: Option<f64>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.patient.is_none()
    }

    /// `{"patient_id": id}` or nothing.
    pub fn resolved_ids(&self) -> BTreeMap<String, i64> {
        self.patient
            .iter()
            .map(|p| ("patient_id".to_string(), p.id))
            .collect()
    }
}

pub struct EntityResolver {
    candidate_limit: i64,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self { candidate_limit: 10 }
    }
}

impl EntityResolver {
    pub fn new(candidate_limit: i64) -> Self {
        Self {
            candidate_limit: candidate_limit.max(1),
        }
    }

    /// Trim, collapse whitespace and strip leading honorifics. Case and
    /// punctuation are kept so "O'Brien" still matches the stored name.
    pub fn lookup_name(name: &str) -> String {
        let mut words: Vec<&str> = name.split_whitespace().collect();
        while words.len() > 1 && Self::is_title(words[0]) {
            words.remove(0);
        }
        words.join(" ")
    }

    /// Lowercase, drop punctuation, collapse whitespace and strip leading
    /// honorifics. Used for ranking only.
    pub fn normalize_name(name: &str) -> String {
        let cleaned: String = name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        let mut words: Vec<&str> = cleaned.split_whitespace().collect();
        while words.len() > 1 && TITLES.contains(&words[0]) {
            words.remove(0);
        }
        words.join(" ")
    }

    fn is_title(word: &str) -> bool {
        TITLES.contains(&word.trim_end_matches('.').to_lowercase().as_str())
    }

    fn similarity(needle: &str, patient: &PatientRecord) -> f64 {
        [
            Self::normalize_name(&patient.full_name()),
            Self::normalize_name(&patient.first_name),
            Self::normalize_name(&patient.last_name),
        ]
        .iter()
        .map(|candidate| jaro_winkler(needle, candidate))
        .fold(0.0, f64::max)
    }

    /// Closest candidate by Jaro-Winkler. Candidates with equal scores keep
    /// the store's order, so an exact match on several patients returns the
    /// first one the store reports.
    pub async fn resolve(&self, store: &dyn RecordStore, entity: Option<&str>) -> Result<Resolution> {
        let lookup = match entity.map(Self::lookup_name) {
            Some(n) if !n.is_empty() => n,
            _ => return Ok(Resolution::default()),
        };
        let needle = Self::normalize_name(&lookup);

        let candidates = store.find_patients_by_name(&lookup, self.candidate_limit).await?;
        let mut scored: Vec<(f64, PatientRecord)> = candidates
            .into_iter()
            .map(|p| (Self::similarity(&needle, &p), p))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        match scored.into_iter().next() {
            Some((score, patient)) => {
                info!("Resolved '{}' to patient {} ({:.2})", lookup, patient.id, score);
                Ok(Resolution {
                    patient: Some(patient),
                    score: Some(score),
                })
            }
            None => {
                warn!("Could not resolve entity: {}", lookup);
                Ok(Resolution::default())
            }
        }
    }
}
