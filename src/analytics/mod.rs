//! Analytics question answering
//!
//! Turns a free-text analytics question into a validated read-only query and
//! its rows, preferring cached and templated SQL over model calls.

pub mod cache;
pub mod cascade;
pub mod safety;
pub mod schema;
pub mod templates;

pub use cache::{CacheEntry, CacheStats, QueryCache};
pub use cascade::{AnalyticsAnswer, AnalyticsFailure, AnalyticsOutcome, CascadeStats, QueryCascade, SqlSource};
pub use safety::{is_read_only, validate_read_only};
pub use templates::{QueryTemplate, TemplateMatch, TemplateMatcher};
