//! Database access for PostgreSQL
//!
//! Connection setup, raw SQL execution for the analytics cascade and the
//! patient/visit lookups used by the conversational pipeline.

pub mod connection;
pub mod executor;
pub mod records;

pub use connection::{init_pool, DbPool};
pub use executor::{PgExecutor, Row, SqlExecutor, StaticExecutor};
pub use records::{InMemoryRecordStore, PatientRecord, PgRecordStore, RecordStore, VisitQuery, VisitRecord};
