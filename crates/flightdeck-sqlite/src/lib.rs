//! SQLite run store for flightdeck.
//!
//! Run records are kept as JSON payloads keyed by run id; the primary key
//! makes duplicate submissions collapse into one run.

mod schema;
mod store;

pub use store::SqliteRunStore;
