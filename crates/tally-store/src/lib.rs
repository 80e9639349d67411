//! [`RowStore`](tally_core::RowStore) backends: Postgres for the service, memory for tests and local runs.

pub mod memory;
pub mod pg;

pub use memory::InMemoryStore;
pub use pg::PgStore;
