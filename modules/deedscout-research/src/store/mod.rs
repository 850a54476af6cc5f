//! `JobStore` implementations: in-memory, and a Postgres JSONB mirror.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
