//! Durable repository implementations.

pub mod postgres;

pub use postgres::PostgresStores;
