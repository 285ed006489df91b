//! Database module for PostgreSQL connection and operations
//!
//! Persistence for requests and ingested workspace metadata. Tenant
//! databases are never reached through this pool.

pub mod connection;
pub mod metadata_repo;
pub mod request_repo;

pub use connection::{init_pool, DbPool};
pub use metadata_repo::MetadataRepository;
pub use request_repo::PgRequestStore;
