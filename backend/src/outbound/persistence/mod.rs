//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Repositories here are thin: they translate between Diesel row structs and
//! domain types and map driver failures onto port errors. Row structs
//! (`models.rs`) and table definitions (`schema.rs`) never leave this module.
//!
//! ```ignore
//! use venue_gateway::outbound::persistence::{DbPool, DieselTokenEpochRepository, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/venues")).await?;
//! let epochs = DieselTokenEpochRepository::new(pool);
//! ```

mod diesel_basic_error_mapping;
mod diesel_chat_history_store;
mod diesel_token_epoch_repository;
mod diesel_venue_directory;
mod diesel_visitor_session_repository;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_chat_history_store::DieselChatHistoryStore;
pub use diesel_token_epoch_repository::DieselTokenEpochRepository;
pub use diesel_venue_directory::DieselVenueDirectory;
pub use diesel_visitor_session_repository::DieselVisitorSessionRepository;
pub use migrations::{MIGRATIONS, MigrationError, run_pending_migrations};
pub use pool::{DbPool, PoolConfig, PoolError};
