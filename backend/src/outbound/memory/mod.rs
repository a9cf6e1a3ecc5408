//! In-process adapters for single-node deployments and tests.
//!
//! State lives behind `std::sync` locks that are never held across an await.
//! Everything is lost on restart; use the PostgreSQL adapters when durability
//! matters.

mod chat_history;
mod token_epochs;
mod venues;
mod visitor_sessions;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use chat_history::InMemoryChatHistoryStore;
pub use token_epochs::InMemoryTokenEpochRepository;
pub use venues::{InMemoryVenueDirectory, VenueSeedError};
pub use visitor_sessions::InMemoryVisitorSessionRepository;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
