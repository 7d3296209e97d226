//! Cortex library crate
//!
//! Hybrid game recommendation engine. Re-exports core modules for the
//! binary, integration tests and external use.

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod recommendation;
pub mod store;

// Re-export commonly used types
pub use config::{Config, EngineConfig};
pub use error::{Error, Result};
pub use model::{Item, ItemId, Rating, Role, User, UserId};
pub use recommendation::*;
pub use store::{Dataset, InMemoryStore, InteractionStore};
