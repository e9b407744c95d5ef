//! Storage for consent history and materialized statuses.
//!
//! Traits define the contract; [`memory`] provides thread-safe in-memory
//! backends for embedded use and tests.

pub mod memory;
mod traits;

pub use memory::{InMemoryConsentStore, InMemoryStatusStore, InMemoryStores};
pub use traits::{
    ConsentSnapshot, ConsentStatusStore, ConsentStore, Invalidation, StatusWrite, StorageError,
};
