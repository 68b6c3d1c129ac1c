//! Storage abstraction and implementations for learnpath.
//!
//! This crate provides the collaborator traits the progression engine is
//! built against, plus an in-memory backend and a JSON file backend.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;

pub use trait_::{
    ContentCatalog, EnrollmentDirectory, ProgressStore, ProgressTransaction, Result, StorageError,
};
pub use memory::MemoryStore;
#[cfg(feature = "json")]
pub use json_storage::JsonStorage;
