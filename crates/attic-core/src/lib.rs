//! # attic-core
//!
//! Core types, traits, and abstractions for the attic attachment store.
//!
//! This crate provides the domain model, error type, per-file locks, and the
//! collaborator traits that the storage crate builds on.

pub mod completion;
pub mod config;
pub mod content;
pub mod defaults;
pub mod error;
pub mod lock;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use completion::{CompletionQueue, TransactionCompletion};
pub use config::StoreConfig;
pub use content::FileContent;
pub use error::{Error, Result};
pub use lock::{FileLock, LockRegistry};
pub use models::*;
pub use traits::*;
