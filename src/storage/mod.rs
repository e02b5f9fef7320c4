//! Client-local persistent storage
//!
//! Durability is best-effort and entirely local; nothing here is written back
//! to the backend.

mod recipe_store;

pub use recipe_store::OfflineStore;
