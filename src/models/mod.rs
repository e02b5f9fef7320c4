//! Data models for the edge layer
//!
//! These models are shared between the relay, the offline subsystem and the
//! cache worker.

pub mod exchange;
pub mod message;
pub mod recipe;

pub use exchange::*;
pub use message::*;
pub use recipe::*;
