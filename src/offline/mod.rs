//! Client-side offline subsystem
//!
//! Reachability tracking and the favourites mirror that keeps recipes
//! available when the backend is not.

pub mod detector;
pub mod favourites;

pub use detector::{HealthProbe, HttpHealthProbe, OfflineDetector, OnlineState, ProbeOutcome};
pub use favourites::{FavouritesSync, ReconcileReport};
