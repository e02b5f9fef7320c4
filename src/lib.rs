//! # Cocktail Edge
//!
//! Edge relay and offline-cache coordination layer for the cocktail recipe app.
//!
//! ## Features
//!
//! - Per-request reverse proxy to the recipe backend with header policy
//! - Liveness relay and an online/offline detector driven by it
//! - SQLite-backed offline copies of favourited recipes
//! - Cache worker with versioned shell caches and a share-target mailbox
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Pages (browser / host UI)               │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Edge server (hyper)                   │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────────────┐    │
//! │  │ EdgeProxy│  │ Health   │  │ CacheWorker          │    │
//! │  │ /api/*   │  │ Proxy    │  │ shell cache, mailbox │    │
//! │  └────┬─────┘  └────┬─────┘  └──────────────────────┘    │
//! │       └──────┬──────┘                                    │
//! │          reqwest ──► backend origin                      │
//! │  ┌──────────────────┐  ┌──────────────────────────┐      │
//! │  │ OfflineDetector  │  │ FavouritesSync ► SQLite  │      │
//! │  └──────────────────┘  └──────────────────────────┘      │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod models;
pub mod offline;
pub mod proxy;
pub mod storage;
pub mod worker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
