//! Offline recipe snapshot model

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Offline copy of a favourited recipe.
///
/// The payload is whatever the backend returned for the recipe; the edge
/// never validates or reshapes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecipeRecord {
    /// Recipe id (unique key)
    pub id: String,
    /// Full recipe payload
    pub recipe: serde_json::Value,
    /// When the snapshot was written, milliseconds since epoch
    pub cached_at: i64,
}

impl CachedRecipeRecord {
    pub fn new(id: impl Into<String>, recipe: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            recipe,
            cached_at: Utc::now().timestamp_millis(),
        }
    }
}
