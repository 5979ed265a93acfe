//! Graph configuration.

use serde::{Deserialize, Serialize};

/// Switches for the graph's optional validation passes.
///
/// Both checks are on by default. Missing fields fall back to their defaults
/// when loading from JSON, so `{}` is a valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Check extent lifetime rules when extents are added and removed.
    pub validate_lifetimes: bool,

    /// Reject reads of resources a running behavior did not declare.
    pub validate_dependencies: bool,
}

impl GraphOptions {
    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            validate_lifetimes: true,
            validate_dependencies: true,
        }
    }
}
