use serde::{Deserialize, Serialize};

/// Storage management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Enable periodic age-based pruning
    #[serde(default = "default_cleanup_enabled")]
    pub cleanup_enabled: bool,
    /// Delete segments older than this many days
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Used fraction that triggers an emergency prune
    #[serde(default = "default_emergency_used_fraction")]
    pub emergency_used_fraction: f64,
    /// Used fraction the emergency prune drives down to
    #[serde(default = "default_emergency_target_fraction")]
    pub emergency_target_fraction: f64,
}

fn default_cleanup_enabled() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    30
}

fn default_emergency_used_fraction() -> f64 {
    0.95
}

fn default_emergency_target_fraction() -> f64 {
    0.85
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: default_cleanup_enabled(),
            max_age_days: default_max_age_days(),
            emergency_used_fraction: default_emergency_used_fraction(),
            emergency_target_fraction: default_emergency_target_fraction(),
        }
    }
}
