use std::time::Duration;

use keep_schema::MigrationPolicy;
use serde::{Deserialize, Serialize};

/// Durability of committed transactions (`PRAGMA synchronous`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// `fsync` at every commit (safest).
    #[default]
    Full,
    /// `fsync` at critical moments only.
    Normal,
    /// Leave flushing to the OS (fastest, least durable).
    Off,
}

impl SyncMode {
    pub(crate) fn as_pragma(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
            Self::Off => "OFF",
        }
    }
}

/// Configuration for [`Store`](crate::Store).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long to wait for another handle's lock before failing with
    /// `Locked`. Zero fails immediately.
    pub busy_timeout: Duration,
    pub synchronous: SyncMode,
    pub migration: MigrationPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::ZERO,
            synchronous: SyncMode::default(),
            migration: MigrationPolicy::default(),
        }
    }
}
