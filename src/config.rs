//! Configuration for the document replicator.
//!
//! Configuration is passed to [`Replicator::new()`](crate::Replicator::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use doc_replicator::config::{ReplicationConfig, BatchSettings};
//!
//! let config = ReplicationConfig {
//!     local_replica_id: "replica-1".into(),
//!     batch: BatchSettings { max_concurrent_documents: 16 },
//!     ..Default::default()
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── local_replica_id: String      # This replica's unique ID
//! ├── batch: BatchSettings          # Per-batch fan-out
//! ├── retry: RetrySettings          # Backoff for unavailable stores
//! ├── checkpoint: CheckpointConfig  # History retention
//! └── store: StoreConfig            # SQLite persistence
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_replica_id: "archive.replica-1"
//!
//! batch:
//!   max_concurrent_documents: 32
//!
//! retry:
//!   max_attempts: 5
//!   initial_delay: "100ms"
//!   max_delay: "5s"
//!
//! store:
//!   sqlite_path: "/var/lib/app/replica.db"
//! ```

use crate::resilience::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to Replicator::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Replicator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// The identity of the local (destination) replica.
    /// Only used to tag log events.
    pub local_replica_id: String,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// SQLite persistence settings, used by [`SqliteStore`](crate::SqliteStore).
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_replica_id: "local.dev.replica.default".to_string(),
            batch: BatchSettings::default(),
            retry: RetrySettings::default(),
            checkpoint: CheckpointConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(local_replica_id: &str) -> Self {
        Self {
            local_replica_id: local_replica_id.to_string(),
            batch: BatchSettings { max_concurrent_documents: 4 },
            retry: RetrySettings::testing(),
            checkpoint: CheckpointConfig::default(),
            store: StoreConfig::in_memory(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BatchSettings: per-batch concurrency
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Maximum documents merged concurrently within one batch.
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
}

fn default_max_concurrent_documents() -> usize {
    64
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_documents: default_max_concurrent_documents(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RetrySettings: backoff for StoreUnavailable
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry policy for documents whose store calls fail with `Unavailable`.
///
/// Delays are humantime strings ("100ms", "5s", "1m").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per document, the first included. `1` disables retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> usize {
    5
}

fn default_initial_delay() -> String {
    "100ms".to_string()
}

fn default_max_delay() -> String {
    "5s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetrySettings {
    /// Millisecond delays, three attempts.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: "1ms".to_string(),
            max_delay: "10ms".to_string(),
            backoff_factor: 2.0,
        }
    }

    /// Parse the initial_delay string to a Duration.
    pub fn initial_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.initial_delay).unwrap_or(Duration::from_millis(100))
    }

    /// Parse the max_delay string to a Duration.
    pub fn max_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.max_delay).unwrap_or(Duration::from_secs(5))
    }

    /// Build the runtime retry policy.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: self.initial_delay_duration(),
            max_delay: self.max_delay_duration(),
            backoff_factor: if self.backoff_factor >= 1.0 {
                self.backoff_factor
            } else {
                1.0
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CheckpointConfig
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// History entries kept per source after a commit (most recent first).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    5
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: SQLite persistence
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database holding checkpoints, meta records and bodies.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "replica.db".to_string(),
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
