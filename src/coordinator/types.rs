//! Replicator state types.
//!
//! # State Transitions
//!
//! ```text
//!   new()            shutdown()              (batches drained)
//! ────────▶ Ready ──────────────▶ ShuttingDown ─────────────────▶ Stopped
//! ```
//!
//! - **Ready**: accepting cursor resolution, batches, bodies and commits.
//! - **ShuttingDown**: `shutdown()` called. Running batches stop dispatching new
//!   documents; documents already in flight finish.
//! - **Stopped**: store closed. Every operation returns `Shutdown`.

/// State of the replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    /// Accepting work.
    Ready,

    /// Draining in-flight documents.
    ShuttingDown,

    /// Shut down cleanly. Safe to drop.
    Stopped,
}

impl ReplicatorState {
    /// Whether new operations are accepted.
    pub fn accepts_work(&self) -> bool {
        matches!(self, ReplicatorState::Ready)
    }
}

impl std::fmt::Display for ReplicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicatorState::Ready => write!(f, "Ready"),
            ReplicatorState::ShuttingDown => write!(f, "ShuttingDown"),
            ReplicatorState::Stopped => write!(f, "Stopped"),
        }
    }
}
