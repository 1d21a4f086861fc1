//! Typed stage handles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ARENA: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh arena token. Every graph builder owns exactly one.
pub(crate) fn next_arena_token() -> u64 {
    NEXT_ARENA.fetch_add(1, Ordering::Relaxed)
}

/// Handle to a stage inside one graph arena.
///
/// Handles are only issued by [`GraphBuilder::add_stage`](crate::pipeline::GraphBuilder::add_stage)
/// and carry the token of the arena that issued them, so a handle from one
/// graph cannot silently address a stage of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId {
    arena: u64,
    index: usize,
}

impl StageId {
    pub(crate) const fn new(arena: u64, index: usize) -> Self {
        Self { arena, index }
    }

    /// Position of the stage in its graph, in insertion order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }

    pub(crate) const fn arena(self) -> u64 {
        self.arena
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}
