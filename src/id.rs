//! Statement identity.
//!
//! Every statement is identified by a [`StatementId`], which also names the
//! variable the statement introduces into terms. The [`AtomicIdAllocator`]
//! provides thread-safe, monotonically increasing IDs, so creation order can
//! be recovered from IDs alone.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ProofResult};

/// Unique, niche-optimized identifier for a statement.
///
/// Uses `NonZeroU64` so that `Option<StatementId>` is the same size as
/// `StatementId`; root contexts store `None` as their owning context at no cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StatementId(NonZeroU64);

impl StatementId {
    /// Create a `StatementId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(StatementId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for StatementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "st:{}", self.0)
    }
}

/// Thread-safe statement ID allocator.
///
/// Produces monotonically increasing IDs starting from 1. Shared by every
/// transaction of an engine session.
#[derive(Debug)]
pub struct AtomicIdAllocator {
    next: AtomicU64,
}

impl AtomicIdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given ID.
    ///
    /// Used when restoring a session from the durable tier.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next statement ID.
    pub fn next_id(&self) -> ProofResult<StatementId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        StatementId::new(raw).ok_or_else(|| {
            EngineError::Inconsistent {
                message: "statement id space exhausted".into(),
            }
            .into()
        })
    }

    /// Make sure future allocations never return `id` or anything below it.
    pub fn reserve_through(&self, id: StatementId) {
        self.next.fetch_max(id.get() + 1, Ordering::Relaxed);
    }

    /// Return the next ID that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AtomicIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<StatementId>>(),
            std::mem::size_of::<StatementId>()
        );
    }

    #[test]
    fn statement_id_zero_is_none() {
        assert!(StatementId::new(0).is_none());
        assert_eq!(StatementId::new(42).unwrap().get(), 42);
    }

    #[test]
    fn allocator_produces_sequential_ids() {
        let alloc = AtomicIdAllocator::new();
        assert_eq!(alloc.next_id().unwrap().get(), 1);
        assert_eq!(alloc.next_id().unwrap().get(), 2);
        assert_eq!(alloc.next_id().unwrap().get(), 3);
    }

    #[test]
    fn reserve_through_skips_restored_ids() {
        let alloc = AtomicIdAllocator::new();
        alloc.reserve_through(StatementId::new(41).unwrap());
        assert_eq!(alloc.next_id().unwrap().get(), 42);

        // Reserving below the cursor never moves it backwards.
        alloc.reserve_through(StatementId::new(3).unwrap());
        assert_eq!(alloc.peek_next(), 43);
    }

    #[test]
    fn allocator_starting_from() {
        let alloc = AtomicIdAllocator::starting_from(100);
        assert_eq!(alloc.next_id().unwrap().get(), 100);
    }

    #[test]
    fn statement_id_display() {
        assert_eq!(StatementId::new(7).unwrap().to_string(), "st:7");
    }
}
