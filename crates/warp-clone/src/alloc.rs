// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Virtual layer index allocator.
//!
//! Synthesized layer slots receive indices from a single monotone counter that
//! starts at a high base, so they never collide with the small physical
//! indices of the host graph. The most recent range allocation is the
//! *active* one and backs physical → virtual translation.

use crate::error::CloneError;

/// Default first virtual layer index.
pub const DEFAULT_VIRTUAL_LAYER_BASE: i32 = 0x10_0000;

/// Integer sentinel for hosts that store layer references as raw `i32`.
pub const INVALID_LAYER_INDEX: i32 = -1;

/// Half-open range `[start, start + len)` of virtual layer indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRange {
    /// First index of the range.
    pub start: i32,
    /// Number of indices in the range.
    pub len: i32,
}

impl LayerRange {
    /// One past the last index, saturating at `i32::MAX`.
    pub fn end(&self) -> i32 {
        self.start.saturating_add(self.len)
    }

    /// Returns `true` if `index` falls inside the range.
    pub fn contains(&self, index: i32) -> bool {
        index >= self.start && index < self.end()
    }
}

/// Monotone allocator for virtual layer indices.
///
/// # Invariants
/// - The free counter never decreases.
/// - Non-empty ranges are pairwise disjoint and their starts strictly increase.
/// - A zero-length range starts at the next free index without consuming it,
///   so its start equals the start of the following allocation. Starts are
///   therefore only non-decreasing across all ranges.
/// - `active.start + active.len` never overflows (checked at allocation).
#[derive(Debug, Clone)]
pub struct VirtualLayerAllocator {
    next: i32,
    active: LayerRange,
}

impl Default for VirtualLayerAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_LAYER_BASE)
    }
}

impl VirtualLayerAllocator {
    /// Creates an allocator whose first index is `base`.
    pub fn new(base: i32) -> Self {
        Self {
            next: base,
            active: LayerRange {
                start: base,
                len: 0,
            },
        }
    }

    /// Reserves `n` consecutive indices and makes them the active range.
    ///
    /// A zero-length request returns the next free index without consuming it;
    /// the active range becomes empty.
    ///
    /// # Errors
    /// [`CloneError::InvalidRangeLength`] for negative `n`,
    /// [`CloneError::AllocatorExhausted`] when the range would overflow `i32`.
    pub fn allocate_range(&mut self, n: i32) -> Result<i32, CloneError> {
        if n < 0 {
            return Err(CloneError::InvalidRangeLength(n));
        }
        let start = self.next;
        self.next = start
            .checked_add(n)
            .ok_or(CloneError::AllocatorExhausted)?;
        self.active = LayerRange { start, len: n };
        Ok(start)
    }

    /// Consumes a single fresh index without touching the active range.
    ///
    /// # Errors
    /// [`CloneError::AllocatorExhausted`] when the counter would overflow.
    pub fn allocate_single(&mut self) -> Result<i32, CloneError> {
        let index = self.next;
        self.next = index
            .checked_add(1)
            .ok_or(CloneError::AllocatorExhausted)?;
        Ok(index)
    }

    /// Maps a physical layer index onto the active range.
    ///
    /// Returns `None` unless `0 <= physical < active.len`.
    pub fn translate_physical_to_virtual(&self, physical: i32) -> Option<i32> {
        (0..self.active.len)
            .contains(&physical)
            .then(|| physical + self.active.start)
    }

    /// Like [`Self::translate_physical_to_virtual`] but yields
    /// [`INVALID_LAYER_INDEX`] instead of `None`.
    pub fn translate_or_invalid(&self, physical: i32) -> i32 {
        self.translate_physical_to_virtual(physical)
            .unwrap_or(INVALID_LAYER_INDEX)
    }

    /// The most recent range allocation.
    pub fn active_range(&self) -> LayerRange {
        self.active
    }

    /// The next index that would be handed out.
    pub fn next_free(&self) -> i32 {
        self.next
    }
}
