// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for clone sessions.
use thiserror::Error;

use crate::ident::SourceKey;

/// Errors emitted while cloning.
///
/// Clone functions supplied by callers may return any variant; the session
/// propagates them unmodified.
#[derive(Debug, Error)]
pub enum CloneError {
    /// A lookup required a source node but none was supplied, or no clone has
    /// been registered for it.
    #[error("missing source key")]
    MissingKey,
    /// A single-phase clone function re-entered its own source through a cycle.
    ///
    /// Kinds that participate in cycles must be cloned through
    /// [`crate::CloneSession::resolve_cyclic`] or [`crate::CloneKind`].
    #[error("cycle through {0} requires a two-phase clone")]
    CycleWithoutShell(SourceKey),
    /// The clone registered for a key has a different type than requested, or
    /// a clone kind was handed a node of another kind.
    #[error("clone kind mismatch for {0}")]
    KindMismatch(SourceKey),
    /// The virtual layer index space overflowed.
    #[error("virtual layer index space exhausted")]
    AllocatorExhausted,
    /// A range allocation was requested with a negative length.
    #[error("invalid virtual layer range length: {0}")]
    InvalidRangeLength(i32),
    /// A source arena has handed out every `u32` handle.
    #[error("source arena is full")]
    ArenaFull,
    /// A clone function rejected its source node.
    #[error("failed to clone {key}: {reason}")]
    Node {
        /// Node that failed to clone.
        key: SourceKey,
        /// Human-readable cause.
        reason: String,
    },
}

impl CloneError {
    /// Shorthand for [`CloneError::Node`].
    pub fn node(key: SourceKey, reason: impl Into<String>) -> Self {
        Self::Node {
            key,
            reason: reason.into(),
        }
    }
}

/// Errors produced when validating a [`crate::SessionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The virtual layer base would overlap physical layer indices.
    #[error("virtual layer base {base:#x} is below the reserved minimum {min:#x}")]
    BaseTooLow {
        /// Requested base.
        base: i32,
        /// Smallest accepted base.
        min: i32,
    },
}
