// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! warp-clone: identity-preserving cloning of animator source graphs.
//!
//! A [`CloneSession`] turns a directed, shared, possibly cyclic graph of
//! source nodes (controller → layers → state machines → states/transitions →
//! motions/clips) into an isomorphic graph of mutable virtual clones. Every
//! source node is cloned once; every further reference to it resolves to the
//! same clone handle.
//!
//! The session provides four services to node-kind clone functions:
//!
//! - memoized resolution ([`CloneSession::resolve`],
//!   [`CloneSession::resolve_cyclic`], [`CloneSession::resolve_kind`]),
//! - deferred actions drained when the outermost clone call unwinds
//!   ([`CloneSession::enqueue`]),
//! - scoped leaf substitution ([`CloneSession::push_scope`],
//!   [`CloneSession::apply_all`]),
//! - virtual layer index allocation ([`CloneSession::allocate_range`],
//!   [`CloneSession::translate_physical_to_virtual`]).
#![forbid(unsafe_code)]

mod alloc;
mod config;
/// Demo animator vocabulary exercising the engine end to end.
pub mod demo;
mod error;
mod ident;
mod identity;
mod kind;
mod scheduler;
mod session;
mod substitution;

/// Virtual layer allocation.
pub use alloc::{
    LayerRange, VirtualLayerAllocator, DEFAULT_VIRTUAL_LAYER_BASE, INVALID_LAYER_INDEX,
};
/// Session configuration.
pub use config::{SessionConfig, MIN_VIRTUAL_LAYER_BASE};
/// Error types.
pub use error::{CloneError, ConfigError};
/// Source identity types.
pub use ident::{NodeKind, SourceHandle, SourceKey, SourceNode};
/// Per-kind clone dispatch.
pub use kind::CloneKind;
/// Deferred-action types.
pub use scheduler::{DeferredFn, DrainReport};
/// Clone session and its scope guard.
pub use session::{CloneSession, SubstitutionScope};
/// Leaf substitution.
pub use substitution::{Substitution, SubstitutionRef, SubstitutionStack, UnbalancedScope};
