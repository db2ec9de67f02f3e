// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Source identity: node kinds, arena handles, and the [`SourceNode`] seam.
//!
//! Memoization is keyed by identity, never by value. Host graphs assign every
//! node a [`SourceHandle`] when the node is inserted into their arena; two
//! structurally identical nodes therefore still carry distinct keys.

use core::fmt;

/// Closed set of node kinds that make up an animator source graph.
///
/// Every kind has exactly one clone function (see [`crate::CloneKind`]); the
/// session dispatches through the variant rather than through open-ended
/// dynamic dispatch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Root controller owning an ordered list of layers.
    Controller,
    /// A layer slot of a controller.
    Layer,
    /// State machine owning states, child machines and entry transitions.
    StateMachine,
    /// A single state.
    State,
    /// Transition leaving a state (or the any-state).
    StateTransition,
    /// Entry transition of a state machine.
    Transition,
    /// Composite motion (blend tree) over clips or other motions.
    Motion,
    /// Leaf payload clip. The only kind subject to substitution.
    Clip,
}

impl NodeKind {
    /// Short lowercase label used in logs and span fields.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Layer => "layer",
            Self::StateMachine => "state_machine",
            Self::State => "state",
            Self::StateTransition => "state_transition",
            Self::Transition => "transition",
            Self::Motion => "motion",
            Self::Clip => "clip",
        }
    }

    /// Returns `true` for leaf payload kinds (substitution applies to these).
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Clip)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stable arena index of a source node, assigned by the host graph.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceHandle(u32);

impl SourceHandle {
    /// Constructs a handle from its raw arena index.
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw arena index.
    pub const fn value(self) -> u32 {
        self.0
    }
}

/// Identity key of a source node: its kind plus its arena handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceKey {
    /// Kind of the node.
    pub kind: NodeKind,
    /// Arena handle within the host graph.
    pub handle: SourceHandle,
}

impl SourceKey {
    /// Builds a key from a kind and a raw arena index.
    pub const fn new(kind: NodeKind, raw: u32) -> Self {
        Self {
            kind,
            handle: SourceHandle::from_raw(raw),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.handle.value())
    }
}

/// Anything that can be cloned by a session must expose a stable identity.
///
/// Implementations must return the same key for the lifetime of the session
/// and distinct keys for distinct nodes, regardless of their contents.
pub trait SourceNode {
    /// Identity of this node.
    fn source_key(&self) -> SourceKey;
}

impl SourceNode for SourceKey {
    fn source_key(&self) -> SourceKey {
        *self
    }
}

impl<T: SourceNode + ?Sized> SourceNode for &T {
    fn source_key(&self) -> SourceKey {
        (**self).source_key()
    }
}
