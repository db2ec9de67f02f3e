// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-kind clone dispatch.
use crate::error::CloneError;
use crate::ident::{NodeKind, SourceNode};
use crate::session::CloneSession;

/// Clone function for one [`NodeKind`] variant.
///
/// Cloning happens in two phases so that cycles terminate:
///
/// 1. [`CloneKind::instantiate`] builds an empty shell from the source's own
///    fields. It must not touch the session.
/// 2. The session registers the shell under the source's key, then calls
///    [`CloneKind::populate`], which resolves every child reference through
///    the session.
///
/// A descendant that refers back to the source receives the registered shell
/// while the shell is still being populated. Implementations that participate
/// in cycles must therefore tolerate observing a partially populated clone
/// (or postpone such reads with [`CloneSession::enqueue`]).
///
/// Every nested reference to another graph node must go through the session;
/// constructing a child clone directly bypasses memoization.
pub trait CloneKind {
    /// Variant this clone function handles.
    const KIND: NodeKind;
    /// Source node type.
    type Source: SourceNode;
    /// Shared clone handle handed back to callers.
    type Output: Clone + 'static;

    /// Builds the unpopulated clone.
    fn instantiate(&self, source: &Self::Source) -> Result<Self::Output, CloneError>;

    /// Fills in the clone's references to other nodes.
    fn populate(
        &self,
        session: &mut CloneSession,
        source: &Self::Source,
        clone: &Self::Output,
    ) -> Result<(), CloneError>;
}
