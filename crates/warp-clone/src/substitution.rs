// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scoped substitution of leaf payload nodes.
//!
//! An override (for example, an override controller remapping clips) is
//! pushed for the duration of a scope. Cloning a leaf consults every active
//! override, oldest first, so the innermost scope has the final say.
//!
//! # Scope discipline
//!
//! Scopes are only opened through [`crate::CloneSession::push_scope`] or
//! [`crate::CloneSession::with_scope`]; there is no raw pop. Releasing a scope
//! with the stack at an unexpected depth is a programmer error and panics
//! with an [`UnbalancedScope`] payload via [`std::panic::panic_any`]; the
//! stack is never silently repaired.

use std::rc::Rc;

use crate::ident::SourceKey;

/// Transform applied to leaf payload keys while its scope is active.
pub trait Substitution {
    /// Returns the leaf to use in place of `leaf` (possibly `leaf` itself).
    fn substitute(&self, leaf: SourceKey) -> SourceKey;
}

impl<F> Substitution for F
where
    F: Fn(SourceKey) -> SourceKey,
{
    fn substitute(&self, leaf: SourceKey) -> SourceKey {
        self(leaf)
    }
}

/// Shared handle to a substitution. Snapshots copy handles, not transforms.
pub type SubstitutionRef = Rc<dyn Substitution>;

/// Panic payload raised when a scope is released out of nesting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnbalancedScope {
    /// Depth the releasing scope expected to find.
    pub expected_depth: usize,
    /// Depth actually found.
    pub found_depth: usize,
}

/// Ordered stack of active substitutions, innermost last.
#[derive(Clone, Default)]
pub struct SubstitutionStack {
    frames: Vec<SubstitutionRef>,
}

impl SubstitutionStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` when no scope is active.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Applies every active substitution to `leaf`, oldest first.
    pub fn apply_all(&self, leaf: SourceKey) -> SourceKey {
        self.frames
            .iter()
            .fold(leaf, |current, frame| frame.substitute(current))
    }

    /// By-value copy of the current stack.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Pushes `frame` and returns the depth to restore on release.
    pub(crate) fn push(&mut self, frame: SubstitutionRef) -> usize {
        let mark = self.frames.len();
        self.frames.push(frame);
        mark
    }

    /// Pops the frame pushed at `mark`.
    ///
    /// # Panics
    /// With an [`UnbalancedScope`] payload if the stack is not exactly one
    /// frame deeper than `mark`. While already unwinding the stack is
    /// truncated instead, to avoid a double panic.
    pub(crate) fn release(&mut self, mark: usize) {
        let expected_depth = mark + 1;
        if self.frames.len() != expected_depth {
            if std::thread::panicking() {
                self.frames.truncate(mark);
                return;
            }
            std::panic::panic_any(UnbalancedScope {
                expected_depth,
                found_depth: self.frames.len(),
            });
        }
        self.frames.truncate(mark);
    }
}

impl std::fmt::Debug for SubstitutionStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubstitutionStack")
            .field("depth", &self.frames.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ident::NodeKind;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn clip(raw: u32) -> SourceKey {
        SourceKey::new(NodeKind::Clip, raw)
    }

    fn remap(from: u32, to: u32) -> SubstitutionRef {
        Rc::new(move |leaf: SourceKey| if leaf == clip(from) { clip(to) } else { leaf })
    }

    #[test]
    fn innermost_scope_applies_last() {
        let mut stack = SubstitutionStack::new();
        let outer = stack.push(remap(1, 2));
        let inner = stack.push(remap(2, 3));
        assert_eq!(stack.apply_all(clip(1)), clip(3));
        stack.release(inner);
        assert_eq!(stack.apply_all(clip(1)), clip(2));
        stack.release(outer);
        assert_eq!(stack.apply_all(clip(1)), clip(1));
    }

    #[test]
    fn snapshot_is_detached() {
        let mut stack = SubstitutionStack::new();
        let mark = stack.push(remap(1, 2));
        let snap = stack.snapshot();
        stack.release(mark);
        assert!(stack.is_empty());
        assert_eq!(snap.depth(), 1);
        assert_eq!(snap.apply_all(clip(1)), clip(2));
    }

    #[test]
    fn out_of_order_release_panics_with_payload() {
        let mut stack = SubstitutionStack::new();
        let outer = stack.push(remap(1, 2));
        let _inner = stack.push(remap(2, 3));
        let err = catch_unwind(AssertUnwindSafe(|| stack.release(outer)))
            .expect_err("release must panic");
        let payload = err
            .downcast_ref::<UnbalancedScope>()
            .expect("payload must be UnbalancedScope");
        assert_eq!(
            *payload,
            UnbalancedScope {
                expected_depth: 1,
                found_depth: 2
            }
        );
    }
}
