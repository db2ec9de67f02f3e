// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};

use common::{clip, remap};
use warp_clone::{CloneError, CloneSession, SubstitutionStack, UnbalancedScope};

#[test]
fn nested_scopes_compose_inner_over_outer() {
    // T1: L → L1, T2: L1 → L2. Inside both, L resolves to T2(T1(L)) = L2.
    let (l, l1, l2) = (clip(0), clip(1), clip(2));
    let mut session = CloneSession::new();
    {
        let mut outer = session.push_scope(remap(l, l1));
        assert_eq!(outer.apply_all(l), l1);
        {
            let inner = outer.push_scope(remap(l1, l2));
            assert_eq!(inner.apply_all(l), l2);
            assert_eq!(inner.substitution_depth(), 2);
        }
        assert_eq!(outer.apply_all(l), l1);
    }
    assert_eq!(session.apply_all(l), l);
    assert_eq!(session.substitution_depth(), 0);
}

#[test]
fn transforms_without_a_match_are_identity() {
    let mut session = CloneSession::new();
    let scope = session.push_scope(remap(clip(1), clip(2)));
    assert_eq!(scope.apply_all(clip(5)), clip(5));
}

#[test]
fn with_scope_pops_on_error() {
    let mut session = CloneSession::new();
    let result: Result<(), CloneError> = session.with_scope(remap(clip(1), clip(2)), |session| {
        assert_eq!(session.apply_all(clip(1)), clip(2));
        Err(CloneError::MissingKey)
    });
    assert!(result.is_err());
    assert_eq!(session.substitution_depth(), 0);
}

#[test]
fn with_scope_pops_while_unwinding() {
    let mut session = CloneSession::new();
    let unwound = catch_unwind(AssertUnwindSafe(|| {
        session.with_scope(remap(clip(1), clip(2)), |_| {
            std::panic::panic_any("clone function blew up");
        });
    }));
    assert!(unwound.is_err());
    assert_eq!(session.substitution_depth(), 0);
}

#[test]
fn leaked_inner_scope_is_detected_on_outer_release() {
    let mut session = CloneSession::new();
    let unwound = catch_unwind(AssertUnwindSafe(|| {
        let mut outer = session.push_scope(remap(clip(1), clip(2)));
        std::mem::forget(outer.push_scope(remap(clip(2), clip(3))));
        drop(outer);
    }));
    let payload = unwound.expect_err("unbalanced release must panic");
    let found = payload
        .downcast_ref::<UnbalancedScope>()
        .expect("panic payload is UnbalancedScope");
    assert_eq!(
        *found,
        UnbalancedScope {
            expected_depth: 1,
            found_depth: 2
        }
    );
}

#[test]
fn snapshot_outlives_the_scope_it_was_taken_in() {
    let mut session = CloneSession::new();
    let snap: SubstitutionStack = {
        let scope = session.push_scope(remap(clip(1), clip(2)));
        scope.substitution_snapshot()
    };
    assert_eq!(session.substitution_depth(), 0);
    assert_eq!(snap.depth(), 1);
    assert_eq!(snap.apply_all(clip(1)), clip(2));
}
