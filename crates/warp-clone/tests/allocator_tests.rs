// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use warp_clone::{
    CloneError, CloneSession, LayerRange, SessionConfig, DEFAULT_VIRTUAL_LAYER_BASE,
    INVALID_LAYER_INDEX,
};

#[test]
fn consecutive_controllers_get_disjoint_ranges() {
    let base = DEFAULT_VIRTUAL_LAYER_BASE;
    let mut session = CloneSession::new();

    assert_eq!(session.allocate_range(3).unwrap(), base);
    assert_eq!(session.translate_physical_to_virtual(0), Some(base));
    assert_eq!(session.translate_physical_to_virtual(2), Some(base + 2));
    assert_eq!(session.translate_physical_to_virtual(3), None);

    assert_eq!(session.allocate_range(5).unwrap(), base + 3);
    assert_eq!(session.translate_physical_to_virtual(0), Some(base + 3));
    assert_eq!(session.translate_physical_to_virtual(4), Some(base + 7));
    assert_eq!(session.translate_physical_to_virtual(-1), None);
    assert_eq!(session.translate_or_invalid(-1), INVALID_LAYER_INDEX);
    assert_eq!(
        session.active_layer_range(),
        LayerRange {
            start: base + 3,
            len: 5
        }
    );
}

#[test]
fn configured_base_is_honored() {
    let config = SessionConfig::default().with_virtual_layer_base(0x2000);
    let mut session = CloneSession::with_config(config).unwrap();
    assert_eq!(session.config().virtual_layer_base, 0x2000);
    assert_eq!(session.allocate_single().unwrap(), 0x2000);
    assert_eq!(session.allocate_range(2).unwrap(), 0x2001);
    assert_eq!(session.translate_or_invalid(1), 0x2002);
}

#[test]
fn single_allocations_leave_translation_alone() {
    let mut session = CloneSession::new();
    let start = session.allocate_range(2).unwrap();
    let single = session.allocate_single().unwrap();
    assert_eq!(single, start + 2);
    assert_eq!(session.translate_physical_to_virtual(1), Some(start + 1));
    assert_eq!(session.allocate_range(1).unwrap(), single + 1);
}

#[test]
fn zero_length_range_clears_translation() {
    let mut session = CloneSession::new();
    let first = session.allocate_range(4).unwrap();
    let empty = session.allocate_range(0).unwrap();
    assert_eq!(empty, first + 4);
    assert_eq!(session.translate_physical_to_virtual(0), None);
    assert_eq!(session.allocate_range(1).unwrap(), empty, "nothing consumed");
}

#[test]
fn negative_length_is_rejected_without_side_effects() {
    let mut session = CloneSession::new();
    let start = session.allocate_range(2).unwrap();
    assert!(matches!(
        session.allocate_range(-3),
        Err(CloneError::InvalidRangeLength(-3))
    ));
    assert_eq!(session.translate_physical_to_virtual(1), Some(start + 1));
    assert_eq!(session.allocate_single().unwrap(), start + 2);
}
