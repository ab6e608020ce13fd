//! Unit tests for attachment value types

use glam::Vec4;

use crate::framebuffer::{Attachment, ClearValue, LoadAction, StoreAction};

// ============================================================================
// CLEAR VALUE TESTS
// ============================================================================

#[test]
fn test_clear_value_tagged_access() {
    let color = ClearValue::Color(Vec4::new(0.1, 0.2, 0.3, 1.0));
    assert_eq!(color.as_color(), Some(Vec4::new(0.1, 0.2, 0.3, 1.0)));
    assert_eq!(color.as_depth(), None);
    assert_eq!(color.as_stencil(), None);

    let depth = ClearValue::Depth(0.5);
    assert_eq!(depth.as_depth(), Some(0.5));
    assert_eq!(depth.as_color(), None);

    let stencil = ClearValue::Stencil(0xFF);
    assert_eq!(stencil.as_stencil(), Some(0xFF));
    assert_eq!(stencil.as_depth(), None);
}

// ============================================================================
// DEFAULT SLOT TESTS
// ============================================================================

#[test]
fn test_unused_slots_default_to_load_store() {
    // New attachments assume load-by-default semantics; a clear is only
    // selected once a clear value is explicitly set.
    let color = Attachment::unused_color();
    assert!(!color.used);
    assert_eq!(color.load_action, LoadAction::Load);
    assert_eq!(color.store_action, StoreAction::Store);
    assert_eq!(color.render_target_array_length, 0);
}

#[test]
fn test_unused_slots_carry_kind_matched_clear_values() {
    assert!(Attachment::unused_color().clear_value.as_color().is_some());
    assert_eq!(Attachment::unused_depth().clear_value.as_depth(), Some(1.0));
    assert_eq!(Attachment::unused_stencil().clear_value.as_stencil(), Some(0));
}
