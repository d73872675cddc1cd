//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are immutable: two value objects with the
/// same attribute values are the same value. A branch's sharing policy is the
/// canonical example in this engine; it is replaced, never edited in place.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
