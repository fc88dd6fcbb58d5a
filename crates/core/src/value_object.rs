//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. Their
/// constructors are the only place their invariants are checked, so holding one
/// proves the value is valid (a `Quantity` is always strictly positive, a `Price`
/// is never negative).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
