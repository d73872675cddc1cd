//! Branches, their sharing policies, and visibility resolution.
//!
//! Pure domain logic: callers hand in a snapshot of branches and owned records,
//! the resolver answers which records a branch may see.

pub mod branch;
pub mod record;
pub mod visibility;

pub use branch::{Branch, ResourceClass, SharingPolicies, SharingPolicy};
pub use record::SharedRecord;
pub use visibility::{Scoped, can_access, resolve_visible};
