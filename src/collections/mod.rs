//! Index-addressed collections used by the client reconciler.
//!
//! - [`Indexed`] - a value or run of items tagged with its absolute position
//! - [`PartialSet`] - the sorted, merged set of windows a client has loaded

mod indexed;
mod partial_set;

pub use indexed::{clamp_range, Indexed};
pub use partial_set::{ChangedPair, InsertResult, PartialSet};
