//! Tree-to-tree passes run between parsing and code generation.
//!
//! Order matters: scope resolution gives every name a Location, the
//! canonicalization pass then reshapes expressions around those Locations,
//! and the optimizer folds what the reshaping exposed.

pub mod dealias;
pub mod optimizer;
pub mod semantic;
pub mod transform;
