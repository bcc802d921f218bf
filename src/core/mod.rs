//! The unified binary model.
//!
//! Format-independent types, the [`binary::GenericBinary`] surface, address
//! translation and the detect-then-parse entry points.

pub mod binary;
pub mod parse;
pub mod relocation;
pub mod section;
pub mod segment;
pub mod summary;
pub mod symbol;
pub mod translate;
