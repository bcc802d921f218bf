//! Format parsers and writers.
//!
//! Each format module parses a byte image into its own model type and
//! serializes that model back. They share the cursor primitives in
//! [`bytes`].

pub mod bytes;
pub mod detect;
pub mod elf;
pub mod macho;
pub mod pe;

pub use detect::detect;
