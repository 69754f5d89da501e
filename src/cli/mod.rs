//! CLI command implementations.

pub mod driver;
pub mod image;
pub mod machine;
pub mod network;
pub mod parsers;
