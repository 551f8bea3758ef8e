//! On-disk cache of selected implementations for implmap.

pub mod file;
pub mod persist;

pub use file::*;
pub use persist::*;
