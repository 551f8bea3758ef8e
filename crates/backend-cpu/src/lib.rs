//! Host reference backend for implmap.

pub mod attach;
pub mod runtime;

pub use attach::*;
pub use runtime::*;
