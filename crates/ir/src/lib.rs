//! Abstract primitive graph for implmap.

pub mod builder;
pub mod dialect;

pub use builder::*;
pub use dialect::*;
