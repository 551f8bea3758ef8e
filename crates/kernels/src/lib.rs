//! Kernel selection core for implmap: axis-order conversion, parameter
//! derivation, implementation objects and the implementation registry.

pub mod codec;
pub mod config;
pub mod error;
pub mod implementation;
pub mod layout;
pub mod params;
pub mod registry;

pub use codec::*;
pub use config::*;
pub use error::*;
pub use implementation::*;
pub use layout::*;
pub use params::*;
pub use registry::*;
