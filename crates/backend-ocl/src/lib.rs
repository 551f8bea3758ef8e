//! Accelerator backend for implmap: native-layout parameters, kernel variant
//! selection and launch requests.

pub mod attach;
pub mod planner;
pub mod runtime;

pub use attach::*;
pub use planner::*;
pub use runtime::*;
