//! implmap compiler: registry initialization, dispatch, compiled graphs and
//! cache-backed sessions.

#[cfg(feature = "cli")]
pub mod cli;
pub mod compiled;
pub mod init;
pub mod pipeline;
pub mod selector;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::*;
pub use compiled::*;
pub use init::*;
pub use pipeline::*;
pub use selector::*;
pub use session::*;
