pub mod app;
pub mod config;
pub mod context;
pub mod coremods;
pub mod device;
pub mod import;
pub mod io;
pub mod lock;
pub mod mirror;
pub mod patching;
pub mod paths;
pub mod prompt;
pub mod reconcile;
pub mod registry;
pub mod toolchain;

#[cfg(test)]
pub(crate) mod testing;

pub use context::Context;
pub use lock::{LockState, OperationGuard, OperationLock};
pub use paths::*;
pub use prompt::{AutoPrompter, Prompter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("questkit/", env!("CARGO_PKG_VERSION"));
