//! One module per subcommand.

pub mod core_mods;
pub mod import;
pub mod mods;
pub mod patch;
pub mod status;
pub mod uninstall_app;
