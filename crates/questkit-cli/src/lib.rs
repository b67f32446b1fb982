//! questkit - patch Android apps for mod loading and manage their mods
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Talks to a headset over adb. The target app is patched once with an
//! external toolchain; after that, qmod archives and other files can be
//! imported and the required core mods are kept in sync with the published
//! manifest.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.questkit/
//! ├── config.toml          # Optional settings
//! ├── apps/<app id>/
//! │   ├── registry.json    # Known mods and their installed state
//! │   └── mods/<mod id>/   # Extracted mod payloads
//! └── tmp/                 # Downloads and patching work dirs
//! ```

pub mod cmd;
pub mod device;
pub mod prompt;
pub mod session;
pub mod ui;

pub use questkit_core::USER_AGENT;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "questkit")]
#[command(author, version, about = "questkit - patch Android apps and manage their mods")]
pub struct Cli {
    /// Package id of the app to manage (overrides config)
    #[arg(long, global = true, env = "QUESTKIT_APP")]
    pub app: Option<String>,

    /// Answer yes to every prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Show debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the app, patch state and core mod support
    Status,
    /// Patch the app so it can load mods
    Patch,
    /// List known mods
    #[command(alias = "list")]
    Mods,
    /// Import mods or other files
    Import {
        /// Files to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Preferred destination for non-mod files
        #[arg(long = "as", value_name = "DESTINATION")]
        destination: Option<String>,
    },
    /// Install (enable) a known mod
    Install {
        /// Mod id
        id: String,
    },
    /// Uninstall (disable) a mod, keeping it in the registry
    Uninstall {
        /// Mod id
        id: String,
    },
    /// Uninstall a mod and forget it
    Remove {
        /// Mod id
        id: String,
    },
    /// Remove the app and its data from the device
    #[command(name = "uninstall-app")]
    UninstallApp,
    /// Check the required core mods for the installed app version
    #[command(name = "core-mods")]
    CoreMods {
        /// Download and install whatever is missing
        #[arg(long)]
        fix: bool,
    },
}
