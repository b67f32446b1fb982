//! Terminal output helpers.

use crossterm::style::Stylize;

use questkit_core::registry::Mod;

const LABEL_WIDTH: usize = 14;
const ID_WIDTH: usize = 28;
const VERSION_WIDTH: usize = 12;

pub fn section(title: &str) {
    println!();
    println!("{}", title.dark_grey());
    println!();
}

pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("{:<width$}{value}", format!("{label}:"), width = LABEL_WIDTH);
}

pub fn success(msg: &str) {
    println!("  {} {msg}", "✓".green());
}

pub fn warn(msg: &str) {
    println!("  {} {msg}", "!".yellow().bold());
}

pub fn failure(msg: &str) {
    println!("  {} {msg}", "✗".red().bold());
}

/// Column headers for `questkit mods`
pub fn print_mod_header() {
    let header = format!(
        "  {:<iw$} {:<vw$} {}",
        "id",
        "version",
        "state",
        iw = ID_WIDTH,
        vw = VERSION_WIDTH,
    );
    println!("{}", header.dark_grey());
}

pub fn print_mod_row(m: &Mod) {
    let id = format!("{:<width$}", m.id(), width = ID_WIDTH);
    let version = format!("{:<width$}", m.version(), width = VERSION_WIDTH);
    let state = if m.is_installed() {
        "installed".green()
    } else {
        "disabled".dark_grey()
    };
    let kind = if m.is_library() { " (library)" } else { "" };
    println!("  {} {} {state}{}", id.cyan(), version, kind.dark_grey());
}
