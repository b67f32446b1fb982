//! Interactive terminal prompts.

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use crossterm::style::Stylize;

use questkit_core::Prompter;
use questkit_schema::CoreModEntry;

/// Asks on stdout and reads the answer from stdin.
///
/// Anything other than `y` is a no; an unreadable stdin is a no as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line() -> Option<String> {
        let mut input = String::new();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim().to_string()),
        }
    }

    fn confirm(question: &str) -> bool {
        print!("  {question} (y/N) ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        Self::read_line().is_some_and(|answer| answer.eq_ignore_ascii_case("y"))
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn confirm_unsupported_version(&self, app_version: &str, supported: &[String]) -> bool {
        println!();
        println!(
            "  {} No core mods are published for version {}.",
            "WARNING:".bold().yellow(),
            app_version.bold()
        );
        if !supported.is_empty() {
            println!("  Supported versions: {}", supported.join(", ").dark_grey());
        }
        println!("  Most mods will not work without them.");
        Self::confirm("Continue anyway?")
    }

    async fn confirm_install_core_mods(&self, missing: &[CoreModEntry]) -> bool {
        println!();
        println!("  {}", "Missing core mods:".bold());
        for entry in missing {
            println!("    {} {}", entry.id.clone().cyan(), entry.version.clone().dark_grey());
        }
        Self::confirm("Download and install them now?")
    }

    async fn confirm_version_mismatch(
        &self,
        mod_name: &str,
        mod_app_version: &str,
        app_version: &str,
    ) -> bool {
        println!();
        println!(
            "  {} {} is built for {}, but {} is installed.",
            "WARNING:".bold().yellow(),
            mod_name.bold(),
            mod_app_version,
            app_version
        );
        Self::confirm("Install it anyway?")
    }

    async fn choose_destination(&self, path: &Path, options: &[String]) -> Option<usize> {
        let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
        println!();
        println!("  Where should {} go?", name.bold());
        for (i, option) in options.iter().enumerate() {
            println!("    {}) {option}", i + 1);
        }
        print!("  Number (blank to skip): ");
        std::io::stdout().flush().ok()?;

        let choice: usize = Self::read_line()?.parse().ok()?;
        (1..=options.len()).contains(&choice).then(|| choice - 1)
    }

    async fn confirm_uninstall_app(&self, package_id: &str) -> bool {
        println!();
        println!(
            "  {} This removes {} and all of its data from the device.",
            "WARNING:".bold().yellow(),
            package_id.bold()
        );
        println!("  Patch again after reinstalling it to use mods.");
        Self::confirm("Uninstall it?")
    }
}
