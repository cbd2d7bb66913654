//! Output helpers for consistent CLI output.
//!
//! Status lines for the operator, with colored prefixes. Diagnostics from the
//! bootstrap core go through `tracing`; these are the command's own messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use yumbootstrap::output::Output;
//!
//! Output::success("Installed 12 packages");
//! Output::info("Converting RPM database...");
//! ```

use owo_colors::OwoColorize;

/// Standard output helper for consistent CLI formatting.
pub struct Output;

impl Output {
    /// Print a success message with a green checkmark.
    ///
    /// Example: `✓ RPM database converted`
    pub fn success(msg: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// Print an info/status message with a cyan arrow.
    ///
    /// Example: `→ Installing 3 package groups...`
    pub fn info(msg: impl AsRef<str>) {
        println!("{} {}", "→".cyan(), msg.as_ref().dimmed());
    }

    /// Print a step message (for multi-step operations).
    pub fn step(msg: impl AsRef<str>) {
        println!("  {} {}", "•".cyan(), msg.as_ref());
    }

    /// Print a header/section title.
    pub fn header(msg: impl AsRef<str>) {
        println!("\n{}\n", msg.as_ref().bold().cyan());
    }

    /// Print a key-value pair with alignment.
    ///
    /// Example: `  Database:      /usr/lib/sysimage/rpm`
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {:<14} {}", format!("{}:", key.as_ref()).cyan(), value.as_ref());
    }
}
