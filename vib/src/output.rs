//! Output helpers for consistent CLI output.
//!
//! Status messages with colored prefixes, cargo-style. Build engine output is
//! inherited straight to the terminal, so these helpers only ever print whole
//! lines between steps.
//!
//! # Example
//!
//! ```rust,ignore
//! use vib::output::Output;
//!
//! Output::info("Loading recipe recipe.yml");
//! Output::running("podman build -t localhost/myos -f Containerfile .");
//! Output::success("Image myos built successfully using podman");
//! ```

use owo_colors::OwoColorize;

/// Standard output helper for consistent CLI formatting.
pub struct Output;

impl Output {
    /// Print a success message with a green checkmark.
    ///
    /// Example: `✓ Image myos built successfully using podman`
    pub fn success(msg: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// Print a warning message with a yellow warning symbol.
    pub fn warning(msg: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow(), msg.as_ref());
    }

    /// Print an info/status message with a cyan arrow.
    ///
    /// Example: `→ Loading recipe recipe.yml`
    pub fn info(msg: impl AsRef<str>) {
        println!("{} {}", "→".cyan(), msg.as_ref().dimmed());
    }

    /// Print a step message (for multi-step operations).
    ///
    /// Example: `• Finalize: squash`
    pub fn step(msg: impl AsRef<str>) {
        println!("  {} {}", "•".cyan(), msg.as_ref());
    }

    /// Print a key-value pair with alignment.
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        println!(
            "  {:<14} {}",
            format!("{}:", key.as_ref()).cyan(),
            value.as_ref()
        );
    }

    /// Print a hint/suggestion message (indented with arrow).
    pub fn hint(msg: impl AsRef<str>) {
        println!("  {} {}", "→".cyan(), msg.as_ref());
    }

    /// Print the running command (for transparency).
    ///
    /// Example: `Running: docker build -t localhost/myos -f Containerfile .`
    pub fn running(cmd: impl AsRef<str>) {
        println!("{} {}", "Running:".dimmed(), cmd.as_ref().dimmed());
    }
}
