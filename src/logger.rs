//! Terminal logging with colored module prefixes.
//!
//! ```ignore
//! log!("compile"; "{} pages, {} failed", total, failed);
//! debug!("route"; "mounted {} → {}", template, page);
//! ```
//!
//! Every line is `[module] message`. Single-line messages are cut to the
//! terminal width so a burst of watch events never wraps. The `error` module
//! goes to stderr, everything else to stdout.

use colored::{Color, Colorize};
use crossterm::{
    execute,
    terminal::{Clear, ClearType, size},
};
use std::{
    io::{Write, stderr, stdout},
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

static TERMINAL_WIDTH: OnceLock<usize> = OnceLock::new();
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Prefix colors per pipeline stage. Unlisted modules are yellow.
const MODULE_COLORS: &[(&str, Color)] = &[
    ("serve", Color::BrightBlue),
    ("watch", Color::BrightGreen),
    ("route", Color::BrightCyan),
    ("catalog", Color::BrightMagenta),
    ("error", Color::BrightRed),
];

const FALLBACK_WIDTH: usize = 120;

/// Log a message under a module prefix.
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Like `log!`, printed only with `--verbose`.
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub fn log(module: &str, message: &str) {
    let line = format_line(module, message, terminal_width());

    if module.eq_ignore_ascii_case("error") {
        let mut err = stderr().lock();
        writeln!(err, "{line}").ok();
        err.flush().ok();
        return;
    }

    let mut out = stdout().lock();
    // Clears leftovers of a previous, longer line.
    execute!(out, Clear(ClearType::UntilNewLine)).ok();
    writeln!(out, "{line}").ok();
    out.flush().ok();
}

fn terminal_width() -> usize {
    *TERMINAL_WIDTH.get_or_init(|| size().map_or(FALLBACK_WIDTH, |(w, _)| usize::from(w)))
}

fn module_color(module: &str) -> Color {
    MODULE_COLORS
        .iter()
        .find(|(name, _)| module.eq_ignore_ascii_case(name))
        .map_or(Color::BrightYellow, |&(_, color)| color)
}

fn format_line(module: &str, message: &str, width: usize) -> String {
    let prefix = format!("[{module}]");
    let message = if message.contains('\n') {
        message
    } else {
        // `[module] ` takes the prefix plus one space.
        truncate_str(message, width.saturating_sub(prefix.len() + 1))
    };
    format!("{} {message}", prefix.color(module_color(module)).bold())
}

/// Cut `s` to at most `max_len` bytes on a char boundary.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let end = (0..=max_len).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello");
        assert_eq!(truncate_str("hello", 0), "");
        // "€" is 3 bytes
        assert_eq!(truncate_str("€€", 4), "€");
        assert_eq!(truncate_str("a€b", 3), "a");
    }

    #[test]
    fn test_module_color() {
        assert_eq!(module_color("route"), Color::BrightCyan);
        assert_eq!(module_color("Error"), Color::BrightRed);
        assert_eq!(module_color("generate"), Color::BrightYellow);
    }

    #[test]
    fn test_format_line_fits_width() {
        colored::control::set_override(false);
        assert_eq!(format_line("watch", "pages updated", 80), "[watch] pages updated");
        assert_eq!(format_line("watch", "pages updated", 13), "[watch] pages");
        assert_eq!(format_line("watch", "a\nlong body", 5), "[watch] a\nlong body");
    }

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
