//! Tag-based console logging.
//!
//! Every module logs through a `LogTag` so output can be filtered per
//! subsystem. Debug lines are hidden unless `--debug` or the matching
//! `--debug-<tag>` flag is present on the command line.

use chrono::Utc;
use colored::*;
use std::io::{self, Write};

use crate::arguments;

/// Log source tags, one per subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    System,
    Config,
    Chain,
    Registry,
    Alerts,
    Claim,
    Scheduler,
    Telegram,
    Price,
}

impl LogTag {
    /// Short label shown in the console
    pub fn label(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Chain => "CHAIN",
            LogTag::Registry => "REGISTRY",
            LogTag::Alerts => "ALERTS",
            LogTag::Claim => "CLAIM",
            LogTag::Scheduler => "SCHED",
            LogTag::Telegram => "TELEGRAM",
            LogTag::Price => "PRICE",
        }
    }

    /// Flag suffix used for per-tag debug filtering (`--debug-claim` etc.)
    fn flag_suffix(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Chain => "chain",
            LogTag::Registry => "registry",
            LogTag::Alerts => "alerts",
            LogTag::Claim => "claim",
            LogTag::Scheduler => "scheduler",
            LogTag::Telegram => "telegram",
            LogTag::Price => "price",
        }
    }

    fn colored_label(&self) -> ColoredString {
        match self {
            LogTag::System => self.label().bright_white().bold(),
            LogTag::Config => self.label().cyan().bold(),
            LogTag::Chain => self.label().bright_green().bold(),
            LogTag::Registry => self.label().blue().bold(),
            LogTag::Alerts => self.label().yellow().bold(),
            LogTag::Claim => self.label().magenta().bold(),
            LogTag::Scheduler => self.label().bright_blue().bold(),
            LogTag::Telegram => self.label().bright_cyan().bold(),
            LogTag::Price => self.label().green().bold(),
        }
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn emit(icon: ColoredString, tag: LogTag, message: &str) {
    println!(
        "{} {} {} {}",
        icon,
        tag.colored_label(),
        format!("[{}]", timestamp()).dimmed(),
        message
    );
    io::stdout().flush().ok();
}

/// Log at INFO level (always shown)
pub fn info(tag: LogTag, message: &str) {
    emit("ℹ".blue().bold(), tag, message);
}

/// Log at WARNING level (always shown)
pub fn warning(tag: LogTag, message: &str) {
    emit("⚠".yellow().bold(), tag, message);
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    emit("❌".red().bold(), tag, message);
}

/// Log at DEBUG level (shown only with `--debug` or `--debug-<tag>`)
pub fn debug(tag: LogTag, message: &str) {
    if !is_debug_enabled(tag) {
        return;
    }
    emit("🐛".purple().bold(), tag, message);
}

/// Whether debug output is enabled for a tag
pub fn is_debug_enabled(tag: LogTag) -> bool {
    arguments::has_arg("--debug") || arguments::has_arg(&format!("--debug-{}", tag.flag_suffix()))
}
