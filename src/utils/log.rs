// src/utils/log.rs

//! Operator-facing progress output.
//!
//! Thin layer over the `log` facade so job output keeps one layout
//! (headers, numbered steps, summaries) whatever logger is installed.
//! The facade macros are re-exported so `use crate::utils::log;` still
//! allows `log::warn!(...)`.

pub use ::log::{debug, error, info, warn};

const RULE_WIDTH: usize = 60;

fn step_line(step_num: usize, total: usize, message: &str) -> String {
    format!("[STEP {step_num}/{total}] {message}")
}

fn summary_lines(title: &str, items: &[(&str, String)]) -> Vec<String> {
    let mut lines = vec![format!("[SUMMARY] {title}")];
    lines.extend(items.iter().map(|(key, value)| format!("    {key}: {value}")));
    lines
}

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(RULE_WIDTH);
    info!("{border}");
    info!("  {title}");
    info!("{border}");
}

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    info!("{}", step_line(step_num, total, message));
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    info!("    {message}");
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    for line in summary_lines(title, items) {
        info!("{line}");
    }
}
