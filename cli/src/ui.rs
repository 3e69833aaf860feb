//! UI utilities for pretty printing

use colored::{ColoredString, Colorize};
use georeplica_core::health::RegionStatus;

pub fn print_banner() {
    println!("{}", "=".repeat(60).bright_blue());
    println!(
        "{}",
        format!("  {}", georeplica_core::version_string()).bright_cyan().bold()
    );
    println!("{}", "  Multi-Region Active-Active Consistency".bright_white());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
}

pub fn print_section(title: &str) {
    println!();
    println!("{}", title.bright_yellow().bold());
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<22} {}", format!("{label}:").bright_green(), value);
}

pub fn status(status: RegionStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RegionStatus::Healthy => text.bright_green(),
        RegionStatus::Degraded => text.bright_yellow(),
        RegionStatus::Unhealthy => text.red(),
        RegionStatus::Down => text.bright_red().bold(),
    }
}

pub fn print_error(msg: &str) {
    println!("{} {}", "✗".bright_red(), msg.red());
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".bright_green(), msg.bright_green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".bright_blue(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".bright_yellow(), msg.yellow());
}
