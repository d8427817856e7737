use colored::*;
use terminal_size::{Width, Height, terminal_size};

pub fn print_header(title: &str, detail: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let line = "─".repeat(width.0 as usize);
    println!("{}", line.black().bold());

    let name = "Scout".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}  {}", name, version, title.bold());
    println!("{}", format!("  {}", detail).cyan());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Tool activity shown inline while an answer is being produced
pub fn print_status(msg: &str) {
    println!("  {} {}", "🔎".magenta(), msg.magenta().italic());
}

pub fn user_prompt() -> String {
    format!("{}: ", "You".blue().bold())
}

pub fn assistant_prefix() -> String {
    format!("{}: ", "Scout".green().bold())
}
