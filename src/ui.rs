use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a categorized fatal error with follow-up advice
pub fn fatal(category: &str, msg: &str, advice: &str) {
    eprintln!("{} {} {}", "✗".red(), format!("[{category}]").red().bold(), msg);
    if !advice.is_empty() {
        eprintln!("  {}", advice.dimmed());
    }
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", step_label(num, total).blue().bold(), msg);
}

fn step_label(num: usize, total: usize) -> String {
    format!("[{num}/{total}]")
}

/// Print the dry-run banner
pub fn dry_run_notice() {
    println!(
        "{} {}",
        "[dry-run]".yellow().bold(),
        "no changes will be made on any host".yellow()
    );
}
