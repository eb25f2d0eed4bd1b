//! Terminal output

use colored::*;
use keybox_engine::{Disposition, Verdict};

pub fn print_section(title: &str) {
    println!();
    println!("{} {}", "==>".bright_cyan().bold(), title.bold());
}

/// Two-column summary table.
pub fn print_summary(title: &str, rows: &[(&str, usize)]) {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    println!("{}", title.bright_white().bold());
    println!("{}", "-".repeat(width + 10).dimmed());
    for (label, value) in rows {
        let value = value.to_string();
        println!("{:<width$}  {}", label, value.bright_yellow(), width = width);
    }
}

pub fn verdict_line(path: &str, verdict: &Verdict) -> String {
    match verdict.disposition() {
        Disposition::Accept => format!("{} {}", "VALID  ".bright_green().bold(), path),
        Disposition::Reject => format!(
            "{} {} ({})",
            "INVALID".bright_red().bold(),
            path,
            describe(verdict)
        ),
        Disposition::Retry => format!(
            "{} {} ({})",
            "RETRY  ".bright_yellow().bold(),
            path,
            describe(verdict)
        ),
    }
}

fn describe(verdict: &Verdict) -> String {
    match (&verdict.reason, &verdict.detail) {
        (Some(_), Some(detail)) => detail.clone(),
        (Some(reason), None) => reason.to_string(),
        (None, _) => "no reason given".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keybox_engine::KeyboxError;

    #[test]
    fn test_verdict_lines() {
        colored::control::set_override(false);

        let ok = verdict_line("a.xml", &Verdict::accepted());
        assert_eq!(ok, "VALID   a.xml");

        let rejected = Verdict::rejected(&KeyboxError::ChainLinkageBroken { index: 0 });
        assert!(verdict_line("b.xml", &rejected).starts_with("INVALID b.xml (Issuer of certificate 0"));

        let retry = Verdict::rejected(&KeyboxError::RevocationSourceUnavailable("timeout".to_string()));
        assert!(verdict_line("c.xml", &retry).starts_with("RETRY   c.xml"));
    }
}
