use crate::storage::PrepareReport;
use crate::sync::SyncReport;
use crate::ui::theme::TableState;
use crate::ui::{Icons, theme};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}

/// One line per type: created, reset after drift, or unchanged
pub fn prepare_report(report: &PrepareReport) {
    let states = [
        (&report.created, TableState::Created),
        (&report.reset, TableState::Reset),
        (&report.unchanged, TableState::Unchanged),
    ];
    for (entities, state) in states {
        for entity in entities {
            println!("{}", theme().prepare_line(entity, state));
        }
    }
}

pub fn sync_report(report: &SyncReport) {
    println!(
        "{} {} synced ({}), now {}",
        Icons::CHECK,
        report.entity.style(theme().success.clone()),
        theme().sync_mode(report.full),
        theme().locality(true)
    );
    summary_row("processed", &report.processed.to_string());
    summary_row("written", &report.written.to_string());
    if report.skipped > 0 {
        warn(&format!("{} records skipped", report.skipped));
    }
    summary_row("checkpoint", &report.checkpoint);
}
