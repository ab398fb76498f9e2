// Output formatting and display for CLI

use crate::config::ProcessSpec;
use crate::process::{ProcessHandle, ProcessState};
use chrono::{DateTime, Local};
use colored::*;
use std::time::{Duration, SystemTime};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of supervised processes
pub fn print_process_table(handles: &[&ProcessHandle]) {
    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Last Exit")]
        exit_code: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Reloads")]
        reloads: String,
        #[tabled(rename = "Memory Kills")]
        memory_kills: String,
        #[tabled(rename = "Last Restart")]
        last_restart: String,
    }

    if handles.is_empty() {
        println!("{}", "No processes are configured".yellow());
        return;
    }

    let rows: Vec<ProcessRow> = handles
        .iter()
        .map(|h| ProcessRow {
            name: truncate(h.name(), 20),
            state: format_state_colored(&h.state),
            exit_code: h
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            restarts: h.restart_count().to_string(),
            reloads: h.reload_count.to_string(),
            memory_kills: h.memory_violations.to_string(),
            last_restart: h
                .last_restart_at()
                .map(format_time)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", handles.len())
            .dimmed()
            .italic()
    );
}

/// Print the specs loaded from a config file
pub fn print_spec_table(specs: &[ProcessSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Cwd")]
        cwd: String,
        #[tabled(rename = "Watch")]
        watch: String,
        #[tabled(rename = "Autorestart")]
        autorestart: String,
        #[tabled(rename = "Delay")]
        delay: String,
        #[tabled(rename = "Memory Limit")]
        memory_limit: String,
        #[tabled(rename = "Stop")]
        stop: String,
    }

    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| {
            let (program, args) = spec.command_line();
            let mut command = program.display().to_string();
            for arg in args {
                command.push(' ');
                command.push_str(&arg);
            }

            let delay = match spec.exp_backoff_restart_delay {
                Some(initial) => format!("{} (exp)", format_duration(&initial)),
                None => format_duration(&spec.restart_delay),
            };

            SpecRow {
                name: truncate(&spec.name, 20),
                command: truncate(&command, 40),
                cwd: truncate(&spec.cwd.display().to_string(), 30),
                watch: format_flag(spec.watch),
                autorestart: format_flag(spec.autorestart),
                delay,
                memory_limit: spec
                    .memory_ceiling
                    .map(format_memory)
                    .unwrap_or_else(|| "-".to_string()),
                stop: format!(
                    "{} / {}",
                    spec.stop_signal,
                    format_duration(&spec.stop_timeout)
                ),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Format a process state with color coding
fn format_state_colored(state: &ProcessState) -> String {
    match state {
        ProcessState::Running => state.to_string().green().to_string(),
        ProcessState::Starting | ProcessState::Stopping | ProcessState::RestartPending => {
            state.to_string().yellow().to_string()
        }
        ProcessState::Stopped | ProcessState::Exited => state.to_string().bright_black().to_string(),
        ProcessState::Crashed => state.to_string().red().bold().to_string(),
    }
}

fn format_flag(enabled: bool) -> String {
    if enabled {
        "yes".green().to_string()
    } else {
        "no".bright_black().to_string()
    }
}

fn format_time(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration as its two largest units, e.g. `1h 5m`
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 && !duration.is_zero() {
        return format!("{}ms", duration.as_millis());
    }

    let ((major, major_unit), (minor, minor_unit)) = match secs {
        0..=59 => return format!("{}s", secs),
        60..=3_599 => ((secs / 60, "m"), (secs % 60, "s")),
        3_600..=86_399 => ((secs / 3_600, "h"), (secs % 3_600 / 60, "m")),
        _ => ((secs / 86_400, "d"), (secs % 86_400 / 3_600, "h")),
    };

    if minor > 0 {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    } else {
        format!("{}{}", major, major_unit)
    }
}

/// Format a byte count with binary units
fn format_memory(bytes: u64) -> String {
    const UNITS: [(&str, u64, usize); 3] = [("GB", 1 << 30, 2), ("MB", 1 << 20, 1), ("KB", 1 << 10, 1)];

    UNITS
        .iter()
        .find(|(_, size, _)| bytes >= *size)
        .map(|(unit, size, precision)| {
            format!("{:.*}{}", *precision, bytes as f64 / *size as f64, unit)
        })
        .unwrap_or_else(|| format!("{}B", bytes))
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(&Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2048), "2.0KB");
        assert_eq!(format_memory(200 * 1024 * 1024), "200.0MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("überlangername", 5), "üb...");
    }
}
