//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use chatsync_core::annotations::{is_hidden, is_pending, sync_error_of};
use chatsync_core::snapshot::RestoreReport;
use chatsync_core::sync::{OpenedChat, SyncStatus};
use chatsync_core::{Message, Snapshot};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print an opened chat: archived part collapsed, active part in full
    pub fn print_chat(&self, chat: &OpenedChat) {
        match self.format {
            OutputFormat::Human => {
                if chat.log.is_empty() {
                    println!("No messages.");
                    return;
                }
                if let Some(ref chat_index) = chat.log.restored_from {
                    println!(
                        "── {} archived message(s) up to snapshot {} ──",
                        chat.log.archived.len(),
                        chat_index
                    );
                    println!();
                }
                for message in chat.log.active.iter().filter(|m| !is_hidden(m)) {
                    self.print_message_line(message);
                }
                println!();
                println!(
                    "{} message(s), source: {:?}, status: {}",
                    chat.messages.len(),
                    chat.source,
                    chat.status.state
                );
                if let (Some(total), Some(stop)) = (chat.server_total, chat.history_stop) {
                    if total > chat.messages.len() {
                        println!("History stopped at {} of {} ({:?})", chat.messages.len(), total, stop);
                    }
                }
            }
            OutputFormat::Json => {
                self.print_json(&serde_json::json!({
                    "project_id": chat.project_id,
                    "archived": chat.log.archived,
                    "active": chat.log.active,
                    "restored_from": chat.log.restored_from,
                    "status": chat.status,
                    "local_error": chat.local_error,
                    "remote_error": chat.remote_error,
                }));
            }
            OutputFormat::Quiet => {
                for message in chat.log.archived.iter().chain(&chat.log.active) {
                    println!("{}", message.id);
                }
            }
        }
    }

    fn print_message_line(&self, message: &Message) {
        let marker = if let Some(error) = sync_error_of(message) {
            format!(" [failed: {}]", truncate(error, 40))
        } else if is_pending(message) {
            " [pending]".to_string()
        } else {
            String::new()
        };
        let seq = message
            .sequence_num
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:>4} {:<9} {}{}",
            seq,
            format!("{:?}", message.role).to_lowercase(),
            truncate_line(&message.content.as_text(), 70),
            marker
        );
    }

    /// Print sync status of a project
    pub fn print_status(&self, project_id: &str, status: &SyncStatus) {
        match self.format {
            OutputFormat::Human => {
                println!("Project: {}", project_id);
                println!("  State:   {}", status.state);
                println!("  Pending: {}", status.pending_count);
                if let Some(ref error) = status.last_error {
                    let at = status
                        .last_error_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!("  Error:   {} ({})", error, at);
                }
            }
            OutputFormat::Json => self.print_json(status),
            OutputFormat::Quiet => println!("{}", status.state),
        }
    }

    /// Print snapshot details
    pub fn print_snapshot(&self, snapshot: &Snapshot) {
        match self.format {
            OutputFormat::Human => {
                println!("Snapshot at: {}", snapshot.chat_index);
                if let Some(ref summary) = snapshot.summary {
                    println!("Summary:     {}", summary);
                }
                if let Some(updated) = snapshot.updated_at {
                    println!("Updated:     {}", updated.format("%Y-%m-%d %H:%M"));
                }
                println!();
                for (path, entry) in &snapshot.files {
                    let suffix = if entry.is_folder() { "/" } else { "" };
                    println!("  {}{}", path, suffix);
                }
                println!("\n{} file(s)", snapshot.file_count());
            }
            OutputFormat::Json => self.print_json(snapshot),
            OutputFormat::Quiet => println!("{}", snapshot.chat_index),
        }
    }

    /// Print the result of a snapshot restore
    pub fn print_restore(&self, report: &RestoreReport) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "Restored {} folder(s) and {} file(s) ({} already present)",
                    report.folders_created, report.files_written, report.already_existed
                );
                for failure in &report.failures {
                    println!("  ✗ {}: {}", failure.path, failure.error);
                }
            }
            OutputFormat::Json => self.print_json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warning(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message body", 10), "a longe...");
        // Multi-byte characters are not split
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("first\nsecond", 20), "first");
        assert_eq!(truncate_line("", 20), "");
    }
}
