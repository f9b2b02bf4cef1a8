//! Activity log front end: typed run events rendered into JSONL entries.
//!
//! [`ActivityLog`] is shared by reference across the CLI; the writer sits
//! behind a `parking_lot::Mutex` so concurrent callers never interleave lines.

#![allow(missing_docs)]

use std::path::Path;

use parking_lot::Mutex;

use crate::inventory::builder::{BuildFailure, BuildReport, BuildSummary, FailureStage};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::reconcile::engine::DiffSummary;

/// Events that can be written to the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    BuildStarted {
        command: String,
        root: String,
        config_hash: String,
    },
    BuildCompleted {
        command: String,
        root: String,
        summary: BuildSummary,
    },
    SubtreeSkipped {
        command: String,
        failure: BuildFailure,
    },
    LookupFailed {
        command: String,
        failure: BuildFailure,
    },
    DiffCompleted {
        source: String,
        compare: String,
        summary: DiffSummary,
    },
    CopyCompleted {
        copied: u64,
        bytes: u64,
        failures: u64,
        dry_run: bool,
    },
    CopyFailed {
        key: String,
        code: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::BuildStarted {
            command,
            root,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::BuildStart, Severity::Info);
            e.command = Some(command.clone());
            e.root = Some(root.clone());
            e.config_hash = Some(config_hash.clone());
            e
        }
        ActivityEvent::BuildCompleted {
            command,
            root,
            summary,
        } => {
            let severity = if summary.partial {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::BuildComplete, severity)
                .stats(summary);
            e.command = Some(command.clone());
            e.root = Some(root.clone());
            e.count = Some(summary.entries);
            e.bytes = Some(summary.total_bytes);
            e.duration_ms = Some(summary.elapsed_ms);
            e.partial = Some(summary.partial);
            e
        }
        ActivityEvent::SubtreeSkipped { command, failure } => {
            failure_entry(EventType::SubtreeSkipped, command, failure)
        }
        ActivityEvent::LookupFailed { command, failure } => {
            failure_entry(EventType::LookupFailed, command, failure)
        }
        ActivityEvent::DiffCompleted {
            source,
            compare,
            summary,
        } => {
            let mut e = LogEntry::new(EventType::DiffComplete, Severity::Info).stats(summary);
            e.command = Some("diff".to_string());
            e.root = Some(format!("{source} <> {compare}"));
            e.count = Some(summary.missing_keys_count + summary.different_files_count);
            e.bytes = Some(summary.total_diff_bytes);
            e
        }
        ActivityEvent::CopyCompleted {
            copied,
            bytes,
            failures,
            dry_run,
        } => {
            let severity = if *failures > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::CopyComplete, severity);
            e.command = Some(if *dry_run { "copy --dry-run" } else { "copy" }.to_string());
            e.count = Some(*copied);
            e.bytes = Some(*bytes);
            e.partial = Some(*failures > 0);
            e
        }
        ActivityEvent::CopyFailed { key, code, message } => {
            LogEntry::new(EventType::CopyFailed, Severity::Warning)
                .command("copy")
                .key(key.clone())
                .failure(code, message.clone())
        }
        ActivityEvent::Error { code, message } => {
            LogEntry::new(EventType::Error, Severity::Error).failure(code, message.clone())
        }
    }
}

fn failure_entry(event: EventType, command: &str, failure: &BuildFailure) -> LogEntry {
    LogEntry::new(event, Severity::Warning)
        .command(command)
        .key(failure.key.clone())
        .failure(failure.code, failure.message.clone())
}

/// Thread-safe activity log. A disabled log accepts and drops every event.
pub struct ActivityLog {
    writer: Mutex<Option<JsonlWriter>>,
}

impl ActivityLog {
    pub fn open(path: &Path) -> Self {
        Self::with_config(JsonlConfig::new(path))
    }

    pub fn with_config(config: JsonlConfig) -> Self {
        Self {
            writer: Mutex::new(Some(JsonlWriter::open(config))),
        }
    }

    pub fn disabled() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.lock().is_some()
    }

    pub fn record(&self, event: &ActivityEvent) {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.write_entry(&event_to_log_entry(event));
        }
    }

    /// Log every absorbed failure of a build, then its completion.
    pub fn record_build(&self, command: &str, root: &str, report: &BuildReport) {
        for failure in &report.failures {
            let event = match failure.stage {
                FailureStage::Lookup => ActivityEvent::LookupFailed {
                    command: command.to_string(),
                    failure: failure.clone(),
                },
                FailureStage::Listing | FailureStage::Depth => ActivityEvent::SubtreeSkipped {
                    command: command.to_string(),
                    failure: failure.clone(),
                },
            };
            self.record(&event);
        }
        self.record(&ActivityEvent::BuildCompleted {
            command: command.to_string(),
            root: root.to_string(),
            summary: report.summary(),
        });
    }

    pub fn flush(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.flush();
        }
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
