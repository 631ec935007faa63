//! Table formatting helpers and event tallies for CLI output.

use std::path::Path;

use a3s_mirror_core::event::MirrorEvent;
use a3s_mirror_queue::PoolSummary;
use comfy_table::{ContentArrangement, Table};
use tokio::sync::broadcast::{self, error::RecvError};

/// Platform and list writes seen on the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTally {
    pub platforms_copied: usize,
    pub platforms_skipped: usize,
    pub lists_pushed: usize,
}

/// Log every mirror event until the emitter is dropped, counting writes.
pub async fn log_events(mut rx: broadcast::Receiver<MirrorEvent>) -> EventTally {
    let mut tally = EventTally::default();
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::debug!(
                    event = %event.key,
                    unit = %event.unit,
                    detail = event.detail.as_deref().unwrap_or(""),
                    "Mirror event"
                );
                match event.key.as_str() {
                    "platform.copied" => tally.platforms_copied += 1,
                    "platform.skipped" => tally.platforms_skipped += 1,
                    "list.pushed" => tally.lists_pushed += 1,
                    _ => {}
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event log fell behind");
            }
            Err(RecvError::Closed) => return tally,
        }
    }
}

/// One-line write summary, or `None` when nothing was copied or skipped.
pub fn tally_line(tally: &EventTally) -> Option<String> {
    if *tally == EventTally::default() {
        return None;
    }
    Some(format!(
        "{} platform(s) copied, {} already up to date, {} manifest list(s) written",
        tally.platforms_copied, tally.platforms_skipped, tally.lists_pushed
    ))
}

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Table of failed units, or `None` when everything passed.
pub fn failure_table(summary: &PoolSummary) -> Option<Table> {
    let mut failed = summary.outcomes.iter().filter(|o| !o.succeeded).peekable();
    failed.peek()?;

    let mut table = new_table(&["IMAGE", "ERROR"]);
    for outcome in failed {
        table.add_row(vec![
            outcome.id.clone(),
            outcome.error.clone().unwrap_or_default(),
        ]);
    }
    Some(table)
}

/// One-line run summary.
pub fn summary_line(summary: &PoolSummary, rejected: usize) -> String {
    let mut line = format!(
        "{} succeeded, {} failed",
        summary.succeeded,
        summary.failed + rejected
    );
    if summary.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", summary.cancelled));
    }
    line
}

/// Print the end-of-run report.
pub fn print_summary(summary: &PoolSummary, rejected: usize, failed_file: &Path) {
    if let Some(table) = failure_table(summary) {
        println!("{table}");
        println!();
    }
    println!("{}", summary_line(summary, rejected));
    if summary.failed + rejected > 0 {
        println!("Failed images written to {}", failed_file.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_mirror_core::event::EventEmitter;
    use a3s_mirror_core::job::JobOutcome;

    fn summary() -> PoolSummary {
        PoolSummary {
            succeeded: 2,
            failed: 1,
            cancelled: 0,
            outcomes: vec![
                JobOutcome::success("docker.io/library/nginx:1.25"),
                JobOutcome::failure("docker.io/library/redis:7.2", "registry error: 500"),
                JobOutcome::success("docker.io/library/busybox:1.36"),
            ],
        }
    }

    #[test]
    fn test_failure_table_lists_failed_units() {
        let table = failure_table(&summary()).unwrap().to_string();
        assert!(table.contains("docker.io/library/redis:7.2"));
        assert!(table.contains("registry error: 500"));
        assert!(!table.contains("nginx"));
    }

    #[test]
    fn test_failure_table_empty_when_all_pass() {
        let summary = PoolSummary {
            succeeded: 1,
            outcomes: vec![JobOutcome::success("a")],
            ..Default::default()
        };
        assert!(failure_table(&summary).is_none());
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(&summary(), 0), "2 succeeded, 1 failed");
        let mut s = summary();
        s.cancelled = 3;
        assert_eq!(summary_line(&s, 2), "2 succeeded, 3 failed, 3 cancelled");
    }

    #[tokio::test]
    async fn test_log_events_tallies_until_closed() {
        let emitter = EventEmitter::new(16);
        let rx = emitter.subscribe();
        emitter.emit(MirrorEvent::new("unit.started", "nginx:1.25"));
        emitter.emit(MirrorEvent::new("platform.copied", "nginx:1.25").with_detail("linux/amd64"));
        emitter.emit(MirrorEvent::new("platform.skipped", "nginx:1.25").with_detail("linux/arm64"));
        emitter.emit(MirrorEvent::new("list.pushed", "nginx:1.25"));
        drop(emitter);

        let tally = log_events(rx).await;
        assert_eq!(
            tally,
            EventTally {
                platforms_copied: 1,
                platforms_skipped: 1,
                lists_pushed: 1,
            }
        );
        assert_eq!(
            tally_line(&tally).unwrap(),
            "1 platform(s) copied, 1 already up to date, 1 manifest list(s) written"
        );
        assert!(tally_line(&EventTally::default()).is_none());
    }
}
