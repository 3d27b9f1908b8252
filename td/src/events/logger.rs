//! Event Logger - persists events to JSONL files
//!
//! The EventLogger subscribes to the EventBus and writes all events to
//! per-instance JSONL files for history, debugging, and replay.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, TdEvent as Event};

/// Event logger that writes events to JSONL files.
///
/// Events are written to `~/.taskdaemon/runs/{instance-id}/events.jsonl`.
pub struct EventLogger {
    /// Base directory for run data (~/.taskdaemon/runs)
    runs_dir: PathBuf,
    /// Open file writers per instance
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    /// Create a new event logger
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        debug!(?runs_dir, "EventLogger::new: creating logger");
        Self {
            runs_dir,
            writers: HashMap::new(),
        }
    }

    /// Create a logger with the default runs directory (~/.taskdaemon/runs)
    pub fn with_default_path() -> eyre::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("Could not determine home directory"))?;
        let runs_dir = home.join(".taskdaemon").join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self::new(runs_dir))
    }

    /// Write an event to its instance's log file
    pub fn write_event(&mut self, event: &Event) -> eyre::Result<()> {
        let subject = event.subject();
        debug!(%subject, event_type = event.event_type(), "EventLogger::write_event");

        let writer = if let Some(w) = self.writers.get_mut(subject) {
            w
        } else {
            let dir = self.runs_dir.join(subject);
            fs::create_dir_all(&dir)?;

            let log_path = dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            let writer = BufWriter::new(file);
            self.writers.insert(subject.to_string(), writer);
            self.writers.get_mut(subject).unwrap()
        };

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for an instance (e.g., when the workflow completes)
    pub fn close_execution(&mut self, subject: &str) {
        debug!(%subject, "EventLogger::close_execution");
        if let Some(mut writer) = self.writers.remove(subject) {
            let _ = writer.flush();
        }
    }

    /// Run the logger, consuming events from the bus until shutdown.
    ///
    /// This is meant to be spawned as a background task.
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        debug!("EventLogger::run: starting event logger");
        let mut rx = event_bus.subscribe();

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let subject = event.subject().to_string();
                    let is_terminal = matches!(event, Event::WorkflowCompleted { .. });

                    if let Err(e) = self.write_event(&event) {
                        error!(%subject, error = %e, "EventLogger: failed to write event");
                    }

                    if is_terminal {
                        self.close_execution(&subject);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (subject, mut writer) in self.writers.drain() {
            debug!(%subject, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from an instance's log file
pub fn read_execution_events(runs_dir: impl AsRef<Path>, instance_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = runs_dir.as_ref().join(instance_id).join("events.jsonl");
    debug!(?log_path, "read_execution_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_execution_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_execution_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let logger = EventLogger::with_default_path()?;
    Ok(tokio::spawn(async move {
        logger.run(event_bus).await;
    }))
}

/// Replay events for an instance from the default runs directory.
///
/// Returns an empty Vec if the instance has no logged events.
pub fn replay_execution_events(instance_id: &str) -> eyre::Result<Vec<Event>> {
    let home = dirs::home_dir().ok_or_else(|| eyre::eyre!("Could not determine home directory"))?;
    let runs_dir = home.join(".taskdaemon").join("runs");
    let entries = read_execution_events(&runs_dir, instance_id)?;
    Ok(entries.into_iter().map(|e| e.event).collect())
}
