//! File-backed event journal: the replay source for subscriptions.
//!
//! Append-only JSON lines with monotonic offsets assigned by the publisher.
//! A journal installed on the manager records every published event and
//! serves `replay_from` / `replay_offset` cursors on subscribe. Corrupt lines
//! are skipped on read; the journal is never rewritten in place.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::subscription::{Event, EventJournal, ReplayLog};

pub struct JsonlEventJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventJournal {
    /// Open (or create) a journal file.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, write_lock: Mutex::new(()) })
    }

    fn read_all(&self) -> Vec<Event> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(
                        target: "agentese::replay",
                        file = %self.path.display(),
                        error = %e,
                        "skipping corrupt journal line"
                    );
                    None
                }
            })
            .collect()
    }
}

impl ReplayLog for JsonlEventJournal {
    fn events_from_offset(&self, offset: u64) -> Vec<Event> {
        self.read_all().into_iter().filter(|e| e.offset >= offset).collect()
    }

    fn events_from_timestamp(&self, at: DateTime<Utc>) -> Vec<Event> {
        self.read_all().into_iter().filter(|e| e.at >= at).collect()
    }
}

impl EventJournal for JsonlEventJournal {
    fn append(&self, event: &Event) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let _guard = self.write_lock.lock().expect("journal write lock poisoned");
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = appended {
            warn!(
                target: "agentese::replay",
                file = %self.path.display(),
                error = %e,
                "journal append failed; event not recorded for replay"
            );
        }
    }
}
