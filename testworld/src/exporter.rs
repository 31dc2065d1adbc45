//! JSON exporter for event timelines.
//!
//! Exports the recorded events so CI tooling can chart or diff runs without
//! parsing the text log.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventExport {
    /// Sequence id within the world
    pub id: u64,

    pub description: String,

    /// Start, relative to the timeline start
    pub start_offset_secs: f64,

    /// Duration; running events are measured up to the export
    pub duration_secs: f64,

    /// Whether `finish` was called
    pub finished: bool,
}

/// Complete timeline export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineExport {
    /// World namespace
    pub world: String,

    /// Span covered by the export in seconds
    pub total_secs: f64,

    /// All events in id order
    pub events: Vec<EventExport>,
}

impl TimelineExport {
    /// Creates an empty export.
    pub fn new(world: &str) -> Self {
        Self {
            world: world.to_string(),
            total_secs: 0.0,
            events: Vec::new(),
        }
    }

    /// Adds an event.
    pub fn add_event(&mut self, event: EventExport) {
        self.events.push(event);
    }

    /// Events that were never finished.
    pub fn running(&self) -> impl Iterator<Item = &EventExport> {
        self.events.iter().filter(|e| !e.finished)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.json");

        let mut export = TimelineExport::new("w");
        export.add_event(EventExport {
            id: 0,
            description: "World: create".to_string(),
            start_offset_secs: 0.0,
            duration_secs: 0.25,
            finished: true,
        });
        export.write_to_file(&path).unwrap();

        let parsed: TimelineExport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, export);
        assert_eq!(parsed.running().count(), 0);
    }
}
