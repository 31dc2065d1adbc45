//! Event timeline - a concurrent recorder of named time intervals.
//!
//! Every noteworthy step of a world (network creation, each container
//! creation, every exec, teardown) is recorded as an [`Event`]. Each event
//! owns a private log file; when the world is destroyed the timeline renders
//! an ASCII Gantt chart and concatenates all event logs, in id order, into
//! one combined file:
//!
//! ```text
//! Event Timeline (Total: 1.204s):
//! ID  | Process Visualization
//! ----|--------------------------------------------------------------------------------
//! 000 |[#] (0.012s) World: create
//! 001 | [############################################] (0.702s) World: add alpine container t-alpine-1
//! 002 |            [##########] (0.160s) t-alpine-1: exec echo hello
//! ```
//!
//! # Id ordering
//!
//! Ids come from a single counter and are assigned in the order the
//! `new_event` critical sections run. Provisioning tasks create events
//! concurrently, so id order is *scheduling* order: two containers requested
//! in order A, B may well show up as B, A.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{info, warn};

use crate::exporter::{EventExport, TimelineExport};

/// Width of the Gantt chart in characters.
pub const TIMELINE_WIDTH: usize = 80;

/// Lock with poison recovery. Logging must keep working after a panic in
/// another task.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

/// Replaces characters that are awkward in file names.
fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Recorder of timed events for one world.
///
/// A disabled timeline ([`Timeline::disabled`]) accepts every call and
/// records nothing.
pub struct Timeline {
    inner: Option<TimelineInner>,
}

struct TimelineInner {
    /// World namespace, for log lines
    world: String,

    /// Reference point for all offsets
    start: Instant,

    /// Combined output file
    combined_path: PathBuf,
    combined: Mutex<Option<File>>,

    /// Per-event log files, removed on drop
    events_dir: TempDir,

    /// Event list and id counter. The only state shared by many tasks.
    state: Mutex<TimelineState>,

    finalized: AtomicBool,
}

#[derive(Default)]
struct TimelineState {
    events: Vec<Arc<EventRecord>>,
    next_id: u64,
}

struct EventRecord {
    id: u64,
    description: String,
    start: Instant,
    finish: Mutex<Option<Instant>>,
    sink: Mutex<Option<File>>,
}

impl EventRecord {
    /// Gantt geometry; an unfinished event runs until `end`.
    fn row(&self, timeline_start: Instant, end: Instant) -> GanttRow<'_> {
        let finish = (*lock(&self.finish)).unwrap_or(end);
        GanttRow {
            id: self.id,
            offset: self.start.saturating_duration_since(timeline_start),
            duration: finish.saturating_duration_since(self.start),
            description: &self.description,
        }
    }
}

impl TimelineInner {
    fn event_path(&self, id: u64) -> PathBuf {
        self.events_dir.path().join(format!("event_{:03}.log", id))
    }
}

impl Timeline {
    /// Creates a timeline writing `log_{world}_events.log` into `log_dir`.
    ///
    /// The directory is created if missing.
    pub fn new(world: &str, log_dir: &Path) -> io::Result<Self> {
        let start = Instant::now();

        fs::create_dir_all(log_dir)?;
        let log_dir = log_dir.canonicalize()?;
        let combined_path = log_dir.join(format!(
            "log_{}_events.log",
            sanitize_file_component(world)
        ));
        let combined = File::create(&combined_path)?;

        // Each event writes to its own file; they are concatenated at the end.
        let events_dir = tempfile::Builder::new()
            .prefix("testworld-events-")
            .tempdir()?;

        Ok(Self {
            inner: Some(TimelineInner {
                world: world.to_string(),
                start,
                combined_path,
                combined: Mutex::new(Some(combined)),
                events_dir,
                state: Mutex::new(TimelineState::default()),
                finalized: AtomicBool::new(false),
            }),
        })
    }

    /// Creates a timeline that records nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Returns true if events are recorded.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Path of the combined log file.
    pub fn log_path(&self) -> Option<&Path> {
        self.inner.as_ref().map(|inner| inner.combined_path.as_path())
    }

    /// Number of events created so far.
    pub fn event_count(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| lock(&inner.state).events.len())
    }

    /// Starts a new event.
    ///
    /// Safe to call from many tasks at once. The lock only covers id
    /// assignment and the list append; the event's log file is created and
    /// the start line written after it is released.
    pub fn new_event(&self, description: impl Into<String>) -> Event {
        let Some(inner) = &self.inner else {
            return Event::inert();
        };

        let start = Instant::now();
        let description = description.into();

        let record = {
            let mut state = lock(&inner.state);
            let record = Arc::new(EventRecord {
                id: state.next_id,
                description,
                start,
                finish: Mutex::new(None),
                sink: Mutex::new(None),
            });
            state.events.push(Arc::clone(&record));
            state.next_id += 1;
            record
        };

        let message = format!("Event {:03} start:  {}", record.id, record.description);

        match File::create(inner.event_path(record.id)) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", message) {
                    warn!("Failed to write event {:03} log: {}", record.id, e);
                }
                *lock(&record.sink) = Some(file);
            }
            Err(e) => warn!("Failed to create event {:03} log: {}", record.id, e),
        }

        info!(world = %inner.world, "{}", message);

        Event {
            record: Some(record),
        }
    }

    /// Renders the Gantt chart and concatenates all event logs.
    ///
    /// Must run after the last event has been created. Only the first call
    /// does anything. Returns the path of the combined log.
    pub fn finalize(&self) -> io::Result<Option<PathBuf>> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };
        if inner.finalized.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let end = Instant::now();
        let events = lock(&inner.state).events.clone();
        let Some(mut out) = lock(&inner.combined).take() else {
            return Ok(None);
        };

        let rows: Vec<GanttRow<'_>> = events.iter().map(|e| e.row(inner.start, end)).collect();
        render_gantt(&mut out, &rows, end.saturating_duration_since(inner.start))?;

        write!(out, "\n\nEvent Logs:\n")?;
        for event in &events {
            match File::open(inner.event_path(event.id)) {
                Ok(mut file) => {
                    io::copy(&mut file, &mut out)?;
                }
                // The sink could not be created; already reported.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        out.flush()?;

        info!(
            "World destroyed, event logs written to {}",
            inner.combined_path.display()
        );
        Ok(Some(inner.combined_path.clone()))
    }

    /// Returns a serializable view of the events recorded so far.
    ///
    /// Unfinished events are reported as running until now.
    pub fn snapshot(&self) -> Option<TimelineExport> {
        let inner = self.inner.as_ref()?;
        let now = Instant::now();
        let events = lock(&inner.state).events.clone();

        let mut export = TimelineExport::new(&inner.world);
        export.total_secs = now.saturating_duration_since(inner.start).as_secs_f64();
        for event in &events {
            let finished = lock(&event.finish).is_some();
            let row = event.row(inner.start, now);
            export.add_event(EventExport {
                id: row.id,
                description: row.description.to_string(),
                start_offset_secs: row.offset.as_secs_f64(),
                duration_secs: row.duration.as_secs_f64(),
                finished,
            });
        }
        Some(export)
    }
}

/// Handle to one recorded interval.
///
/// Cheap to clone; clones refer to the same event.
#[derive(Clone)]
pub struct Event {
    record: Option<Arc<EventRecord>>,
}

impl Event {
    /// An event that ignores every call.
    pub fn inert() -> Self {
        Self { record: None }
    }

    /// Returns true if this event records nothing.
    pub fn is_inert(&self) -> bool {
        self.record.is_none()
    }

    /// Sequence id within the world.
    pub fn id(&self) -> Option<u64> {
        self.record.as_ref().map(|r| r.id)
    }

    /// Appends raw output to the event's log. Best effort.
    pub fn write(&self, bytes: &[u8]) {
        let Some(record) = &self.record else {
            return;
        };
        if let Some(sink) = lock(&record.sink).as_mut() {
            if let Err(e) = sink.write_all(bytes) {
                warn!("Failed to write event {:03} log: {}", record.id, e);
            }
        }
    }

    /// Marks the event finished and closes its log.
    ///
    /// A second call moves the finish time but writes nothing.
    pub fn finish(&self) {
        let Some(record) = &self.record else {
            return;
        };

        let now = Instant::now();
        *lock(&record.finish) = Some(now);

        let duration = now.saturating_duration_since(record.start).as_secs_f64();
        let message = format!("Event {:03} finish: duration {:.3}s", record.id, duration);

        // Dropping the file closes it.
        if let Some(mut sink) = lock(&record.sink).take() {
            if let Err(e) = writeln!(sink, "{}", message) {
                warn!("Failed to write event {:03} log: {}", record.id, e);
            }
        }

        info!("{}", message);
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(r) => write!(f, "Event({:03} {})", r.id, r.description),
            None => write!(f, "Event(inert)"),
        }
    }
}

/// One line of the Gantt chart.
#[derive(Debug, Clone, Copy)]
pub struct GanttRow<'a> {
    pub id: u64,

    /// Start relative to the timeline start
    pub offset: Duration,

    pub duration: Duration,
    pub description: &'a str,
}

/// Start column and bar length for an interval.
///
/// Both scale linearly with `total` onto [`TIMELINE_WIDTH`] columns. The bar
/// is at least one character long so instantaneous events stay visible.
pub fn bar_geometry(offset: Duration, duration: Duration, total: Duration) -> (usize, usize) {
    let total = total.as_secs_f64();
    if total <= 0.0 {
        return (0, 1);
    }
    let width = TIMELINE_WIDTH as f64;
    // `as usize` truncates and saturates negatives to 0
    let start_pos = ((offset.as_secs_f64() / total) * width) as usize;
    let bar_len = ((duration.as_secs_f64() / total) * width) as usize;
    (start_pos, bar_len.max(1))
}

/// Writes the Gantt chart for `rows`.
pub fn render_gantt<W: Write>(out: &mut W, rows: &[GanttRow<'_>], total: Duration) -> io::Result<()> {
    writeln!(out, "Event Timeline (Total: {:.3}s):", total.as_secs_f64())?;
    writeln!(out, "ID  | Process Visualization")?;
    writeln!(out, "----|{}", "-".repeat(TIMELINE_WIDTH))?;

    for row in rows {
        let (start_pos, bar_len) = bar_geometry(row.offset, row.duration, total);
        writeln!(
            out,
            "{:03} |{}[{}] ({:.3}s) {}",
            row.id,
            " ".repeat(start_pos),
            "#".repeat(bar_len),
            row.duration.as_secs_f64(),
            row.description
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::thread;

    fn render(rows: &[GanttRow<'_>], total: Duration) -> String {
        let mut out = Vec::new();
        render_gantt(&mut out, rows, total).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_full_span_event_fills_chart() {
        let rows = [GanttRow {
            id: 0,
            offset: Duration::ZERO,
            duration: Duration::from_secs(1),
            description: "whole world",
        }];
        let chart = render(&rows, Duration::from_secs(1));
        let expected = format!("000 |[{}] (1.000s) whole world", "#".repeat(TIMELINE_WIDTH));
        assert!(chart.lines().any(|l| l == expected), "{}", chart);
    }

    #[test]
    fn test_zero_duration_event_is_visible() {
        let rows = [GanttRow {
            id: 7,
            offset: Duration::from_millis(500),
            duration: Duration::ZERO,
            description: "instant",
        }];
        let chart = render(&rows, Duration::from_secs(1));
        let expected = format!("007 |{}[#] (0.000s) instant", " ".repeat(40));
        assert!(chart.lines().any(|l| l == expected), "{}", chart);
    }

    #[test]
    fn test_chart_header() {
        let chart = render(&[], Duration::from_millis(1500));
        let lines: Vec<&str> = chart.lines().collect();
        assert_eq!(lines[0], "Event Timeline (Total: 1.500s):");
        assert_eq!(lines[1], "ID  | Process Visualization");
        assert_eq!(lines[2].len(), 5 + TIMELINE_WIDTH);
    }

    #[test]
    fn test_zero_total_does_not_divide_by_zero() {
        assert_eq!(bar_geometry(Duration::ZERO, Duration::ZERO, Duration::ZERO), (0, 1));
    }

    proptest! {
        #[test]
        fn test_bar_stays_inside_chart(
            total_ms in 1u64..100_000,
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let total = Duration::from_millis(total_ms);
            let offset = total.mul_f64(a.min(b));
            let duration = total.mul_f64((a - b).abs());

            let (start, len) = bar_geometry(offset, duration, total);

            prop_assert!(len >= 1);
            prop_assert!(start <= TIMELINE_WIDTH);
            prop_assert!(len <= TIMELINE_WIDTH);
        }
    }

    #[test]
    fn test_disabled_timeline_is_inert() {
        let timeline = Timeline::disabled();
        let event = timeline.new_event("ignored");

        assert!(event.is_inert());
        assert_eq!(event.id(), None);
        event.write(b"nothing");
        event.finish();
        event.finish();

        assert_eq!(timeline.event_count(), 0);
        assert!(timeline.finalize().unwrap().is_none());
        assert!(timeline.snapshot().is_none());
    }

    #[test]
    fn test_concurrent_ids_are_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Arc::new(Timeline::new("ids", dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let timeline = Arc::clone(&timeline);
                thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            let event = timeline.new_event(format!("task {t} step {i}"));
                            event.finish();
                            event.id().unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: BTreeSet<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(ids.len(), 200);
        assert_eq!(ids, (0..200).collect::<BTreeSet<u64>>());
    }

    #[test]
    fn test_finish_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline::new("twice", dir.path()).unwrap();

        let event = timeline.new_event("step");
        event.finish();
        event.write(b"after close\n");
        event.finish();

        let path = timeline.finalize().unwrap().unwrap();
        let log = fs::read_to_string(path).unwrap();
        assert_eq!(log.matches("Event 000 finish").count(), 1);
        assert!(!log.contains("after close"));
    }

    #[test]
    fn test_finalize_writes_chart_then_logs_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline::new("Test/Render", dir.path()).unwrap();

        let first = timeline.new_event("first");
        let second = timeline.new_event("second");
        second.write(b"output of second\n");
        second.finish();
        first.write(b"output of first\n");
        first.finish();
        let _running = timeline.new_event("never finished");

        let path = timeline.finalize().unwrap().unwrap();
        assert!(path.ends_with("log_Test_Render_events.log"));

        let log = fs::read_to_string(&path).unwrap();
        assert!(log.starts_with("Event Timeline (Total: "));
        assert!(log.contains("] (") && log.contains(") never finished"));

        let logs_at = log.find("\n\nEvent Logs:\n").unwrap();
        let first_at = log.find("output of first").unwrap();
        let second_at = log.find("output of second").unwrap();
        assert!(logs_at < first_at && first_at < second_at);
        assert!(log.contains("Event 002 start:  never finished"));

        // Only the first call does anything
        assert!(timeline.finalize().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_reports_running_events() {
        let dir = tempfile::tempdir().unwrap();
        let timeline = Timeline::new("snap", dir.path()).unwrap();

        timeline.new_event("done").finish();
        let _running = timeline.new_event("running");

        let export = timeline.snapshot().unwrap();
        assert_eq!(export.world, "snap");
        assert_eq!(export.events.len(), 2);
        assert!(export.events[0].finished);
        assert!(!export.events[1].finished);
        assert_eq!(export.events[1].id, 1);
    }
}
