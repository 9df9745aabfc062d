//! # Background producers
//!
//! Work that blocks (waiting on the filesystem, reading stdin) happens off
//! the main thread. Results come back to the scene as [`Event`]s over an
//! `mpsc` channel and are consumed once per frame, so scripts and systems
//! never see data changing under them mid-frame.
//!
//! ```text
//! notify thread ──► FileWatcher.rx ──► poll() ──► debounce ──► Event::FileChanged
//! reader thread ──────────────────────────────────────────────► Event::Line
//!                                                        │
//!                                               scene inbox (Sender<Event>)
//! ```
//!
//! Editors write files in bursts (truncate, write, rename), so file events
//! are collapsed per path until it has been quiet for [`DEBOUNCE`].
//!
//! If the watcher cannot start (e.g. the inotify limit is reached) a warning
//! is logged and watching is disabled; the game keeps running.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::event::Event;

/// Quiet time a path needs before its change is reported.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches files and reports changes as [`Event::FileChanged`].
pub struct FileWatcher {
    watcher: Option<RecommendedWatcher>,
    rx: mpsc::Receiver<notify::Result<notify::Event>>,
    rx_disconnected: bool,
    watched: HashSet<PathBuf>,
    pending: HashMap<PathBuf, Instant>,
}

impl Default for FileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let watcher = match notify::recommended_watcher(move |res| {
            // Receiver gone means the watcher is being dropped.
            let _ = tx.send(res);
        }) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!("failed to create file watcher: {e}; file events disabled");
                None
            }
        };
        Self {
            watcher,
            rx,
            rx_disconnected: false,
            watched: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    /// `false` when the background watcher could not be started.
    pub fn is_active(&self) -> bool {
        self.watcher.is_some() && !self.rx_disconnected
    }

    /// Starts watching `path`. Returns `false` if the file does not exist or
    /// the OS refused.
    pub fn watch(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let canonical = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!("cannot watch `{}`: {e}", path.display());
                return false;
            }
        };
        if let Some(watcher) = &mut self.watcher {
            if let Err(e) = watcher.watch(&canonical, RecursiveMode::NonRecursive) {
                warn!("failed to watch `{}`: {e}", canonical.display());
                return false;
            }
        }
        debug!("watching `{}`", canonical.display());
        self.watched.insert(canonical);
        true
    }

    pub fn unwatch(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.watched.remove(&canonical) {
            if let Some(watcher) = &mut self.watcher {
                if let Err(e) = watcher.unwatch(&canonical) {
                    debug!("unwatch `{}`: {e}", canonical.display());
                }
            }
            self.pending.remove(&canonical);
        }
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    /// Drains the notify channel and returns the paths whose changes have
    /// settled.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        self.drain_channel(Instant::now());
        self.take_settled(Instant::now())
    }

    /// Polls and posts every settled change into `inbox`. Returns how many
    /// events were sent.
    pub fn forward(&mut self, inbox: &mpsc::Sender<Event>) -> usize {
        let mut sent = 0;
        for path in self.poll() {
            if inbox.send(Event::FileChanged(path)).is_err() {
                break;
            }
            sent += 1;
        }
        sent
    }

    fn drain_channel(&mut self, now: Instant) {
        if self.rx_disconnected {
            return;
        }
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    // Atomic saves show up as create events.
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        for path in &event.paths {
                            self.note_change(path, now);
                        }
                    }
                }
                Ok(Err(e)) => warn!("file watcher error: {e}"),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    warn!("file watcher disconnected; file events disabled");
                    self.rx_disconnected = true;
                    break;
                }
            }
        }
    }

    fn note_change(&mut self, path: &Path, now: Instant) {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.watched.contains(&canonical) {
            self.pending.insert(canonical, now);
        }
    }

    fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready = Vec::new();
        self.pending.retain(|path, changed| {
            if now.duration_since(*changed) >= DEBOUNCE {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });
        ready.sort();
        ready
    }
}

/// Reads `reader` line by line on a background thread and posts each line
/// as [`Event::Line`]. The thread ends at end of input or once the inbox is
/// gone.
///
/// `spawn_line_reader(std::io::stdin().lock(), scene.event_sender())` turns
/// the terminal into an input source.
pub fn spawn_line_reader<R>(reader: R, inbox: mpsc::Sender<Event>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("line reader stopped: {e}");
                    break;
                }
            };
            if inbox.send(Event::Line(line)).is_err() {
                break;
            }
        }
        debug!("line reader finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("runa_watch_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("watched.txt");
        std::fs::write(&path, "v1").unwrap();
        path
    }

    #[test]
    fn missing_file_is_not_watched() {
        let mut watcher = FileWatcher::new();
        assert!(!watcher.watch("/definitely/not/here.json"));
        assert_eq!(watcher.watched().count(), 0);
    }

    #[test]
    fn changes_settle_after_debounce() {
        let path = temp_file("debounce");
        let mut watcher = FileWatcher::new();
        assert!(watcher.watch(&path));

        let start = Instant::now();
        watcher.note_change(&path, start);
        watcher.note_change(Path::new("/not/watched"), start);
        assert!(watcher.take_settled(start + Duration::from_millis(50)).is_empty());

        // A second write restarts the quiet period.
        watcher.note_change(&path, start + Duration::from_millis(60));
        assert!(watcher.take_settled(start + Duration::from_millis(120)).is_empty());

        let ready = watcher.take_settled(start + Duration::from_millis(200));
        assert_eq!(ready, vec![path.canonicalize().unwrap()]);
        assert!(watcher.take_settled(start + Duration::from_millis(400)).is_empty());
    }

    #[test]
    fn unwatch_drops_pending_change() {
        let path = temp_file("unwatch");
        let mut watcher = FileWatcher::new();
        watcher.watch(&path);
        let now = Instant::now();
        watcher.note_change(&path, now);
        watcher.unwatch(&path);
        assert!(watcher.take_settled(now + DEBOUNCE * 2).is_empty());
    }

    #[test]
    fn line_reader_posts_lines() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn_line_reader(Cursor::new("red\ngreen\n"), tx);
        handle.join().unwrap();
        let lines: Vec<Event> = rx.try_iter().collect();
        assert_eq!(lines, vec![Event::Line("red".into()), Event::Line("green".into())]);
    }
}
