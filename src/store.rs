//! File-backed append-only event store with a derived reference index.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use rand::{seq::SliceRandom, thread_rng};
use serde_json::to_writer;
use tokio::sync::watch;

use crate::codec;
use crate::event::Event;
use crate::game::MovePayload;

/// Persistent store for events and indexes rooted at `root`.
///
/// Events are append-only: nothing is ever updated or deleted, so readers
/// need no locking against the single appender beyond atomic file writes.
/// Every successful ingest bumps a revision counter that resolvers watch to
/// know when to re-run.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    verify_sig: bool,
    revision: Arc<watch::Sender<u64>>,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf, verify_sig: bool) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            root,
            verify_sig,
            revision: Arc::new(revision),
        }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        let dirs = ["events", "log", "index/by-ref", "index/by-author"];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Receiver for the store revision; changes whenever an event lands.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Signal observers that the store may have changed outside this handle,
    /// e.g. another process appended to the same directory tree.
    pub fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Ingest an event if it doesn't already exist on disk.
    pub fn ingest(&self, ev: &Event) -> Result<()> {
        // Optionally verify the event's id and Schnorr signature before writing.
        if self.verify_sig {
            codec::verify(ev)?;
        }
        if ev.id.len() < 4 || !ev.id.is_ascii() {
            return Err(anyhow!("malformed event id"));
        }
        // Skip ingest if the event already exists on disk.
        let path = self.event_path(&ev.id);
        if path.exists() {
            return Ok(());
        }
        // Write the event JSON atomically to its canonical path.
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        to_writer(&tmp, ev)?;
        tmp.persist(&path)?;

        // Append the event to a newline-delimited log for easy tailing.
        let log_path = self.root.join("log/events.ndjson");
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        serde_json::to_writer(&mut log_file, ev)?;
        log_file.write_all(b"\n")?;

        self.index_event(ev)?;
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Load an event by id, if present.
    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        if id.len() < 4 || !id.is_ascii() {
            return Ok(None);
        }
        let path = self.event_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Load all events whose `e` tags reference `id`.
    ///
    /// Order is unspecified; callers needing determinism sort themselves.
    pub fn find_events_targeting(&self, id: &str) -> Result<Vec<Event>> {
        let path = self.root.join("index/by-ref").join(format!("{}.txt", id));
        let mut events = vec![];
        for source in read_ids(&path)? {
            if let Some(ev) = self.get(&source)? {
                events.push(ev);
            }
        }
        Ok(events)
    }

    /// Count events whose `e` tags reference `id`.
    pub fn count_events_targeting(&self, id: &str) -> Result<usize> {
        let path = self.root.join("index/by-ref").join(format!("{}.txt", id));
        Ok(read_ids(&path)?.len())
    }

    /// Load all game-root events observed so far, oldest claimed first.
    pub fn game_roots(&self) -> Result<Vec<Event>> {
        let path = self.root.join("index/games.txt");
        let mut events = vec![];
        for id in read_ids(&path)? {
            if let Some(ev) = self.get(&id)? {
                events.push(ev);
            }
        }
        events.sort_by_key(|e| (e.created_at, e.id.clone()));
        Ok(events)
    }

    /// Verify signatures for a random sample of stored events.
    pub fn verify_sample(&self, sample: usize) -> Result<usize> {
        let mut paths = vec![];
        for entry in walkdir::WalkDir::new(self.root.join("events")) {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        let mut rng = thread_rng();
        paths.shuffle(&mut rng);
        let take = sample.min(paths.len());
        for p in paths.iter().take(take) {
            let data = fs::read_to_string(p)?;
            let ev: Event = serde_json::from_str(&data)?;
            codec::verify(&ev)?;
        }
        Ok(take)
    }

    /// Rebuild all indexes from the `events/` tree.
    pub fn reindex(&self) -> Result<()> {
        let index_dir = self.root.join("index");
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        fs::create_dir_all(self.root.join("index/by-ref"))?;
        fs::create_dir_all(self.root.join("index/by-author"))?;

        for entry in walkdir::WalkDir::new(self.root.join("events")) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let data = fs::read_to_string(entry.path())?;
                let ev: Event = serde_json::from_str(&data)?;
                self.index_event(&ev)?;
            }
        }
        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Update reference, author, and game indexes for an event.
    fn index_event(&self, ev: &Event) -> Result<()> {
        self.append_index("index/by-author", &ev.pubkey, &ev.id)?;
        for target in ev.referenced_ids() {
            self.append_index("index/by-ref", target, &ev.id)?;
        }
        if let Some(payload) = MovePayload::parse(&ev.content) {
            if payload.is_start() {
                self.append_index("index", "games", &ev.id)?;
            }
        }
        Ok(())
    }

    /// Append an event ID to the index file under `prefix/name.txt`.
    fn append_index(&self, prefix: &str, name: &str, id: &str) -> Result<()> {
        let path = self.root.join(prefix).join(format!("{}.txt", name));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(f, "{}", id)?;
        Ok(())
    }

    /// Compute the canonical path for an event ID.
    fn event_path(&self, id: &str) -> PathBuf {
        let sub1 = &id[0..2];
        let sub2 = &id[2..4];
        self.root
            .join("events")
            .join(sub1)
            .join(sub2)
            .join(format!("{}.json", id))
    }
}

/// Read newline-separated IDs from a text file.
fn read_ids(path: &Path) -> Result<std::collections::HashSet<String>> {
    if !path.exists() {
        return Ok(Default::default());
    }
    let data = fs::read_to_string(path)?;
    Ok(data.lines().map(|s| s.to_string()).collect())
}
