//! In-memory queue store
//!
//! Used when no queue store path is configured. Snapshots are written as a
//! single JSON document.

use crate::storage::traits::{QueueStore, StorageError, StorageResult};
use crate::uri::CrawlUri;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Queue store keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: HashMap<String, BTreeMap<(u8, u64), CrawlUri>>,
    seen: HashSet<String>,
    next_seq: u64,
}

/// Serialized form of a [`MemoryQueueStore`]
#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_seq: u64,
    pending: Vec<PendingEntry>,
    seen: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PendingEntry {
    key: String,
    precedence: u8,
    seq: u64,
    uri: CrawlUri,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn push(&mut self, key: &str, precedence: u8, uri: &CrawlUri) -> StorageResult<()> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queues
            .entry(key.to_string())
            .or_default()
            .insert((precedence, seq), uri.clone());
        Ok(())
    }

    fn pop(&mut self, key: &str) -> StorageResult<Option<CrawlUri>> {
        let Some(queue) = self.queues.get_mut(key) else {
            return Ok(None);
        };
        let head = queue.pop_first().map(|(_, uri)| uri);
        if queue.is_empty() {
            self.queues.remove(key);
        }
        Ok(head)
    }

    fn len(&self, key: &str) -> StorageResult<usize> {
        Ok(self.queues.get(key).map_or(0, BTreeMap::len))
    }

    fn queues(&self) -> StorageResult<Vec<(String, usize)>> {
        // oldest entry first, matching the SQLite store
        let mut queues: Vec<(u64, String, usize)> = self
            .queues
            .iter()
            .map(|(key, queue)| {
                let oldest = queue.keys().map(|(_, seq)| *seq).min().unwrap_or(0);
                (oldest, key.clone(), queue.len())
            })
            .collect();
        queues.sort();
        Ok(queues.into_iter().map(|(_, key, len)| (key, len)).collect())
    }

    fn mark_seen(&mut self, canonical: &str) -> StorageResult<bool> {
        Ok(self.seen.insert(canonical.to_string()))
    }

    fn checkpoint(&mut self, path: &Path) -> StorageResult<()> {
        let mut pending = Vec::new();
        for (key, queue) in &self.queues {
            for ((precedence, seq), uri) in queue {
                pending.push(PendingEntry {
                    key: key.clone(),
                    precedence: *precedence,
                    seq: *seq,
                    uri: uri.clone(),
                });
            }
        }
        pending.sort_by_key(|entry| entry.seq);

        let mut seen: Vec<String> = self.seen.iter().cloned().collect();
        seen.sort();

        let snapshot = Snapshot {
            next_seq: self.next_seq,
            pending,
            seen,
        };
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &snapshot)?;
        Ok(())
    }

    fn recover(&mut self, path: &Path) -> StorageResult<()> {
        if !path.exists() {
            return Err(StorageError::SnapshotNotFound(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(std::io::BufReader::new(file))?;

        self.queues.clear();
        for entry in snapshot.pending {
            self.queues
                .entry(entry.key)
                .or_default()
                .insert((entry.precedence, entry.seq), entry.uri);
        }
        self.seen = snapshot.seen.into_iter().collect();
        self.next_seq = snapshot.next_seq;
        Ok(())
    }

    fn snapshot_file_name(&self) -> &'static str {
        "queues.json"
    }
}
