//! Append-only event log.
//!
//! Sequence numbers are assigned under a single mutex so they are
//! gap-free and strictly increasing regardless of how
//! many subsystems call [`EventLog::append`] concurrently. Durability is
//! a background concern: [`EventLog::flush_to`] appends whatever has
//! accumulated since the last flush to a JSONL file in one batched
//! write, matching the "flushed per batch to disk" contract.

mod errors;

pub use errors::EventLogError;

use crucible_core_types::{ArtifactId, Event, EventType, PrincipalId};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

struct Inner {
    events: Vec<Event>,
    next_seq: u64,
    flushed_through: u64,
}

pub struct EventLog {
    inner: Mutex<Inner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                next_seq: 1,
                flushed_through: 0,
            }),
        }
    }

    /// Restores a log that continues numbering after a checkpoint's
    /// watermark. The in-memory buffer starts empty — events from before
    /// the restart live only in the JSONL file already flushed for them.
    pub fn resume_from_watermark(watermark: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                next_seq: watermark + 1,
                flushed_through: watermark,
            }),
        }
    }

    pub async fn append(
        &self,
        event_type: EventType,
        agent_id: Option<PrincipalId>,
        artifact_id: Option<ArtifactId>,
        data: serde_json::Value,
    ) -> Event {
        let mut guard = self.inner.lock().await;
        let seq = guard.next_seq;
        guard.next_seq += 1;
        let mut event = Event::new(seq, event_type, data);
        if let Some(agent) = agent_id {
            event = event.with_agent(agent);
        }
        if let Some(artifact) = artifact_id {
            event = event.with_artifact(artifact);
        }
        guard.events.push(event.clone());
        event
    }

    /// The last assigned sequence number, 0 if nothing has been appended
    /// since boot or resume.
    pub async fn watermark(&self) -> u64 {
        self.inner.lock().await.next_seq - 1
    }

    /// Returns events with `seq > offset`, oldest first, capped at
    /// `limit`. Only covers events appended since process boot/resume —
    /// see module docs.
    pub async fn read(&self, offset: u64, limit: usize) -> Vec<Event> {
        let guard = self.inner.lock().await;
        guard
            .events
            .iter()
            .filter(|e| e.seq > offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Appends every event accumulated since the last flush to `path` as
    /// one batched JSONL write, then advances the flush watermark.
    pub async fn flush_to(&self, path: &Path) -> Result<usize, EventLogError> {
        let mut guard = self.inner.lock().await;
        let pending: Vec<&Event> = guard
            .events
            .iter()
            .filter(|e| e.seq > guard.flushed_through)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let mut batch = String::new();
        for event in &pending {
            let line = serde_json::to_string(event).map_err(|e| EventLogError::Encode(e.to_string()))?;
            batch.push_str(&line);
            batch.push('\n');
        }
        let count = pending.len();
        let new_watermark = pending.last().map(|e| e.seq).unwrap_or(guard.flushed_through);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| EventLogError::Io(e.to_string()))?;
        file.write_all(batch.as_bytes())
            .await
            .map_err(|e| EventLogError::Io(e.to_string()))?;

        guard.flushed_through = new_watermark;
        Ok(count)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_are_gap_free_and_increasing() {
        let log = EventLog::new();
        for _ in 0..5 {
            log.append(EventType::ArtifactWritten, None, None, serde_json::json!({}))
                .await;
        }
        let events = log.read(0, 100).await;
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn read_is_paginated_by_offset_and_limit() {
        let log = EventLog::new();
        for _ in 0..10 {
            log.append(EventType::Action, None, None, serde_json::json!({}))
                .await;
        }
        let page = log.read(3, 2).await;
        assert_eq!(page.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn flush_writes_only_unflushed_events_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::new();
        log.append(EventType::Action, None, None, serde_json::json!({"n": 1}))
            .await;
        log.append(EventType::Action, None, None, serde_json::json!({"n": 2}))
            .await;

        let written = log.flush_to(&path).await.unwrap();
        assert_eq!(written, 2);

        let again = log.flush_to(&path).await.unwrap();
        assert_eq!(again, 0);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn resume_continues_numbering_after_watermark() {
        let log = EventLog::resume_from_watermark(41);
        let event = log
            .append(EventType::Action, None, None, serde_json::json!({}))
            .await;
        assert_eq!(event.seq, 42);
    }
}
