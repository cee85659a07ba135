//! In-process queue store.
//!
//! Mirrors Redis Streams semantics closely enough for single-process runs
//! and tests: `<millis>-<seq>` ids, `>`-style group cursors, per-entry
//! pending state with delivery counts, and exact MAXLEN trimming.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Error, Fields, JobId, Result};
use tokio::sync::Notify;
use tracing::debug;

use crate::store::{PendingEntry, QueueStore, StreamEntry};

type Position = (u64, u64);

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivery_count: u64,
    last_delivered_at: Instant,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Last position handed out; `None` means the start of the queue.
    last_delivered: Option<Position>,
    pending: BTreeMap<Position, PendingState>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<Position, Fields>,
    last_id: Position,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self) -> Position {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now > self.last_id.0 {
            (now, 0)
        } else {
            (self.last_id.0, self.last_id.1 + 1)
        };
        self.last_id = id;
        id
    }
}

/// In-memory queue store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries one non-blocking delivery.
    fn deliver(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock();
        let stream = streams.get_mut(queue).ok_or_else(|| no_group(queue, group))?;
        let StreamState {
            entries, groups, ..
        } = stream;
        let state = groups.get_mut(group).ok_or_else(|| no_group(queue, group))?;

        let lower = match state.last_delivered {
            Some(pos) => Excluded(pos),
            None => Unbounded,
        };
        let batch: Vec<(Position, Fields)> = entries
            .range((lower, Unbounded))
            .take(count)
            .map(|(pos, fields)| (*pos, fields.clone()))
            .collect();

        let now = Instant::now();
        for (pos, _) in &batch {
            state.last_delivered = Some(*pos);
            state.pending.insert(
                *pos,
                PendingState {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                    last_delivered_at: now,
                },
            );
        }

        Ok(batch
            .into_iter()
            .map(|((millis, seq), fields)| StreamEntry {
                id: JobId::from_parts(millis, seq),
                fields,
            })
            .collect())
    }
}

fn no_group(queue: &str, group: &str) -> Error {
    Error::command(format!("NOGROUP no such group '{group}' for queue '{queue}'"))
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, queue: &str, fields: &Fields, max_len: Option<usize>) -> Result<JobId> {
        let id = {
            let mut streams = self.streams.lock();
            let stream = streams.entry(queue.to_string()).or_default();
            let id = stream.next_id();
            stream.entries.insert(id, fields.clone());

            if let Some(max_len) = max_len {
                while stream.entries.len() > max_len {
                    stream.entries.pop_first();
                }
            }
            id
        };

        self.appended.notify_waiters();
        Ok(JobId::from_parts(id.0, id.1))
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        Ok(self
            .streams
            .lock()
            .get(queue)
            .map(|s| s.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn delete(&self, queue: &str) -> Result<()> {
        self.streams.lock().remove(queue);
        Ok(())
    }

    async fn ensure_group(&self, queue: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.lock();
        let stream = streams.entry(queue.to_string()).or_default();
        if !stream.groups.contains_key(group) {
            stream.groups.insert(group.to_string(), GroupState::default());
            debug!(queue = %queue, group = %group, "Created consumer group");
        }
        Ok(())
    }

    async fn group_exists(&self, queue: &str, group: &str) -> Result<bool> {
        Ok(self
            .streams
            .lock()
            .get(queue)
            .is_some_and(|s| s.groups.contains_key(group)))
    }

    async fn read_group(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        // An unrepresentable deadline blocks until the next append.
        let deadline = Instant::now().checked_add(block);

        loop {
            // Register interest before looking so an append between the check
            // and the wait still wakes us.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batch = self.deliver(queue, group, consumer, count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    let _ = tokio::time::timeout(deadline - now, appended).await;
                }
                None => appended.await,
            }
        }
    }

    async fn ack(&self, queue: &str, group: &str, id: &JobId) -> Result<bool> {
        let Some(pos) = id.parts() else {
            return Ok(false);
        };

        let mut streams = self.streams.lock();
        let Some(stream) = streams.get_mut(queue) else {
            return Ok(false);
        };

        let was_pending = stream
            .groups
            .get_mut(group)
            .is_some_and(|g| g.pending.remove(&pos).is_some());
        // Entries nobody in this group was holding stay in the log.
        if was_pending {
            stream.entries.remove(&pos);
        }

        Ok(was_pending)
    }

    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64> {
        Ok(self
            .streams
            .lock()
            .get(queue)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }

    async fn pending(&self, queue: &str, group: &str, limit: usize) -> Result<Vec<PendingEntry>> {
        let streams = self.streams.lock();
        let Some(state) = streams.get(queue).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        Ok(state
            .pending
            .iter()
            .take(limit)
            .map(|((millis, seq), p)| PendingEntry {
                id: JobId::from_parts(*millis, *seq),
                consumer: p.consumer.clone(),
                idle: now.saturating_duration_since(p.last_delivered_at),
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    async fn reclaim(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<JobId>> {
        let mut streams = self.streams.lock();
        let stream = streams.get_mut(queue).ok_or_else(|| no_group(queue, group))?;
        let StreamState {
            entries, groups, ..
        } = stream;
        let state = groups.get_mut(group).ok_or_else(|| no_group(queue, group))?;

        let now = Instant::now();
        let mut claimed = Vec::new();

        // Entries trimmed from the queue cannot be redelivered; drop them.
        state.pending.retain(|pos, _| entries.contains_key(pos));

        for ((millis, seq), pending) in state.pending.iter_mut() {
            if now.saturating_duration_since(pending.last_delivered_at) < min_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivery_count += 1;
            pending.last_delivered_at = now;
            claimed.push(JobId::from_parts(*millis, *seq));
        }

        Ok(claimed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
