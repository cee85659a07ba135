//! Redis Streams-backed queue store.
//!
//! - **Enqueue**: `XADD <queue> MAXLEN ~ <n> *`
//! - **Groups**: `XGROUP CREATE <queue> <group> 0 MKSTREAM` (BUSYGROUP ignored)
//! - **Read**: `XREADGROUP ... STREAMS <queue> >`
//! - **Ack**: `XACK`, then `XDEL` if it acked, in one script, so `XLEN` reports
//!   outstanding backlog
//! - **Reclaim**: `XPENDING` + `XCLAIM` (bumps the delivery counter)

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{Error, Fields, JobId, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamInfoGroupsReply, StreamPendingCountReply,
    StreamPendingReply, StreamReadReply,
};
use redis::{RedisError, RedisResult, Script};
use tracing::{debug, info};

use crate::store::{PendingEntry, QueueStore, StreamEntry};

/// Upper bound on pending entries inspected per reclaim pass.
const RECLAIM_SCAN_LIMIT: usize = 1000;

/// Deletes the entry only when this group was holding it.
static ACK_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('XACK', KEYS[1], ARGV[1], ARGV[2]) == 1 then
    redis.call('XDEL', KEYS[1], ARGV[2])
    return 1
end
return 0
",
    )
});

/// Maps a redis error, separating unreachable-store failures from rejected commands.
fn map_err(context: &str, e: RedisError) -> Error {
    if is_connectivity(&e) {
        Error::connectivity(format!("{context}: {e}"))
    } else {
        Error::command(format!("{context}: {e}"))
    }
}

fn is_connectivity(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
}

fn stream_fields(entry: StreamId) -> Fields {
    entry
        .map
        .into_iter()
        .filter_map(|(k, v)| redis::from_redis_value::<String>(&v).ok().map(|v| (k, v)))
        .collect()
}

/// Queue store over Redis Streams.
pub struct RedisStreamsStore {
    client: redis::Client,
    conn: ConnectionManager,
    /// Blocking reads stall a multiplexed connection, so each consumer gets its own.
    readers: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisStreamsStore {
    /// Connects to Redis (e.g. "redis://localhost:6379/0").
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| map_err("connect", e))?;

        info!("Connected to Redis queue store");

        Ok(Self {
            client,
            conn,
            readers: Mutex::new(HashMap::new()),
        })
    }

    async fn reader(&self, consumer: &str) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.readers.lock().get(consumer) {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_err("reader connect", e))?;
        self.readers
            .lock()
            .insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    fn drop_reader(&self, consumer: &str) {
        self.readers.lock().remove(consumer);
    }
}

#[async_trait]
impl QueueStore for RedisStreamsStore {
    async fn enqueue(&self, queue: &str, fields: &Fields, max_len: Option<usize>) -> Result<JobId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(queue);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("XADD", e))?;
        Ok(JobId::new(id))
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        redis::cmd("XLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("XLEN", e))
    }

    async fn delete(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("DEL", e))?;
        Ok(())
    }

    async fn ensure_group(&self, queue: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!(queue = %queue, group = %group, "XGROUP CREATE");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::group_creation(format!("{queue}/{group}: {e}"))),
        }
    }

    async fn group_exists(&self, queue: &str, group: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamInfoGroupsReply> = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(queue)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(info) => Ok(info.groups.iter().any(|g| g.name == group)),
            // Missing key: no queue, so no group either.
            Err(e) if !is_connectivity(&e) && e.to_string().contains("no such key") => Ok(false),
            Err(e) => Err(map_err("XINFO GROUPS", e)),
        }
    }

    async fn read_group(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        // BLOCK 0 means "forever" to Redis; a zero timeout means "don't block" here.
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(queue).arg(">");

        let mut conn = self.reader(consumer).await?;
        let reply: Option<StreamReadReply> = match cmd.query_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) => {
                if is_connectivity(&e) {
                    self.drop_reader(consumer);
                }
                return Err(map_err("XREADGROUP", e));
            }
        };

        let entries: Vec<StreamEntry> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| StreamEntry {
                id: JobId::new(entry.id.clone()),
                fields: stream_fields(entry),
            })
            .collect();

        if !entries.is_empty() {
            debug!(queue = %queue, consumer = %consumer, count = entries.len(), "XREADGROUP");
        }
        Ok(entries)
    }

    async fn ack(&self, queue: &str, group: &str, id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acked: u64 = ACK_SCRIPT
            .key(queue)
            .arg(group)
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_err("XACK", e))?;
        Ok(acked > 0)
    }

    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamPendingReply> = redis::cmd("XPENDING")
            .arg(queue)
            .arg(group)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(reply) => Ok(reply.count() as u64),
            Err(e) if e.code() == Some("NOGROUP") => Ok(0),
            Err(e) => Err(map_err("XPENDING", e)),
        }
    }

    async fn pending(&self, queue: &str, group: &str, limit: usize) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: RedisResult<StreamPendingCountReply> = redis::cmd("XPENDING")
            .arg(queue)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(limit)
            .query_async(&mut conn)
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOGROUP") => return Ok(Vec::new()),
            Err(e) => return Err(map_err("XPENDING", e)),
        };

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: JobId::new(p.id),
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                delivery_count: p.times_delivered as u64,
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
        let stale: Vec<String> = self
            .pending(queue, group, RECLAIM_SCAN_LIMIT)
            .await?
            .into_iter()
            .filter(|p| p.idle >= min_idle)
            .map(|p| p.id.to_string())
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        // No JUSTID: the full form increments the delivery counter.
        let mut conn = self.conn.clone();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(queue)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(&stale)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("XCLAIM", e))?;

        Ok(claimed.ids.into_iter().map(|e| JobId::new(e.id)).collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("PING", e))?;
        Ok(())
    }
}
