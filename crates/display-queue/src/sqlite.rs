//! SQLite-backed durable queue.

use crate::BrokerConfig;
use chrono::{SecondsFormat, Utc};
use display_types::{AckHandle, Delivery, QueueAdapter, QueueError, QueueMessage};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use uuid::Uuid;

/// Durable queue stored in a SQLite table. Several named queues may share one file.
///
/// A received row is leased by writing a receipt and pushing `visible_at` past the
/// visibility timeout. A row whose lease expired becomes visible again and is handed
/// out with `delivery_attempt + 1`.
pub struct SqliteQueue {
    conn: std::sync::Mutex<Connection>,
    config: BrokerConfig,
    notify: Notify,
    closed: AtomicBool,
}

fn sql(e: rusqlite::Error) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteQueue {
    pub fn new(path: impl AsRef<Path>, config: BrokerConfig) -> Result<Self, QueueError> {
        let conn = Connection::open(path.as_ref()).map_err(sql)?;
        tracing::debug!(path = %path.as_ref().display(), queue = %config.queue_name, "opened sqlite queue");
        Self::with_connection(conn, config)
    }

    pub fn open_in_memory(config: BrokerConfig) -> Result<Self, QueueError> {
        Self::with_connection(Connection::open_in_memory().map_err(sql)?, config)
    }

    fn with_connection(conn: Connection, config: BrokerConfig) -> Result<Self, QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                job_id TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL,
                delivery_attempt INTEGER NOT NULL,
                body TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                receipt TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_visible ON queue_messages(queue, visible_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_receipt ON queue_messages(receipt);
            "#,
        )
        .map_err(sql)?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            config,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Connection) -> Result<T, QueueError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("failed to acquire lock: {}", e)))?;
        f(&mut conn)
    }

    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn try_lease(&self) -> Result<Option<Delivery>, QueueError> {
        let queue = self.config.queue_name.clone();
        let lease_ms = self.config.visibility_timeout.as_millis() as i64;
        self.with_conn(|conn| {
            let now = now_ms();
            let tx = conn.transaction().map_err(sql)?;
            let row: Option<(i64, String, u32, Option<String>)> = tx
                .query_row(
                    "SELECT seq, body, delivery_attempt, receipt FROM queue_messages
                     WHERE queue = ?1 AND visible_at <= ?2
                     ORDER BY priority DESC, enqueued_at ASC, seq ASC LIMIT 1",
                    params![queue, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()
                .map_err(sql)?;
            let Some((seq, body, attempt, previous_receipt)) = row else {
                return Ok(None);
            };
            // A leftover receipt means the previous lease expired unacknowledged.
            let attempt = if previous_receipt.is_some() {
                attempt + 1
            } else {
                attempt
            };
            let receipt = Uuid::new_v4().to_string();
            tx.execute(
                "UPDATE queue_messages SET receipt = ?1, visible_at = ?2, delivery_attempt = ?3 WHERE seq = ?4",
                params![receipt, now + lease_ms, attempt, seq],
            )
            .map_err(sql)?;
            tx.commit().map_err(sql)?;

            let mut message = QueueMessage::from_json(&body)?;
            message.delivery_attempt = attempt;
            if previous_receipt.is_some() {
                tracing::warn!(
                    job_id = %message.job_id,
                    attempt,
                    "visibility timeout elapsed, redelivering"
                );
            }
            Ok(Some(Delivery {
                message,
                handle: AckHandle::new(receipt),
            }))
        })
    }
}

#[async_trait::async_trait]
impl QueueAdapter for SqliteQueue {
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.check_open()?;
        let body = message.to_json()?;
        let queue = self.config.queue_name.clone();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_messages (queue, job_id, priority, enqueued_at, delivery_attempt, body, visible_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    queue,
                    message.job_id.to_string(),
                    message.priority,
                    message.enqueued_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    message.delivery_attempt,
                    body,
                    now_ms(),
                ],
            )
            .map_err(sql)?;
            Ok(())
        })?;
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        loop {
            self.check_open()?;
            if let Some(delivery) = self.try_lease()? {
                return Ok(delivery);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let queue = self.config.queue_name.clone();
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM queue_messages WHERE queue = ?1 AND receipt = ?2",
                params![queue, handle.as_str()],
            )
            .map_err(sql)
        })?;
        if deleted == 0 {
            return Err(QueueError::UnknownHandle(handle.to_string()));
        }
        Ok(())
    }

    async fn nack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let queue = self.config.queue_name.clone();
        let visible_at = now_ms() + self.config.redelivery_delay.as_millis() as i64;
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE queue_messages SET receipt = NULL, visible_at = ?1, delivery_attempt = delivery_attempt + 1
                 WHERE queue = ?2 AND receipt = ?3",
                params![visible_at, queue, handle.as_str()],
            )
            .map_err(sql)
        })?;
        if updated == 0 {
            return Err(QueueError::UnknownHandle(handle.to_string()));
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn queue_depth(&self) -> Result<usize, QueueError> {
        let queue = self.config.queue_name.clone();
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND (receipt IS NULL OR visible_at <= ?2)",
                    params![queue, now_ms()],
                    |row| row.get(0),
                )
                .map_err(sql)?;
            Ok(n as usize)
        })
    }
}
