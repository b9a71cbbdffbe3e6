//! SQLite 日志存储

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{LogStore, StoreError};
use crate::dispatch::DeliveryOutcome;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS message_logs (
    id INTEGER PRIMARY KEY,
    recipient TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'update',
    text TEXT,
    media TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_message_logs_created ON message_logs(created_at);";

/// 新建日志记录（管理后台写入；测试与本地调试也用）
#[derive(Debug, Clone)]
pub struct NewLogRecord {
    pub recipient: String,
    pub category: String,
    pub text: Option<String>,
    /// 媒体负载（JSON 文本）
    pub media: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 一条日志记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: i64,
    pub recipient: String,
    pub category: String,
    pub text: Option<String>,
    pub media: Option<String>,
    pub status: String,
}

#[derive(Clone)]
pub struct SqliteLogStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// 打开数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Open(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert(&self, record: NewLogRecord) -> Result<i64, StoreError> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO message_logs (recipient, category, text, media, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.recipient,
                record.category,
                record.text,
                record.media,
                record.created_at
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<LogRecord>, StoreError> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                "SELECT id, recipient, category, text, media, status FROM message_logs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(LogRecord {
                        id: row.get(0)?,
                        recipient: row.get(1)?,
                        category: row.get(2)?,
                        text: row.get(3)?,
                        media: row.get(4)?,
                        status: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn update_status(&self, id: i64, outcome: DeliveryOutcome) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE message_logs SET status = ?1 WHERE id = ?2",
            params![outcome.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn redact_media_older_than(
        &self,
        cutoff: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<usize, StoreError> {
        let db = self.db.lock().await;
        let changed = match category {
            Some(category) => db.execute(
                "UPDATE message_logs SET media = NULL
                 WHERE media IS NOT NULL AND created_at < ?1 AND category = ?2",
                params![cutoff, category],
            )?,
            None => db.execute(
                "UPDATE message_logs SET media = NULL
                 WHERE media IS NOT NULL AND created_at < ?1",
                params![cutoff],
            )?,
        };
        Ok(changed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(category: &str, age: Duration) -> NewLogRecord {
        NewLogRecord {
            recipient: "G1".to_string(),
            category: category.to_string(),
            text: Some("Lunch was great".to_string()),
            media: Some(r#"["data:image/png;base64,AAAA"]"#.to_string()),
            created_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_update_status() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let id = store.insert(record("update", Duration::zero())).await.unwrap();

        store.update_status(id, DeliveryOutcome::Sent).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, "SENT");

        let err = store.update_status(9999, DeliveryOutcome::Failed).await;
        assert!(matches!(err, Err(StoreError::NotFound(9999))));
    }

    #[tokio::test]
    async fn test_redaction_clears_media_keeps_text() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let old = store.insert(record("update", Duration::hours(16))).await.unwrap();
        let fresh = store.insert(record("update", Duration::hours(1))).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(15);
        let cleared = store.redact_media_older_than(cutoff, None).await.unwrap();
        assert_eq!(cleared, 1);

        let old = store.get(old).await.unwrap().unwrap();
        assert!(old.media.is_none());
        assert_eq!(old.text.as_deref(), Some("Lunch was great"));
        assert!(store.get(fresh).await.unwrap().unwrap().media.is_some());
    }

    #[tokio::test]
    async fn test_redaction_by_category() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let video = store
            .insert(record("ephemeral_video", Duration::minutes(10)))
            .await
            .unwrap();
        let update = store.insert(record("update", Duration::minutes(10))).await.unwrap();

        let cutoff = Utc::now() - Duration::minutes(5);
        let cleared = store
            .redact_media_older_than(cutoff, Some("ephemeral_video"))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert!(store.get(video).await.unwrap().unwrap().media.is_none());
        assert!(store.get(update).await.unwrap().unwrap().media.is_some());
    }

    #[tokio::test]
    async fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteLogStore::open(dir.path().join("nested/carebee.db")).unwrap();
        store.ping().await.unwrap();
    }
}
