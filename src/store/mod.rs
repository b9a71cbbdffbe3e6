//! 消息日志存储
//!
//! 日志表由管理后台维护；派发引擎只写状态字段，维护任务只清空媒体字段。

mod sqlite;

pub use sqlite::{LogRecord, NewLogRecord, SqliteLogStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dispatch::DeliveryOutcome;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Log record not found: {0}")]
    NotFound(i64),

    #[error("Failed to open store: {0}")]
    Open(String),
}

/// 日志存储
#[async_trait]
pub trait LogStore: Send + Sync {
    /// 写入最终投递结果
    async fn update_status(&self, id: i64, outcome: DeliveryOutcome) -> Result<(), StoreError>;

    /// 清空早于 cutoff 的记录的媒体字段（文本保留）；category 为 None 时不限类别。返回清理条数
    async fn redact_media_older_than(
        &self,
        cutoff: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<usize, StoreError>;

    /// 启动探测：存储是否可用
    async fn ping(&self) -> Result<(), StoreError>;
}
