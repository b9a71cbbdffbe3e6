//! 状态回写：任务结束后异步写入日志存储
//!
//! 尽力而为：写入失败只记日志、不重试。投递已经发生（或确定失败），状态只是簿记。

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::DeliveryOutcome;
use crate::store::LogStore;

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn LogStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// 后台写入；返回的句柄仅供测试等待
    pub fn report(&self, job_id: i64, outcome: DeliveryOutcome) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.update_status(job_id, outcome).await {
                Ok(()) => {
                    tracing::debug!(job_id, outcome = outcome.as_str(), "Status recorded");
                }
                Err(e) => {
                    tracing::error!(job_id, outcome = outcome.as_str(), error = %e, "Failed to record delivery status");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewLogRecord, SqliteLogStore};

    #[tokio::test]
    async fn test_report_writes_status() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let id = store
            .insert(NewLogRecord {
                recipient: "G1".to_string(),
                category: "update".to_string(),
                text: None,
                media: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let reporter = StatusReporter::new(Arc::new(store.clone()));
        reporter.report(id, DeliveryOutcome::Failed).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().status, "FAILED");
    }

    #[tokio::test]
    async fn test_report_failure_is_swallowed() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let reporter = StatusReporter::new(Arc::new(store));
        // 记录不存在：只记日志，任务正常结束
        reporter.report(404, DeliveryOutcome::Sent).await.unwrap();
    }
}
