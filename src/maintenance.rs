//! 周期维护任务
//!
//! 相互独立的循环，各自按间隔运行，收到关闭信号即退出：
//! - 媒体清理：超过保留期（默认 15 小时）的记录清空媒体字段，文本保留
//! - 短时内容清理：指定类别（一次性视频）创建数分钟后即清空媒体
//! - 保活：定期查询通道会话，防止空闲断开
//! - 心跳：记录队列深度与派发器阶段
//!
//! 单次执行失败只记日志，下个周期照常运行。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MaintenanceSection;
use crate::core::DispatchState;
use crate::dispatch::JobQueue;
use crate::store::{LogStore, StoreError};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub retention: Duration,
    pub redact_interval: Duration,
    pub ephemeral_category: String,
    pub ephemeral_window: Duration,
    pub ephemeral_interval: Duration,
    pub keep_alive_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from(&MaintenanceSection::default())
    }
}

impl From<&MaintenanceSection> for MaintenanceConfig {
    fn from(cfg: &MaintenanceSection) -> Self {
        Self {
            retention: Duration::from_secs(cfg.retention_hours * 3600),
            redact_interval: Duration::from_secs(cfg.redact_interval_secs.max(1)),
            ephemeral_category: cfg.ephemeral_category.clone(),
            ephemeral_window: Duration::from_secs(cfg.ephemeral_window_secs),
            ephemeral_interval: Duration::from_secs(cfg.ephemeral_interval_secs.max(1)),
            keep_alive_interval: Duration::from_secs(cfg.keep_alive_secs.max(1)),
            heartbeat_interval: Duration::from_secs(cfg.heartbeat_secs.max(1)),
        }
    }
}

#[derive(Clone)]
pub struct MaintenanceScheduler {
    store: Arc<dyn LogStore>,
    transport: Arc<dyn Transport>,
    queue: Arc<JobQueue>,
    state: Arc<DispatchState>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(
        store: Arc<dyn LogStore>,
        transport: Arc<dyn Transport>,
        queue: Arc<JobQueue>,
        state: Arc<DispatchState>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            transport,
            queue,
            state,
            config,
        }
    }

    /// 清空超过保留期的媒体（不限类别）
    pub async fn redact_expired(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - to_chrono(self.config.retention);
        let count = self.store.redact_media_older_than(cutoff, None).await?;
        if count > 0 {
            tracing::info!(
                count,
                retention_hours = self.config.retention.as_secs() / 3600,
                "Redacted expired media"
            );
        }
        Ok(count)
    }

    /// 清空短时类别中超过窗口的媒体
    pub async fn redact_ephemeral(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - to_chrono(self.config.ephemeral_window);
        let count = self
            .store
            .redact_media_older_than(cutoff, Some(self.config.ephemeral_category.as_str()))
            .await?;
        if count > 0 {
            tracing::info!(count, category = %self.config.ephemeral_category, "Redacted ephemeral media");
        }
        Ok(count)
    }

    /// 保活：查询一次会话状态
    pub async fn keep_alive(&self) {
        match self.transport.session_state().await {
            Ok(session) if session.ready => tracing::debug!("Keep-alive ok"),
            Ok(session) => tracing::warn!(
                pending_challenge = session.has_pending_challenge,
                "Keep-alive: session not ready"
            ),
            Err(e) => tracing::warn!(error = %e, "Keep-alive failed"),
        }
    }

    pub fn heartbeat(&self) {
        let snap = self.state.snapshot();
        tracing::info!(
            queue_depth = self.queue.depth(),
            phase = ?snap.phase,
            active_job = ?snap.active_job,
            "Dispatch heartbeat"
        );
    }

    /// 启动全部循环
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let redact = {
            let this = self.clone();
            let interval = self.config.redact_interval;
            every(
                "Media redaction",
                interval,
                shutdown.clone(),
                move || {
                    let this = this.clone();
                    async move {
                        if let Err(e) = this.redact_expired().await {
                            tracing::warn!(error = %e, "Media redaction failed");
                        }
                    }
                },
            )
        };

        let ephemeral = {
            let this = self.clone();
            let interval = self.config.ephemeral_interval;
            every(
                "Ephemeral redaction",
                interval,
                shutdown.clone(),
                move || {
                    let this = this.clone();
                    async move {
                        if let Err(e) = this.redact_ephemeral().await {
                            tracing::warn!(error = %e, "Ephemeral redaction failed");
                        }
                    }
                },
            )
        };

        let keep_alive = {
            let this = self.clone();
            let interval = self.config.keep_alive_interval;
            every("Keep-alive", interval, shutdown.clone(), move || {
                let this = this.clone();
                async move { this.keep_alive().await }
            })
        };

        let heartbeat = {
            let this = self.clone();
            let interval = self.config.heartbeat_interval;
            every("Heartbeat", interval, shutdown, move || {
                let this = this.clone();
                async move { this.heartbeat() }
            })
        };

        vec![redact, ephemeral, keep_alive, heartbeat]
    }
}

/// 按固定间隔运行 task；先等一个间隔再执行第一次
fn every<F, Fut>(
    name: &'static str,
    interval: Duration,
    shutdown: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "{} loop started", name);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => task().await,
            }
        }
        tracing::info!("{} loop stopped", name);
    })
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::seconds(d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewLogRecord, SqliteLogStore};
    use crate::transport::MockTransport;

    async fn seed(store: &SqliteLogStore, category: &str, age: chrono::Duration) -> i64 {
        store
            .insert(NewLogRecord {
                recipient: "G1".to_string(),
                category: category.to_string(),
                text: Some("Lunch was great".to_string()),
                media: Some("[{\"mimeType\":\"video/mp4\"}]".to_string()),
                created_at: Utc::now() - age,
            })
            .await
            .unwrap()
    }

    fn scheduler(store: &SqliteLogStore) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            Arc::new(store.clone()),
            Arc::new(MockTransport::ready()),
            Arc::new(JobQueue::new()),
            Arc::new(DispatchState::new()),
            MaintenanceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_redact_expired_keeps_recent_and_text() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let old = seed(&store, "update", chrono::Duration::hours(16)).await;
        let fresh = seed(&store, "update", chrono::Duration::hours(14)).await;

        assert_eq!(scheduler(&store).redact_expired().await.unwrap(), 1);

        let old = store.get(old).await.unwrap().unwrap();
        assert!(old.media.is_none());
        assert_eq!(old.text.as_deref(), Some("Lunch was great"));
        assert!(store.get(fresh).await.unwrap().unwrap().media.is_some());
    }

    #[tokio::test]
    async fn test_redact_ephemeral_only_touches_category() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let video = seed(&store, "ephemeral_video", chrono::Duration::minutes(6)).await;
        let recent_video = seed(&store, "ephemeral_video", chrono::Duration::minutes(2)).await;
        let update = seed(&store, "update", chrono::Duration::minutes(6)).await;

        assert_eq!(scheduler(&store).redact_ephemeral().await.unwrap(), 1);

        assert!(store.get(video).await.unwrap().unwrap().media.is_none());
        assert!(store.get(recent_video).await.unwrap().unwrap().media.is_some());
        assert!(store.get(update).await.unwrap().unwrap().media.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_stop_on_shutdown() {
        let store = SqliteLogStore::open_in_memory().unwrap();
        let shutdown = CancellationToken::new();
        let handles = scheduler(&store).spawn(shutdown.clone());
        assert_eq!(handles.len(), 4);

        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
