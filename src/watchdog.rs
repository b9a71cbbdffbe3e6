//! 看门狗
//!
//! 每个 tick 做两项检查：
//! - 卡死：派发器持续处于 Processing 超过阈值
//! - 存活：在短超时内查询通道会话状态，超时或出错即视为无响应
//!
//! 任一故障都是致命的：通过 ShutdownManager 升级，由外部监管重启进程。
//! 看门狗只读派发状态，从不修改队列或状态。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::config::WatchdogSection;
use crate::core::{DispatchState, ShutdownManager, WatchdogFault};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub tick: Duration,
    pub stuck_threshold: Duration,
    pub probe_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from(&WatchdogSection::default())
    }
}

impl From<&WatchdogSection> for WatchdogConfig {
    fn from(cfg: &WatchdogSection) -> Self {
        Self {
            tick: Duration::from_secs(cfg.tick_secs.max(1)),
            stuck_threshold: Duration::from_secs(cfg.stuck_threshold_secs),
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
        }
    }
}

pub struct Watchdog {
    state: Arc<DispatchState>,
    transport: Arc<dyn Transport>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(
        state: Arc<DispatchState>,
        transport: Arc<dyn Transport>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            state,
            transport,
            config,
        }
    }

    /// 卡死检查
    pub fn check_stuck(&self) -> Result<(), WatchdogFault> {
        match self.state.processing_elapsed(Instant::now()) {
            Some(elapsed) if elapsed > self.config.stuck_threshold => Err(WatchdogFault::StuckJob {
                elapsed,
                threshold: self.config.stuck_threshold,
            }),
            _ => Ok(()),
        }
    }

    /// 存活探测；会话未就绪但能按时应答不算故障
    pub async fn probe(&self) -> Result<(), WatchdogFault> {
        match tokio::time::timeout(self.config.probe_timeout, self.transport.session_state()).await
        {
            Ok(Ok(session)) => {
                if !session.ready {
                    tracing::warn!(
                        pending_challenge = session.has_pending_challenge,
                        "Transport session not ready"
                    );
                }
                Ok(())
            }
            Ok(Err(e)) => Err(WatchdogFault::TransportUnresponsive(e.to_string())),
            Err(_) => Err(WatchdogFault::TransportUnresponsive(format!(
                "session probe timed out after {:?}",
                self.config.probe_timeout
            ))),
        }
    }

    /// 单次检查（先卡死后探测）
    pub async fn check_once(&self) -> Result<(), WatchdogFault> {
        self.check_stuck()?;
        self.probe().await
    }

    /// 周期检查；发现故障即升级并退出
    pub async fn run(self, shutdown: ShutdownManager) {
        let token = shutdown.token();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_secs = self.config.tick.as_secs(),
            stuck_threshold_secs = self.config.stuck_threshold.as_secs(),
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(fault) = self.check_once().await {
                        shutdown.escalate(&fault);
                        break;
                    }
                    tracing::debug!(phase = ?self.state.phase(), "Watchdog tick ok");
                }
            }
        }

        tracing::info!("Watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DispatchError, ShutdownReason};
    use crate::transport::{MockOutcome, MockTransport};

    fn watchdog(transport: Arc<MockTransport>) -> (Arc<DispatchState>, Watchdog) {
        let state = Arc::new(DispatchState::new());
        let dog = Watchdog::new(Arc::clone(&state), transport, WatchdogConfig::default());
        (state, dog)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_and_healthy_is_ok() {
        let (_, dog) = watchdog(Arc::new(MockTransport::ready()));
        assert!(dog.check_once().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_processing_is_fault() {
        let (state, dog) = watchdog(Arc::new(MockTransport::ready()));
        assert!(state.begin_processing(1));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(dog.check_stuck().is_ok());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(
            dog.check_stuck(),
            Err(WatchdogFault::StuckJob { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_fault() {
        let transport = Arc::new(MockTransport::ready());
        transport.set_probe(MockOutcome::Hang);
        let (_, dog) = watchdog(transport);

        let start = Instant::now();
        assert!(matches!(
            dog.probe().await,
            Err(WatchdogFault::TransportUnresponsive(_))
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_is_fault_but_not_ready_is_not() {
        let (_, dog) = watchdog(Arc::new(MockTransport::not_ready()));
        assert!(dog.probe().await.is_ok());

        let transport = Arc::new(MockTransport::ready());
        transport.set_probe(MockOutcome::Fail(DispatchError::TransportUnavailable(
            "bridge down".into(),
        )));
        let (_, dog) = watchdog(transport);
        assert!(dog.probe().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_escalates_fatal() {
        let transport = Arc::new(MockTransport::ready());
        transport.set_probe(MockOutcome::Hang);
        let (_, dog) = watchdog(transport);

        let shutdown = ShutdownManager::new();
        dog.run(shutdown.clone()).await;

        assert!(shutdown.is_shutdown());
        let reason = shutdown.reason().unwrap();
        assert!(matches!(reason, ShutdownReason::Fatal(_)));
        assert_ne!(reason.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_escalates_stuck_job_within_one_tick() {
        let (state, dog) = watchdog(Arc::new(MockTransport::ready()));
        assert!(state.begin_processing(1));
        let shutdown = ShutdownManager::new();
        let handle = tokio::spawn(dog.run(shutdown.clone()));

        // 360s 阈值 + 60s tick：419s 时仍未升级
        tokio::time::sleep(Duration::from_secs(419)).await;
        assert_eq!(shutdown.reason(), None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
        match shutdown.reason() {
            Some(ShutdownReason::Fatal(msg)) => assert!(msg.contains("stuck"), "{msg}"),
            other => panic!("expected fatal stuck job, got {other:?}"),
        }
        assert!(shutdown.fatal_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let (_, dog) = watchdog(Arc::new(MockTransport::ready()));
        let shutdown = ShutdownManager::new();
        let handle = tokio::spawn(dog.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.shutdown(ShutdownReason::Signal);
        handle.await.unwrap();
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Signal));
    }
}
