//! 派发状态：Dispatcher 唯一写入，Watchdog / HTTP 入口只读
//!
//! 阶段（Idle / Processing / Cooldown）与当前任务的开始时间放在同一个对象里，避免散落的全局标志。

use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// 派发器阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DispatcherPhase {
    Idle,
    Processing,
    Cooldown,
}

/// 某一时刻的状态快照
#[derive(Clone, Debug)]
pub struct DispatchSnapshot {
    pub phase: DispatcherPhase,
    /// 正在处理的任务（日志记录 ID）
    pub active_job: Option<i64>,
    pub active_job_started_at: Option<Instant>,
}

impl Default for DispatchSnapshot {
    fn default() -> Self {
        Self {
            phase: DispatcherPhase::Idle,
            active_job: None,
            active_job_started_at: None,
        }
    }
}

/// 共享派发状态
#[derive(Debug, Default)]
pub struct DispatchState {
    inner: RwLock<DispatchSnapshot>,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn phase(&self) -> DispatcherPhase {
        self.snapshot().phase
    }

    /// 持续处于 Processing 的时长；非 Processing 时为 None
    pub fn processing_elapsed(&self, now: Instant) -> Option<Duration> {
        let snap = self.snapshot();
        match (snap.phase, snap.active_job_started_at) {
            (DispatcherPhase::Processing, Some(started)) => {
                Some(now.saturating_duration_since(started))
            }
            _ => None,
        }
    }

    /// Idle/Cooldown -> Processing；已在 Processing 时返回 false
    pub(crate) fn begin_processing(&self, job_id: i64) -> bool {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.phase == DispatcherPhase::Processing {
            return false;
        }
        guard.phase = DispatcherPhase::Processing;
        guard.active_job = Some(job_id);
        guard.active_job_started_at = Some(Instant::now());
        true
    }

    pub(crate) fn enter_cooldown(&self) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.phase = DispatcherPhase::Cooldown;
        guard.active_job = None;
        guard.active_job_started_at = None;
    }

    pub(crate) fn enter_idle(&self) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.phase = DispatcherPhase::Idle;
    }
}
