//! 关闭与故障升级
//!
//! 统一的关闭信号：
//! - Ctrl+C / SIGTERM：优雅退出，派发器做完当前任务再停
//! - 看门狗故障：记录为 Fatal，由 main 以非零退出码结束进程，重启策略交给外部进程监管
//!
//! 重启本身不在派发组件内实现。

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::WatchdogFault;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
    /// 仅在致命故障时取消：进行中的投递立即中止，不再排空
    fatal_token: CancellationToken,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
    /// 第一次触发的原因，后续触发不覆盖
    first_reason: Arc<Mutex<Option<ShutdownReason>>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 致命故障（看门狗 / 启动探测失败）
    Fatal(String),
}

impl ShutdownReason {
    /// 进程退出码：致命故障非零，便于监管进程区分
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Fatal(_) => 1,
            _ => 0,
        }
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            shutdown_token: CancellationToken::new(),
            fatal_token: CancellationToken::new(),
            reason_tx,
            first_reason: Arc::new(Mutex::new(None)),
        }
    }

    /// 获取关闭 token（后台循环据此退出）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 致命故障 token；优雅关闭不会取消它
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        if matches!(reason, ShutdownReason::Fatal(_)) {
            self.fatal_token.cancel();
        }
        {
            let mut first = self
                .first_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if first.is_none() {
                *first = Some(reason.clone());
            }
        }
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    /// 看门狗升级：记录致命原因并触发关闭
    pub fn escalate(&self, fault: &WatchdogFault) {
        tracing::error!(fault = %fault, "Fatal fault raised, escalating to process supervisor");
        self.shutdown(ShutdownReason::Fatal(fault.to_string()));
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 第一次关闭的原因；未关闭时为 None
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.first_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
