//! 派发错误分类与看门狗故障
//!
//! DispatchError 决定单次投递失败后的走向：重试（超时 / 瞬时失败）或直接终止整个任务（编码错误 / 明确拒绝）。

use std::time::Duration;

use thiserror::Error;

/// 单次投递（或入口检查）可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// 会话未就绪（未登录 / 待扫码等）；入口处直接拒绝，不入队
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// 准备负载时发现格式错误，重试无意义
    #[error("Media encoding error: {0}")]
    MediaEncoding(String),

    #[error("Delivery timed out after {0:?}")]
    DeliveryTimeout(Duration),

    /// 通道明确拒绝（如收件人无效），重试无法改变结果
    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    /// 既非超时也非明确拒绝的瞬时错误（5xx、连接重置）
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl DispatchError {
    /// 是否在重试预算内继续尝试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::DeliveryTimeout(_)
                | DispatchError::DeliveryFailed(_)
                | DispatchError::TransportUnavailable(_)
        )
    }
}

/// 看门狗检测到的致命故障；不做进程内恢复，交由外部监管重启
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchdogFault {
    #[error("Dispatcher stuck in Processing for {elapsed:?} (threshold {threshold:?})")]
    StuckJob {
        elapsed: Duration,
        threshold: Duration,
    },

    #[error("Transport unresponsive: {0}")]
    TransportUnresponsive(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DispatchError::DeliveryTimeout(Duration::from_secs(30)).is_retryable());
        assert!(DispatchError::DeliveryFailed("502".into()).is_retryable());
        assert!(!DispatchError::DeliveryRejected("invalid recipient".into()).is_retryable());
        assert!(!DispatchError::MediaEncoding("bad base64".into()).is_retryable());
    }

    #[test]
    fn test_fault_display() {
        let fault = WatchdogFault::StuckJob {
            elapsed: Duration::from_secs(400),
            threshold: Duration::from_secs(360),
        };
        assert!(fault.to_string().contains("stuck"));
    }
}
