//! 重试与降级策略
//!
//! 每个媒体项最多 max_attempts 次尝试，单次超时按类别（图片短、视频长），
//! 失败后等待 attempt * backoff_step。视频在原生模式失败后，下一次改为附件模式，且不再回到原生。
//! 编码错误与明确拒绝直接返回，不消耗剩余次数。

use std::future::Future;
use std::time::Duration;

use super::{ItemReport, MimeClass, SendMode};
use crate::config::DispatchSection;
use crate::core::DispatchError;
use crate::transport::MediaOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub image_timeout: Duration,
    pub video_timeout: Duration,
    pub other_timeout: Duration,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DispatchSection::default())
    }
}

impl From<&DispatchSection> for RetryPolicy {
    fn from(cfg: &DispatchSection) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            image_timeout: Duration::from_secs(cfg.image_timeout_secs),
            video_timeout: Duration::from_secs(cfg.video_timeout_secs),
            other_timeout: Duration::from_secs(cfg.other_timeout_secs),
            backoff_step: Duration::from_secs(cfg.backoff_step_secs),
        }
    }
}

impl RetryPolicy {
    pub fn timeout_for(&self, class: MimeClass) -> Duration {
        match class {
            MimeClass::Image => self.image_timeout,
            MimeClass::Video => self.video_timeout,
            MimeClass::Other => self.other_timeout,
        }
    }

    /// 纯文本沿用短超时
    pub fn text_timeout(&self) -> Duration {
        self.image_timeout
    }

    /// 第 attempt 次失败后的等待
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// 最长的单次尝试超时（看门狗卡死阈值应大于此值）
    pub fn longest_attempt(&self) -> Duration {
        self.video_timeout
            .max(self.other_timeout)
            .max(self.image_timeout)
    }

    /// 驱动一次投递的全部尝试
    ///
    /// `send` 每次收到尝试序号与当前模式；`degradable` 为 true 时（视频）原生失败会降级。
    pub async fn run<F, Fut>(
        &self,
        label: &str,
        timeout: Duration,
        degradable: bool,
        mut send: F,
    ) -> (ItemReport, Result<(), DispatchError>)
    where
        F: FnMut(u32, SendMode) -> Fut,
        Fut: Future<Output = Result<(), DispatchError>>,
    {
        let mut mode = SendMode::Native;
        let mut modes = Vec::new();
        let mut last_err = None;

        for attempt in 1..=self.max_attempts {
            modes.push(mode);
            let result = match tokio::time::timeout(timeout, send(attempt, mode)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::DeliveryTimeout(timeout)),
            };

            let err = match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(item = label, attempt, ?mode, "Delivered after retry");
                    }
                    return (
                        ItemReport {
                            modes,
                            delivered: true,
                        },
                        Ok(()),
                    );
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::warn!(item = label, attempt, error = %err, "Unrecoverable delivery error");
                return (
                    ItemReport {
                        modes,
                        delivered: false,
                    },
                    Err(err),
                );
            }

            tracing::warn!(
                item = label,
                attempt,
                max_attempts = self.max_attempts,
                ?mode,
                error = %err,
                "Delivery attempt failed"
            );
            last_err = Some(err);

            if degradable && mode == SendMode::Native {
                mode = SendMode::FallbackAttachment;
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_after(attempt)).await;
            }
        }

        let err = last_err.unwrap_or(DispatchError::DeliveryTimeout(timeout));
        (
            ItemReport {
                modes,
                delivered: false,
            },
            Err(err),
        )
    }
}

/// 按类别与模式生成发送选项
///
/// 原生：图片正常预览，视频在静音任务中以循环动画发送，其他类型本来就只能作为附件；
/// 降级：一律作为附件，关闭预览与循环。
pub fn media_options(
    class: MimeClass,
    mode: SendMode,
    mute: bool,
    caption: Option<&str>,
) -> MediaOptions {
    let caption = caption.map(str::to_string);
    match (mode, class) {
        (SendMode::FallbackAttachment, _) | (SendMode::Native, MimeClass::Other) => MediaOptions {
            as_document: true,
            as_animated_loop: false,
            caption,
        },
        (SendMode::Native, MimeClass::Video) => MediaOptions {
            as_document: false,
            as_animated_loop: mute,
            caption,
        },
        (SendMode::Native, MimeClass::Image) => MediaOptions {
            as_document: false,
            as_animated_loop: false,
            caption,
        },
    }
}
