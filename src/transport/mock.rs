//! Mock 通道（用于测试，无需桥接服务）
//!
//! 按调用顺序消费预设结果（文本与媒体共用一条脚本），脚本耗尽后一律成功；
//! 记录每次尝试与成功投递，并统计同时在途的发送数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{MediaOptions, MediaUpload, SessionState, Transport};
use crate::core::DispatchError;

/// 一次调用的预设结果
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Ok,
    Fail(DispatchError),
    /// 永不返回，等调用方超时
    Hang,
    /// 延迟后成功
    Delay(Duration),
}

/// 记录下来的一次发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        recipient: String,
        text: String,
    },
    Media {
        recipient: String,
        mime_type: String,
        size: usize,
        options: MediaOptions,
    },
}

struct MockInner {
    session: SessionState,
    probe: MockOutcome,
    script: VecDeque<MockOutcome>,
    attempts: Vec<SentMessage>,
    delivered: Vec<SentMessage>,
}

pub struct MockTransport {
    inner: Mutex<MockInner>,
    text_limit: Option<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// 会话就绪、所有发送成功
    pub fn ready() -> Self {
        Self::with_session(SessionState {
            ready: true,
            has_pending_challenge: false,
        })
    }

    /// 会话未就绪（等待扫码）
    pub fn not_ready() -> Self {
        Self::with_session(SessionState {
            ready: false,
            has_pending_challenge: true,
        })
    }

    fn with_session(session: SessionState) -> Self {
        Self {
            inner: Mutex::new(MockInner {
                session,
                probe: MockOutcome::Ok,
                script: VecDeque::new(),
                attempts: Vec::new(),
                delivered: Vec::new(),
            }),
            text_limit: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// 追加发送脚本
    pub fn script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.lock().script.extend(outcomes);
        self
    }

    /// 模拟通道的单条文本上限
    pub fn with_text_limit(mut self, max_chars: usize) -> Self {
        self.text_limit = Some(max_chars);
        self
    }

    /// 设置 session_state 的行为（Ok 时返回当前会话状态）
    pub fn set_probe(&self, outcome: MockOutcome) {
        self.lock().probe = outcome;
    }

    /// 所有尝试（含失败）
    pub fn attempts(&self) -> Vec<SentMessage> {
        self.lock().attempts.clone()
    }

    /// 成功投递的消息
    pub fn delivered(&self) -> Vec<SentMessage> {
        self.lock().delivered.clone()
    }

    /// 观察到的最大并发发送数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, message: SentMessage) -> Result<(), DispatchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // 超时取消时 future 被丢弃，计数也要回落
        let _guard = InFlightGuard(&self.in_flight);

        let outcome = {
            let mut inner = self.lock();
            inner.attempts.push(message.clone());
            inner.script.pop_front().unwrap_or(MockOutcome::Ok)
        };

        let result = resolve(outcome).await;
        if result.is_ok() {
            self.lock().delivered.push(message);
        }
        result
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn resolve(outcome: MockOutcome) -> Result<(), DispatchError> {
    match outcome {
        MockOutcome::Ok => Ok(()),
        MockOutcome::Fail(err) => Err(err),
        MockOutcome::Hang => {
            std::future::pending::<()>().await;
            Ok(())
        }
        MockOutcome::Delay(d) => {
            tokio::time::sleep(d).await;
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn session_state(&self) -> Result<SessionState, DispatchError> {
        let (probe, session) = {
            let inner = self.lock();
            (inner.probe.clone(), inner.session)
        };
        resolve(probe).await?;
        Ok(session)
    }

    fn max_text_chars(&self) -> Option<usize> {
        self.text_limit
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        self.run(SentMessage::Text {
            recipient: recipient.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn send_media(
        &self,
        recipient: &str,
        media: MediaUpload,
        options: &MediaOptions,
    ) -> Result<(), DispatchError> {
        self.run(SentMessage::Media {
            recipient: recipient.to_string(),
            mime_type: media.mime_type,
            size: media.bytes.len(),
            options: options.clone(),
        })
        .await
    }
}
