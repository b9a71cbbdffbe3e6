//! 消息通道抽象
//!
//! 通道代表一个逻辑会话（单写者）：查询会话状态、发送文本、发送媒体。
//! 超时由调用方（重试策略 / 看门狗）统一施加，实现只负责一次请求。

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{MockOutcome, MockTransport, SentMessage};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::DispatchError;

/// 会话状态（登录由通道自己维护，这里只读）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub ready: bool,
    /// 等待扫码 / 验证等人工步骤
    #[serde(default)]
    pub has_pending_challenge: bool,
}

/// 媒体发送选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOptions {
    /// 作为附件文件发送（无原生预览）
    pub as_document: bool,
    /// 以循环动画预览发送（视频）
    pub as_animated_loop: bool,
    pub caption: Option<String>,
}

/// 已解析、可直接上传的媒体；按值传入单次发送，发送结束即释放
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub mime_type: String,
    pub bytes: Bytes,
}

/// 消息通道
#[async_trait]
pub trait Transport: Send + Sync {
    async fn session_state(&self) -> Result<SessionState, DispatchError>;

    /// 单条文本的字符上限；None 表示不限
    ///
    /// 超长文本由派发器分段，每段各自重试，已送达的段不会重发。
    fn max_text_chars(&self) -> Option<usize> {
        None
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError>;

    async fn send_media(
        &self,
        recipient: &str,
        media: MediaUpload,
        options: &MediaOptions,
    ) -> Result<(), DispatchError>;
}

/// 按字符数把文本切成若干段（不拆开多字节字符）
pub fn chunk_text(text: &str, max_chars: Option<usize>) -> Vec<String> {
    let Some(max) = max_chars.filter(|m| *m > 0) else {
        return vec![text.to_string()];
    };
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(max)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_short_or_unlimited_is_single() {
        assert_eq!(chunk_text("hello", Some(4000)), vec!["hello".to_string()]);
        assert_eq!(chunk_text(&"a".repeat(9000), None).len(), 1);
    }

    #[test]
    fn test_chunk_text_long_by_chars() {
        let text = "午".repeat(4010);
        let chunks = chunk_text(&text, Some(4000));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4000);
        assert_eq!(chunks[1].chars().count(), 10);
    }
}
