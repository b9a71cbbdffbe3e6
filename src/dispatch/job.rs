//! 派发任务与媒体项
//!
//! Job 入队后不可变；媒体项的发送模式（原生 / 附件降级）只存在于单次派发过程中。

use serde::{Deserialize, Serialize};

use crate::core::DispatchError;

/// 媒体类别：决定单次超时与能否降级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeClass {
    Image,
    Video,
    Other,
}

impl MimeClass {
    /// `image/*` -> Image，`video/*` -> Video，其余 Other
    pub fn from_mime(mime_type: &str) -> Self {
        let lower = mime_type.trim().to_ascii_lowercase();
        if lower.starts_with("image/") {
            MimeClass::Image
        } else if lower.starts_with("video/") {
            MimeClass::Video
        } else {
            MimeClass::Other
        }
    }
}

/// 发送模式：只能从 Native 降到 FallbackAttachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    Native,
    FallbackAttachment,
}

/// 媒体负载：内联（data URL / base64 文本，发送前才解码）或远程地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    Inline(String),
    Remote(String),
}

impl MediaPayload {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            MediaPayload::Remote(trimmed.to_string())
        } else {
            MediaPayload::Inline(trimmed.to_string())
        }
    }

    /// data URL 头部携带的 MIME（`data:<mime>;base64,`）
    pub fn embedded_mime(&self) -> Option<&str> {
        let MediaPayload::Inline(raw) = self else {
            return None;
        };
        let (header, _) = raw.strip_prefix("data:")?.split_once(',')?;
        let mime = header.split(';').next()?.trim();
        (!mime.is_empty()).then_some(mime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub mime_type: String,
    pub mime_class: MimeClass,
    pub payload: MediaPayload,
}

impl MediaItem {
    /// 声明的 MIME 为空时回退到 data URL 中的 MIME，类别随之确定
    pub fn new(mime_type: impl Into<String>, payload: MediaPayload) -> Self {
        let mut mime_type = mime_type.into();
        if mime_type.trim().is_empty() {
            if let Some(embedded) = payload.embedded_mime() {
                mime_type = embedded.to_string();
            }
        }
        Self {
            mime_class: MimeClass::from_mime(&mime_type),
            mime_type,
            payload,
        }
    }
}

/// 派发任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// 对应日志记录 ID
    pub id: i64,
    pub recipient: String,
    pub text: Option<String>,
    pub media_items: Vec<MediaItem>,
    pub mute: bool,
}

impl Job {
    pub fn new(id: i64, recipient: impl Into<String>) -> Self {
        Self {
            id,
            recipient: recipient.into(),
            text: None,
            media_items: Vec::new(),
            mute: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media_items.push(item);
        self
    }

    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// 非空文本；空串视为没有文本
    pub fn message_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// 最终投递结果，每个任务只写一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "SENT",
            DeliveryOutcome::Failed => "FAILED",
        }
    }
}

/// 单个媒体项（或纯文本）的投递过程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// 每次尝试使用的模式，按顺序
    pub modes: Vec<SendMode>,
    pub delivered: bool,
}

impl ItemReport {
    pub fn attempts(&self) -> usize {
        self.modes.len()
    }

    pub fn final_mode(&self) -> SendMode {
        self.modes.last().copied().unwrap_or(SendMode::Native)
    }
}

/// 一个任务的派发结果
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: i64,
    pub outcome: DeliveryOutcome,
    pub items: Vec<ItemReport>,
    pub error: Option<DispatchError>,
}
