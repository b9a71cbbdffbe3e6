//! HTTP 桥接通道
//!
//! 会话与登录由桥接服务维护；本服务通过 `GET /session`、`POST /send-text`、`POST /send-media` 调用。
//! 状态码映射：4xx -> DeliveryRejected（不重试），5xx / 连接错误 -> DeliveryFailed（可重试）。

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;

use super::{MediaOptions, MediaUpload, SessionState, Transport};
use crate::config::TransportSection;
use crate::core::DispatchError;

/// 桥接服务单条文本上限（字符）
const MAX_TEXT_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendTextRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMediaRequest<'a> {
    to: &'a str,
    mime_type: &'a str,
    data: String,
    as_document: bool,
    as_animated_loop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

/// 基于 reqwest 的通道实现
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &TransportSection) -> Result<Self, reqwest::Error> {
        // 不设整体超时：视频上传可能很久，单次超时由重试策略控制
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), DispatchError> {
        let resp = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::DeliveryFailed(e.to_string()))?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<(), DispatchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let text = resp.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(DispatchError::DeliveryRejected(format!("{}: {}", status, text)))
    } else {
        Err(DispatchError::DeliveryFailed(format!("{}: {}", status, text)))
    }
}

/// 号码去掉 '+'，桥接服务只接受纯数字
fn normalize_recipient(recipient: &str) -> String {
    recipient.replace('+', "")
}

#[async_trait]
impl Transport for HttpTransport {
    async fn session_state(&self) -> Result<SessionState, DispatchError> {
        let resp = self
            .request(reqwest::Method::GET, "/session")
            .send()
            .await
            .map_err(|e| DispatchError::TransportUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DispatchError::TransportUnavailable(format!(
                "session endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<SessionState>()
            .await
            .map_err(|e| DispatchError::TransportUnavailable(e.to_string()))
    }

    fn max_text_chars(&self) -> Option<usize> {
        Some(MAX_TEXT_CHARS)
    }

    /// 一次请求发送一段；分段由派发器按 max_text_chars 完成
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        let to = normalize_recipient(recipient);
        let req = SendTextRequest { to: &to, text };
        self.post_json("/send-text", &req).await
    }

    async fn send_media(
        &self,
        recipient: &str,
        media: MediaUpload,
        options: &MediaOptions,
    ) -> Result<(), DispatchError> {
        let to = normalize_recipient(recipient);
        let MediaUpload { mime_type, bytes } = media;
        let data = STANDARD.encode(&bytes);
        // 原始字节在编码后即可释放
        drop(bytes);
        let req = SendMediaRequest {
            to: &to,
            mime_type: &mime_type,
            data,
            as_document: options.as_document,
            as_animated_loop: options.as_animated_loop,
            caption: options.caption.as_deref(),
        };
        self.post_json("/send-media", &req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_limit_is_advertised() {
        let transport = HttpTransport::new(&TransportSection::default()).unwrap();
        assert_eq!(transport.max_text_chars(), Some(MAX_TEXT_CHARS));
    }

    #[test]
    fn test_normalize_recipient() {
        assert_eq!(normalize_recipient("+4917612345"), "4917612345");
    }

    #[test]
    fn test_media_request_shape() {
        let req = SendMediaRequest {
            to: "491",
            mime_type: "video/mp4",
            data: STANDARD.encode(b"abc"),
            as_document: true,
            as_animated_loop: false,
            caption: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["mimeType"], "video/mp4");
        assert_eq!(json["asDocument"], true);
        assert!(json.get("caption").is_none());
    }
}
