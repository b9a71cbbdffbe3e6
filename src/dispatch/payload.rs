//! 负载解析：每次尝试前把媒体项变成可上传的字节
//!
//! 内联负载支持 `data:<mime>;base64,<...>` 与裸 base64；远程负载通过 HTTP 拉取。
//! 解析得到的缓冲区归单次尝试所有，尝试结束即释放。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use super::{MediaItem, MediaPayload};
use crate::core::DispatchError;
use crate::transport::MediaUpload;

#[derive(Debug, Clone, Default)]
pub struct PayloadLoader {
    client: reqwest::Client,
}

impl PayloadLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn load(&self, item: &MediaItem) -> Result<MediaUpload, DispatchError> {
        match &item.payload {
            MediaPayload::Inline(raw) => decode_inline(raw, &item.mime_type),
            MediaPayload::Remote(url) => self.fetch(url, &item.mime_type).await,
        }
    }

    async fn fetch(&self, url: &str, mime_type: &str) -> Result<MediaUpload, DispatchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::DeliveryFailed(format!("fetch {}: {}", url, e)))?;
        let status = resp.status();
        if status.is_client_error() {
            // 地址本身失效，重试没有意义
            return Err(DispatchError::MediaEncoding(format!(
                "remote payload {} returned {}",
                url, status
            )));
        }
        if !status.is_success() {
            return Err(DispatchError::DeliveryFailed(format!(
                "remote payload {} returned {}",
                url, status
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DispatchError::DeliveryFailed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(DispatchError::MediaEncoding(format!(
                "remote payload {} is empty",
                url
            )));
        }
        Ok(MediaUpload {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }
}

/// 解码内联负载；data URL 中的 MIME 仅在媒体项未声明时使用
pub fn decode_inline(raw: &str, mime_type: &str) -> Result<MediaUpload, DispatchError> {
    let (embedded_mime, data) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest.split_once(',').ok_or_else(|| {
                DispatchError::MediaEncoding("data URL without ',' separator".to_string())
            })?;
            let Some(mime) = header.strip_suffix(";base64") else {
                return Err(DispatchError::MediaEncoding(
                    "only base64 data URLs are supported".to_string(),
                ));
            };
            (Some(mime), data)
        }
        None => (None, raw),
    };

    let decoded = STANDARD
        .decode(data.trim())
        .map_err(|e| DispatchError::MediaEncoding(format!("invalid base64: {}", e)))?;
    if decoded.is_empty() {
        return Err(DispatchError::MediaEncoding("empty payload".to_string()));
    }

    let mime_type = if mime_type.trim().is_empty() {
        embedded_mime.unwrap_or("application/octet-stream")
    } else {
        mime_type
    };
    Ok(MediaUpload {
        mime_type: mime_type.to_string(),
        bytes: Bytes::from(decoded),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_url() {
        let upload = decode_inline("data:image/png;base64,aGVsbG8=", "").unwrap();
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(&upload.bytes[..], b"hello");
    }

    #[test]
    fn test_declared_mime_wins() {
        let upload = decode_inline("data:image/png;base64,aGVsbG8=", "image/jpeg").unwrap();
        assert_eq!(upload.mime_type, "image/jpeg");
    }

    #[test]
    fn test_bare_base64() {
        let upload = decode_inline("aGVsbG8=", "video/mp4").unwrap();
        assert_eq!(upload.bytes.len(), 5);
    }

    #[test]
    fn test_malformed_payloads_are_encoding_errors() {
        for raw in ["data:image/png;base64", "data:image/png,abc", "###", ""] {
            let err = decode_inline(raw, "image/png").unwrap_err();
            assert!(matches!(err, DispatchError::MediaEncoding(_)), "{raw}: {err:?}");
        }
    }
}
