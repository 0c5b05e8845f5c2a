//! Outbound Delivery pipeline (spec §4 component H, §4.6): turns a list of
//! agent payloads into chunked sends through a resolved channel adapter,
//! with media mime-sniffing/recompression and transient-error retry.

use std::time::Duration;

use channels::{ChannelAdapter, ChannelError, DeliveryMode, ResolvedTarget};
use regex::Regex;

const MAX_SEND_ATTEMPTS: u32 = 3;
const BACKOFF_UNIT_MS: u64 = 400;
const DEFAULT_MEDIA_MAX_MB: u64 = 5;
const HARD_MEDIA_MAX_MB: u64 = 6;
const IMAGE_MAX_SIDE: u32 = 2048;

/// Pattern from spec §4.6 step 2, applied to lower-level error text that an
/// adapter couldn't classify more precisely than `ChannelError::Unsupported`
/// or a bare transport message.
fn transient_pattern() -> Regex {
    Regex::new(r"(?i)429|timeout|connect|reset|closed|unavailable|temporarily").expect("static pattern")
}

fn is_transient(err: &ChannelError) -> bool {
    err.is_transient() || transient_pattern().is_match(&err.to_string())
}

/// One unit of outbound content: a path-or-URL plus optional caption
/// (spec §4.6 step 3).
pub struct MediaItem {
    pub url_or_path: String,
    pub caption: Option<String>,
}

/// A fully resolved outbound send job (spec §3 Envelope outbound fields).
pub struct OutboundJob {
    pub payloads: Vec<String>,
    pub media: Vec<MediaItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Delivers `job` to `target` through `adapter`, following spec §4.6's
/// ordered steps. Errors from individual chunks/media are logged and do not
/// abort the rest of the job (spec §7 "Propagation policy").
pub async fn deliver(adapter: &dyn ChannelAdapter, target: &ResolvedTarget, job: OutboundJob) -> Vec<DeliveryError> {
    let mut errors = Vec::new();
    let mode = adapter.delivery_mode();

    if job.media.is_empty() || mode == DeliveryMode::TextOnly {
        for payload in &job.payloads {
            for chunk in adapter.chunk(payload) {
                if let Err(e) = send_text_with_retry(adapter, target, &chunk).await {
                    tracing::warn!(error = %e, "outbound text send failed after retries");
                    errors.push(DeliveryError::from(e));
                }
            }
        }
        return errors;
    }

    for (i, item) in job.media.iter().enumerate() {
        let caption = if i == 0 { item.caption.as_deref() } else { None };
        if let Err(e) = send_media_with_retry(adapter, target, &item.url_or_path, caption).await {
            tracing::warn!(error = %e, "outbound media send failed after retries");
            errors.push(DeliveryError::from(e));
        }
    }
    for payload in &job.payloads {
        for chunk in adapter.chunk(payload) {
            if let Err(e) = send_text_with_retry(adapter, target, &chunk).await {
                errors.push(DeliveryError::from(e));
            }
        }
    }
    errors
}

async fn send_text_with_retry(adapter: &dyn ChannelAdapter, target: &ResolvedTarget, text: &str) -> Result<(), ChannelError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match adapter.send_text(target, text).await {
            Ok(()) => return Ok(()),
            Err(e) if adapter.threading().is_some() && looks_like_markdown_failure(&e) => {
                // Markdown parse error on a Telegram-like adapter: retry the
                // same chunk once as plain text (spec §4.6 step 4). The
                // adapter itself owns the MarkdownV2→plain fallback inside
                // `send_text`, so a second attempt here simply re-invokes it.
                return adapter.send_text(target, text).await;
            }
            Err(e) if attempt < MAX_SEND_ATTEMPTS && is_transient(&e) => {
                tokio::time::sleep(Duration::from_millis(BACKOFF_UNIT_MS * attempt as u64)).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn looks_like_markdown_failure(err: &ChannelError) -> bool {
    matches!(err, ChannelError::InvalidInput(m) if m.to_lowercase().contains("markdown") || m.to_lowercase().contains("parse"))
}

async fn send_media_with_retry(
    adapter: &dyn ChannelAdapter,
    target: &ResolvedTarget,
    url_or_path: &str,
    caption: Option<&str>,
) -> Result<(), ChannelError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match adapter.send_media(target, url_or_path, caption).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_SEND_ATTEMPTS && is_transient(&e) => {
                tokio::time::sleep(Duration::from_millis(BACKOFF_UNIT_MS * attempt as u64)).await;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Media loading pipeline (spec §4.6 step 3): mime-sniffs raw bytes and, for
/// anything but GIF, recompresses to JPEG bounded by `max_side` and a size
/// cap in megabytes. GIFs pass through untouched.
pub struct PreparedMedia {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

pub fn prepare_media(bytes: &[u8], max_mb: Option<u64>) -> Result<PreparedMedia, String> {
    let max_mb = max_mb.unwrap_or(DEFAULT_MEDIA_MAX_MB).min(HARD_MEDIA_MAX_MB);
    let kind = infer::get(bytes);
    let mime = kind.map(|k| k.mime_type()).unwrap_or("application/octet-stream");

    if mime == "image/gif" {
        return Ok(PreparedMedia { bytes: bytes.to_vec(), mime: "image/gif" });
    }

    if !mime.starts_with("image/") {
        return Ok(PreparedMedia { bytes: bytes.to_vec(), mime: "application/octet-stream" });
    }

    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let resized = if img.width().max(img.height()) > IMAGE_MAX_SIDE {
        img.resize(IMAGE_MAX_SIDE, IMAGE_MAX_SIDE, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Vec::new();
    let mut quality = 90u8;
    loop {
        out.clear();
        let mut cursor = std::io::Cursor::new(&mut out);
        resized
            .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality))
            .map_err(|e| e.to_string())?;
        if (out.len() as u64) <= max_mb * 1_000_000 || quality <= 40 {
            break;
        }
        quality = quality.saturating_sub(10);
    }

    Ok(PreparedMedia { bytes: out, mime: "image/jpeg" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_pattern_matches_documented_tokens() {
        for token in ["429", "timeout", "connect", "reset", "closed", "unavailable", "temporarily"] {
            assert!(transient_pattern().is_match(token), "expected {token:?} to match");
        }
        assert!(!transient_pattern().is_match("invalid recipient"));
    }

    #[test]
    fn gif_bytes_pass_through_untouched() {
        // Minimal GIF89a header, enough for `infer` to recognize the format.
        let gif: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
        let prepared = prepare_media(gif, None).unwrap();
        assert_eq!(prepared.mime, "image/gif");
        assert_eq!(prepared.bytes, gif);
    }

    #[test]
    fn unknown_bytes_pass_through_as_octet_stream() {
        let prepared = prepare_media(b"not a real media file", None).unwrap();
        assert_eq!(prepared.mime, "application/octet-stream");
    }
}
