// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::{ApiError, PluribotsError, Result};

/// Parse token counts from an arbitrary message by extracting the first numeric tokens.
pub(crate) fn parse_numeric_token_counts(message: &str) -> (u32, u32) {
    let numbers: Vec<u32> = message
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse().ok())
        .collect();

    match numbers.as_slice() {
        [current, limit, ..] => (*current, *limit),
        [single] => (*single, 0),
        _ => (0, 0),
    }
}

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Construct a standardized server error.
pub(crate) fn server_error(status: u16, message: impl Into<String>) -> PluribotsError {
    PluribotsError::Api(ApiError::ServerError {
        status,
        message: message.into(),
    })
}

/// Map a bare HTTP status onto the shared taxonomy when the body says nothing useful.
pub(crate) fn status_error(status: u16, body: &str, retry_after: Option<u64>) -> PluribotsError {
    match status {
        401 | 403 => PluribotsError::Api(ApiError::AuthenticationFailed),
        404 => PluribotsError::Api(ApiError::ModelNotFound(body.to_string())),
        429 => PluribotsError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32)),
        _ => server_error(status, body),
    }
}

/// Split an HTTP byte stream into Server-Sent Event frames.
///
/// Frames are separated by a blank line. Bytes are buffered until a full
/// frame arrives so multi-byte characters split across chunks stay intact.
pub(crate) fn sse_frames<S, B>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send,
    B: AsRef<[u8]>,
{
    bytes
        .scan(Vec::<u8>::new(), |buffer, result| {
            let chunk = match result {
                Ok(chunk) => chunk,
                Err(e) => {
                    return futures::future::ready(Some(vec![Err(PluribotsError::Api(
                        ApiError::StreamError(e.to_string()),
                    ))]))
                }
            };

            buffer.extend(chunk.as_ref().iter().copied().filter(|b| *b != b'\r'));

            let mut frames = Vec::new();
            while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
                let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
                let text = String::from_utf8_lossy(&frame[..pos]).into_owned();
                if !text.trim().is_empty() {
                    frames.push(Ok(text));
                }
            }

            futures::future::ready(Some(frames))
        })
        .flat_map(futures::stream::iter)
}

/// The `event:` name of a frame, if present
pub(crate) fn sse_event_name(frame: &str) -> Option<&str> {
    frame
        .lines()
        .find_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
}

/// The joined `data:` payload of a frame, if present
pub(crate) fn sse_data(frame: &str) -> Option<String> {
    let parts: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_token_counts() {
        assert_eq!(
            parse_numeric_token_counts("prompt is too long: 215300 tokens > 200000 maximum"),
            (215300, 200000)
        );
        assert_eq!(parse_numeric_token_counts("no numbers"), (0, 0));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(401, "", None),
            PluribotsError::Api(ApiError::AuthenticationFailed)
        ));
        assert!(matches!(
            status_error(429, "", Some(7)),
            PluribotsError::Api(ApiError::RateLimited(7))
        ));
        assert!(matches!(
            status_error(500, "oops", None),
            PluribotsError::Api(ApiError::ServerError { status: 500, .. })
        ));
    }

    #[test]
    fn test_sse_event_name_and_data() {
        let frame = "event: content_block_delta\ndata: {\"a\":1}";
        assert_eq!(sse_event_name(frame), Some("content_block_delta"));
        assert_eq!(sse_data(frame).as_deref(), Some("{\"a\":1}"));
        assert!(sse_data("event: ping").is_none());
    }

    #[tokio::test]
    async fn test_sse_frames_across_chunk_boundaries() {
        let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"data: one\r\n".to_vec()),
            Ok(b"\r\ndata: t".to_vec()),
            Ok("wo \u{e9}".as_bytes()[..4].to_vec()),
            Ok("wo \u{e9}".as_bytes()[4..].to_vec()),
            Ok(b"\n\n".to_vec()),
        ];

        let frames: Vec<String> = sse_frames(futures::stream::iter(chunks))
            .map(|f| f.unwrap())
            .collect()
            .await;

        assert_eq!(frames, vec!["data: one".to_string(), "data: two \u{e9}".to_string()]);
    }
}
