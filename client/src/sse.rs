//! Server-Sent Events decoding.
//!
//! [`SseDecoder`] turns arbitrary body chunks into frames, carrying partial
//! lines (including split UTF-8 sequences) across chunk boundaries.
//! [`server_events`] maps a subscribe response to typed [`ServerEvent`]s.
//!
//! # Frame Mapping
//!
//! ```text
//! event: ready       data: {"heartbeatInterval":5000}   → ServerEvent::Ready
//! event: heartbeat   data: {}                           → ServerEvent::Heartbeat
//! (no event line)    data: {RelayEvent}                 → ServerEvent::Message
//! ```

use crate::error::StreamError;
use async_stream::stream;
use futures::Stream;
use webhook_relay_core::event::{ConnectionReadyEvent, RelayEvent};

/// Event type of frames without an `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Last event id seen on the stream
    pub id: Option<String>,
    /// Event type, [`DEFAULT_EVENT`] when unspecified
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            // retry and unknown fields
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();

        Some(SseFrame {
            id: self.last_id.clone(),
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
        })
    }
}

/// A typed push-channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Session established
    Ready(ConnectionReadyEvent),
    /// Liveness signal
    Heartbeat,
    /// A relayed webhook
    Message(Box<RelayEvent>),
}

impl ServerEvent {
    /// Interpret a frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] for malformed data and
    /// [`StreamError::UnknownEvent`] for event types the relay never sends.
    pub fn from_frame(frame: &SseFrame) -> Result<Self, StreamError> {
        let decode = |e: serde_json::Error| StreamError::Decode {
            event: frame.event.clone(),
            reason: e.to_string(),
        };
        match frame.event.as_str() {
            "ready" => serde_json::from_str(&frame.data).map(Self::Ready).map_err(decode),
            "heartbeat" => Ok(Self::Heartbeat),
            DEFAULT_EVENT => serde_json::from_str(&frame.data)
                .map(|event| Self::Message(Box::new(event)))
                .map_err(decode),
            other => Err(StreamError::UnknownEvent(other.to_string())),
        }
    }
}

/// Typed events from a subscribe response.
///
/// The stream always ends with an error: [`StreamError::Ended`] on a clean
/// close, [`StreamError::Body`] on a transport failure.
pub fn server_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ServerEvent, StreamError>> + Send {
    let body = response.bytes_stream();
    stream! {
        let mut decoder = SseDecoder::new();
        for await chunk in body {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.push(&bytes) {
                        yield ServerEvent::from_frame(&frame);
                    }
                }
                Err(e) => {
                    yield Err(StreamError::Body(e.to_string()));
                    return;
                }
            }
        }
        yield Err(StreamError::Ended);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"id: 0\nevent: re").is_empty());
        assert!(decoder.push(b"ady\ndata: {\"heartbeatInterval\"").is_empty());
        let frames = decoder.push(b":5000}\n\nid: 1\n");

        assert_eq!(
            frames,
            vec![SseFrame {
                id: Some("0".to_string()),
                event: "ready".to_string(),
                data: r#"{"heartbeatInterval":5000}"#.to_string(),
            }]
        );
        assert_eq!(
            ServerEvent::from_frame(&frames[0]).unwrap(),
            ServerEvent::Ready(ConnectionReadyEvent {
                heartbeat_interval: 5000
            })
        );
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\r\n\r\ndata: first\r\ndata:second\r\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, DEFAULT_EVENT);
        assert_eq!(frames[0].data, "first\nsecond");
        assert_eq!(frames[0].id, None);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let text = "data: caf\u{e9}\n\n".as_bytes();
        let split = text.len() - 3;
        assert!(decoder.push(&text[..split]).is_empty());
        let frames = decoder.push(&text[split..]);
        assert_eq!(frames[0].data, "caf\u{e9}");
    }

    #[test]
    fn test_message_and_heartbeat_mapping() {
        let event = RelayEvent::builder("/webhooks/test?a=1")
            .query_param("a", "1")
            .body("{}")
            .timestamp(7)
            .build();
        let raw = format!(
            "id: 1\nevent: heartbeat\ndata: {{}}\n\nid: 2\ndata: {}\n\n",
            serde_json::to_string(&event).unwrap()
        );

        let frames = SseDecoder::new().push(raw.as_bytes());
        assert_eq!(ServerEvent::from_frame(&frames[0]).unwrap(), ServerEvent::Heartbeat);
        assert_eq!(
            ServerEvent::from_frame(&frames[1]).unwrap(),
            ServerEvent::Message(Box::new(event))
        );
        assert_eq!(frames[1].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_bad_frames_are_reported() {
        let bad = SseFrame {
            id: None,
            event: DEFAULT_EVENT.to_string(),
            data: "not json".to_string(),
        };
        assert!(matches!(
            ServerEvent::from_frame(&bad),
            Err(StreamError::Decode { .. })
        ));

        let unknown = SseFrame {
            id: None,
            event: "error".to_string(),
            data: "{}".to_string(),
        };
        assert_eq!(
            ServerEvent::from_frame(&unknown),
            Err(StreamError::UnknownEvent("error".to_string()))
        );
    }
}
