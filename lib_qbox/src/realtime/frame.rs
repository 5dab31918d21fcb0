//! # Stream Frames
//!
//! Frames are written as `text/event-stream` records. The server encodes them;
//! live clients (and the end-to-end tests) decode them with `FrameDecoder`.

use std::fmt::Write as _;
use std::time::Duration;

use crate::reactions::model::BroadcastEvent;

/// The four frame kinds carried on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Sent once when the stream opens.
    Connected,
    /// Periodic keep-alive.
    Heartbeat,
    /// A reaction snapshot for one question.
    Emoji,
    /// Advisory reconnect delay, sent after an idle period.
    Retry,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Connected => "connected",
            FrameKind::Heartbeat => "heartbeat",
            FrameKind::Emoji => "emoji",
            FrameKind::Retry => "retry",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "connected" => Some(FrameKind::Connected),
            "heartbeat" => Some(FrameKind::Heartbeat),
            "emoji" => Some(FrameKind::Emoji),
            "retry" => Some(FrameKind::Retry),
            _ => None,
        }
    }
}

/// One event on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub id: Option<String>,
    pub data: Option<String>,
    pub retry: Option<Duration>,
}

impl Frame {
    fn bare(kind: FrameKind) -> Self {
        Self {
            kind,
            id: None,
            data: None,
            retry: None,
        }
    }

    pub fn connected() -> Self {
        Self {
            data: Some("connected".to_string()),
            ..Self::bare(FrameKind::Connected)
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            data: Some("heartbeat".to_string()),
            ..Self::bare(FrameKind::Heartbeat)
        }
    }

    /// Serializes a snapshot into an `emoji` frame tagged with `sequence`.
    pub fn emoji(sequence: u64, event: &BroadcastEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Some(sequence.to_string()),
            data: Some(serde_json::to_string(event)?),
            ..Self::bare(FrameKind::Emoji)
        })
    }

    pub fn retry(after: Duration) -> Self {
        Self {
            retry: Some(after),
            ..Self::bare(FrameKind::Retry)
        }
    }

    /// Decodes the snapshot carried by an `emoji` frame.
    pub fn event(&self) -> Option<Result<BroadcastEvent, serde_json::Error>> {
        match (self.kind, self.data.as_deref()) {
            (FrameKind::Emoji, Some(data)) => Some(serde_json::from_str(data)),
            _ => None,
        }
    }

    /// Renders the frame as a `text/event-stream` record, blank line included.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            let _ = writeln!(out, "id:{id}");
        }
        let _ = writeln!(out, "event:{}", self.kind.as_str());
        if let Some(retry) = self.retry {
            let _ = writeln!(out, "retry:{}", retry.as_millis());
        }
        if let Some(data) = &self.data {
            for line in data.split('\n') {
                let _ = writeln!(out, "data:{}", line.trim_end_matches('\r'));
            }
        }
        out.push('\n');
        out
    }
}

#[derive(Debug, Default)]
struct PendingFrame {
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
    retry: Option<Duration>,
}

impl PendingFrame {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_empty() && self.retry.is_none()
    }
}

/// Incremental `text/event-stream` parser.
///
/// Feed it response chunks in arrival order; complete frames come out as soon
/// as their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    partial: Vec<u8>,
    pending: PendingFrame,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw body chunks may end inside a multi-byte character; the incomplete
    /// tail is held back until the next chunk completes it.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.partial.extend_from_slice(chunk);
        let complete = match std::str::from_utf8(&self.partial) {
            Ok(text) => text.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let bytes: Vec<u8> = self.partial.drain(..complete).collect();
        self.push(&String::from_utf8_lossy(&bytes))
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(frame) = self.finish() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "id" => self.pending.id = Some(value.to_string()),
                "event" => self.pending.event = Some(value.to_string()),
                "data" => self.pending.data.push(value.to_string()),
                "retry" => {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.pending.retry = Some(Duration::from_millis(ms));
                    }
                }
                _ => {}
            }
        }

        frames
    }

    fn finish(&mut self) -> Option<Frame> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return None;
        }
        let kind = FrameKind::parse(pending.event.as_deref()?)?;
        Some(Frame {
            kind,
            id: pending.id,
            data: (!pending.data.is_empty()).then(|| pending.data.join("\n")),
            retry: pending.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactions::model::ReactionCount;

    #[test]
    fn emoji_frame_wire_format() {
        let event = BroadcastEvent {
            question_id: 42,
            reactions: vec![ReactionCount {
                value: "👍".to_string(),
                count: 1,
            }],
        };
        let frame = Frame::emoji(1, &event).unwrap();
        assert_eq!(
            frame.encode(),
            "id:1\nevent:emoji\ndata:{\"card_id\":42,\"emojis\":[{\"value\":\"👍\",\"count\":1}]}\n\n"
        );
    }

    #[test]
    fn retry_frame_has_no_data_line() {
        assert_eq!(
            Frame::retry(Duration::from_secs(10)).encode(),
            "event:retry\nretry:10000\n\n"
        );
    }

    #[test]
    fn decoder_handles_split_chunks_and_crlf() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push("event: connec").is_empty());
        assert!(decoder.push("ted\r\ndata: connected\r\n").is_empty());
        let frames = decoder.push("\r\nevent:heartbeat\ndata:heartbeat\n\n");
        assert_eq!(frames, vec![Frame::connected(), Frame::heartbeat()]);
    }

    #[test]
    fn decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(": keep-alive\n\nid:7\nevent:emoji\ndata:a\ndata:b\n\nevent:other\ndata:x\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Emoji);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].data.as_deref(), Some("a\nb"));
    }

    #[test]
    fn decoder_waits_for_split_characters() {
        let encoded = Frame::emoji(
            3,
            &BroadcastEvent {
                question_id: 1,
                reactions: vec![ReactionCount {
                    value: "🌹".to_string(),
                    count: 2,
                }],
            },
        )
        .unwrap()
        .encode();
        let bytes = encoded.as_bytes();
        let cut = encoded.find('🌹').unwrap() + 2;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_bytes(&bytes[..cut]).is_empty());
        let frames = decoder.push_bytes(&bytes[cut..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event().unwrap().unwrap().reactions[0].value, "🌹");
    }

    #[test]
    fn decoder_reads_retry_hint() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&Frame::retry(Duration::from_millis(2500)).encode());
        assert_eq!(frames, vec![Frame::retry(Duration::from_millis(2500))]);
    }

    #[test]
    fn event_is_only_decoded_from_emoji_frames() {
        assert!(Frame::heartbeat().event().is_none());
        let frame = Frame {
            data: Some(r#"{"card_id":3,"emojis":[]}"#.to_string()),
            ..Frame::bare(FrameKind::Emoji)
        };
        let event = frame.event().unwrap().unwrap();
        assert_eq!(event.question_id, 3);
        assert!(event.reactions.is_empty());
    }
}
