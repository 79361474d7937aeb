use bytes::Bytes;
use serde::Serialize;

/// One line of an upstream event stream.
///
/// The upstream frames each chunk as `data:<json>` with the space after the
/// colon optional, so the decoder works line by line instead of assembling
/// multi-line SSE events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Blank,
    /// Payload of a `data:` line with surrounding whitespace trimmed.
    Data(String),
    /// `data: [DONE]`.
    Done,
    Comment(String),
    Event(String),
    /// Anything else, kept verbatim (without the line terminator).
    Other(String),
}

#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        // Split on raw bytes so a multi-byte character cut across chunks survives.
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(classify(&String::from_utf8_lossy(&raw[..raw.len() - 1])));
        }
        lines
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseLine> {
        self.push_bytes(&Bytes::copy_from_slice(chunk.as_bytes()))
    }

    /// Flushes a trailing line that had no terminator.
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        let line = classify(&String::from_utf8_lossy(&raw));
        match line {
            SseLine::Blank => None,
            other => Some(other),
        }
    }
}

fn classify(line: &str) -> SseLine {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    if let Some(value) = line.strip_prefix("data:") {
        let value = value.trim();
        if value == "[DONE]" {
            return SseLine::Done;
        }
        return SseLine::Data(value.to_string());
    }
    if let Some(value) = line.strip_prefix(':') {
        return SseLine::Comment(value.trim_start().to_string());
    }
    if let Some(value) = line.strip_prefix("event:") {
        return SseLine::Event(value.trim().to_string());
    }
    SseLine::Other(line.to_string())
}

pub fn encode_data(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// `data: <json>\n\n` for a serialisable payload.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(encode_data(&json))
}

/// `event: <name>\ndata: <json>\n\n`.
pub fn encode_event<T: Serialize>(name: &str, value: &T) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(Bytes::from(format!("event: {name}\ndata: {json}\n\n")))
}
