//! Wire protocol: message deframing and response framing
//!
//! Requests arrive as text lines terminated by LF or any other control
//! character; several messages may be concatenated in one socket read.
//! Responses are typed frames:
//!
//! ```text
//! ┌────────┬────┬───────────┬────┬────────────┬──────┐
//! │  code  │ SP │ OK | ERR  │ SP │    text    │ 0x18 │
//! └────────┴────┴───────────┴────┴────────────┴──────┘
//! ```
//!
//! The sentinel byte 0x18 (^X) terminates each frame; there is no trailing
//! NUL. Multiple frames may be concatenated in a worker's response buffer
//! before a flush.

/// Frame terminator byte (^X)
pub const FRAME_SENTINEL: u8 = 0x18;

/// Split a raw receive buffer into discrete command lines.
///
/// Every control character is treated as a line break (clients disagree on
/// terminators; some send NUL, some CR LF, some ^X). Leading and trailing
/// whitespace is stripped from each line and empty lines are dropped, so a
/// buffer holding N concatenated messages yields exactly N lines in receipt
/// order.
pub fn deframe(buf: &[u8]) -> Vec<String> {
    let text: String = buf
        .iter()
        .map(|&b| if b.is_ascii_control() { '\n' } else { b as char })
        .collect();

    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// One typed response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code echoed to the client
    pub code: u16,
    /// OK or ERR
    pub ok: bool,
    /// Free text payload
    pub text: String,
}

impl Frame {
    /// Build an OK frame
    pub fn ok(code: u16, text: impl Into<String>) -> Self {
        Frame {
            code,
            ok: true,
            text: text.into(),
        }
    }

    /// Build an ERR frame
    pub fn err(code: u16, text: impl Into<String>) -> Self {
        Frame {
            code,
            ok: false,
            text: text.into(),
        }
    }

    /// Encode into wire bytes, sentinel included
    pub fn encode(&self) -> Vec<u8> {
        let status = if self.ok { "OK" } else { "ERR" };
        let mut bytes = format!("{} {} {}", self.code, status, self.text).into_bytes();
        bytes.push(FRAME_SENTINEL);
        bytes
    }

    /// Parse one frame from text that excludes the sentinel.
    ///
    /// Returns `None` for malformed frames; used by the client helper and
    /// the coordinator when reading acknowledgements.
    pub fn parse(text: &str) -> Option<Frame> {
        let mut parts = text.trim_start().splitn(3, ' ');
        let code: u16 = parts.next()?.parse().ok()?;
        let ok = match parts.next()? {
            "OK" => true,
            "ERR" => false,
            _ => return None,
        };
        let text = parts.next().unwrap_or("").to_string();
        Some(Frame { code, ok, text })
    }
}

/// Split a byte stream on the sentinel, yielding complete frames in order.
/// Trailing bytes after the last sentinel are returned as the remainder.
pub fn split_frames(buf: &[u8]) -> (Vec<Frame>, Vec<u8>) {
    let mut frames = Vec::new();
    let mut start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == FRAME_SENTINEL {
            let chunk = String::from_utf8_lossy(&buf[start..i]);
            if let Some(frame) = Frame::parse(&chunk) {
                frames.push(frame);
            }
            start = i + 1;
        }
    }
    (frames, buf[start..].to_vec())
}

/// Per-worker accumulating response buffer, flushed opportunistically by the
/// connection supervisor.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an encoded frame
    pub fn push(&mut self, frame: &Frame) {
        self.buf.extend_from_slice(&frame.encode());
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the accumulated bytes, leaving the buffer empty
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deframe_single_line() {
        assert_eq!(deframe(b"telemetry\n"), vec!["telemetry"]);
    }

    #[test]
    fn test_deframe_strips_whitespace() {
        assert_eq!(deframe(b"   ExpTime 2.5   \n"), vec!["ExpTime 2.5"]);
    }

    #[test]
    fn test_deframe_concatenated_messages() {
        let buf = b"7 /tmp/a.img\x187 /tmp/b.img\x18";
        let lines = deframe(buf);
        assert_eq!(lines, vec!["7 /tmp/a.img", "7 /tmp/b.img"]);
    }

    #[test]
    fn test_deframe_mixed_control_characters() {
        // IDL and friends send CR LF, NUL, or ^X as terminators
        let buf = b"menu\r\nstatus\0exptime\x18";
        assert_eq!(deframe(buf), vec!["menu", "status", "exptime"]);
    }

    #[test]
    fn test_deframe_exactly_n_lines() {
        let buf = b"  a 1 \n\n\n  b 2\t\n c 3\n";
        let lines = deframe(buf);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines, vec!["a 1", "b 2", "c 3"]);
    }

    #[test]
    fn test_deframe_interior_whitespace_preserved() {
        assert_eq!(deframe(b"Send hello  world\n"), vec!["Send hello  world"]);
    }

    #[test]
    fn test_deframe_empty_buffer() {
        assert!(deframe(b"").is_empty());
        assert!(deframe(b"\n\n\n").is_empty());
    }

    #[test]
    fn test_frame_encode_ok() {
        let f = Frame::ok(15, "hello");
        assert_eq!(f.encode(), b"15 OK hello\x18".to_vec());
    }

    #[test]
    fn test_frame_encode_err_no_trailing_nul() {
        let f = Frame::err(13, "access denied");
        let bytes = f.encode();
        assert_eq!(bytes, b"13 ERR access denied\x18".to_vec());
        assert_eq!(*bytes.last().unwrap(), FRAME_SENTINEL);
    }

    #[test]
    fn test_frame_parse_round_trip() {
        let f = Frame::ok(7, "/data/image_0001.tif");
        let encoded = f.encode();
        let text = String::from_utf8_lossy(&encoded[..encoded.len() - 1]).to_string();
        assert_eq!(Frame::parse(&text), Some(f));
    }

    #[test]
    fn test_frame_parse_empty_text() {
        let f = Frame::parse("1 OK ").unwrap();
        assert_eq!(f.code, 1);
        assert!(f.ok);
        assert_eq!(f.text, "");
    }

    #[test]
    fn test_frame_parse_rejects_garbage() {
        assert!(Frame::parse("not a frame").is_none());
        assert!(Frame::parse("12 MAYBE text").is_none());
    }

    #[test]
    fn test_split_frames_with_remainder() {
        let mut buf = Frame::ok(15, "one").encode();
        buf.extend_from_slice(&Frame::err(1, "two").encode());
        buf.extend_from_slice(b"15 OK partial");
        let (frames, rest) = split_frames(&buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].text, "one");
        assert!(!frames[1].ok);
        assert_eq!(rest, b"15 OK partial".to_vec());
    }

    #[test]
    fn test_response_buffer_accumulates() {
        let mut rb = ResponseBuffer::new();
        assert!(rb.is_empty());
        rb.push(&Frame::ok(15, "a"));
        rb.push(&Frame::ok(15, "b"));
        let bytes = rb.take();
        assert_eq!(bytes, b"15 OK a\x1815 OK b\x18".to_vec());
        assert!(rb.is_empty());
    }
}
