//! gripper_relay.rs
//! Records the hand interface's telemetry stream into `<id>_gripper.json`.
//!
//! The stream carries back-to-back frames with no delimiter, so `FrameSplitter` cuts it
//! at the end of each object (brace depth for JSON, closing root tag for XML). Each frame
//! is written as one line. The relay connects per session; an idle connection nobody
//! reads would fill up and trip the stream server's write timeout.

use std::{
    fs::File,
    io::{BufWriter, ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    path::Path,
    time::Duration,
};
use log::{debug, info};

use crate::component_a::serializer::ROOT_TAG;
use crate::recorder::{capture::SessionRecorder, session::SourceKind};
use crate::utils::error::{ProtocolFault, SourceFault};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 1024;
const FLUSH_BATCHES: u32 = 8;
/// Largest frame accepted before the stream is declared corrupt.
pub const MAX_FRAME: usize = 64 * 1024;

pub struct FrameSplitter {
    pending: Vec<u8>,
    limit: usize,
    closing_tag: Vec<u8>,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(MAX_FRAME)
    }
}

impl FrameSplitter {
    pub fn new(limit: usize) -> Self {
        Self {
            pending: Vec::with_capacity(READ_CHUNK),
            limit,
            closing_tag: format!("</{}>", ROOT_TAG).into_bytes(),
        }
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Appends `bytes` and returns every frame now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProtocolFault> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let start = self
                .pending
                .iter()
                .position(|b| !b.is_ascii_whitespace() && *b != 0)
                .unwrap_or(self.pending.len());
            self.pending.drain(..start);
            if self.pending.is_empty() {
                break;
            }

            let end = match self.pending[0] {
                b'{' => json_frame_end(&self.pending)?,
                b'<' => find(&self.pending, &self.closing_tag).map(|i| i + self.closing_tag.len()),
                other => {
                    return Err(ProtocolFault::Malformed(format!(
                        "unexpected byte 0x{:02x} at frame start",
                        other
                    )));
                }
            };

            let Some(end) = end else {
                if self.pending.len() > self.limit {
                    return Err(ProtocolFault::Oversized { limit: self.limit });
                }
                break;
            };

            let raw: Vec<u8> = self.pending.drain(..end).collect();
            frames.push(validate(raw)?);
        }

        Ok(frames)
    }
}

/// Index one past the closing brace of the leading object, if it has arrived.
fn json_frame_end(buf: &[u8]) -> Result<Option<usize>, ProtocolFault> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ProtocolFault::Malformed("unbalanced '}'".into()))?;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn validate(raw: Vec<u8>) -> Result<String, ProtocolFault> {
    let text = String::from_utf8(raw).map_err(|_| ProtocolFault::InvalidUtf8)?;
    if text.starts_with('{') {
        serde_json::from_str::<serde_json::Value>(&text)
            .map_err(|e| ProtocolFault::Malformed(e.to_string()))?;
    } else if !(text.starts_with("<?xml") || text.starts_with(&format!("<{}>", ROOT_TAG))) {
        return Err(ProtocolFault::Malformed("unexpected XML root".into()));
    }
    Ok(single_line(text))
}

/// Folds a pretty-printed frame onto one line. Line breaks and the indentation around
/// them are dropped between JSON tokens and between XML tags; inside XML text they
/// become one space. JSON string contents are left alone.
fn single_line(text: String) -> String {
    if !text.contains(['\n', '\r']) {
        return text;
    }
    let json = text.starts_with('{');
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if !c.is_whitespace() {
            in_string = json && c == '"';
            out.push(c);
            continue;
        }

        let mut run = String::from(c);
        while let Some(&next) = chars.peek().filter(|n| n.is_whitespace()) {
            run.push(next);
            chars.next();
        }
        if !run.contains(['\n', '\r']) {
            out.push_str(&run);
            continue;
        }
        let at_edge = out.is_empty() || chars.peek().is_none();
        let between_tags = out.ends_with('>') && chars.peek() == Some(&'<');
        if !json && !at_edge && !between_tags {
            out.push(' ');
        }
    }
    out
}

pub struct GripperRelayRecorder {
    addr: SocketAddr,
    read_timeout: Duration,
    stream: Option<TcpStream>,
    file: Option<BufWriter<File>>,
    splitter: FrameSplitter,
    buf: [u8; READ_CHUNK],
    batches: u32,
    frames: u64,
}

impl GripperRelayRecorder {
    pub fn new(addr: SocketAddr, read_timeout: Duration) -> Self {
        Self {
            addr,
            read_timeout,
            stream: None,
            file: None,
            splitter: FrameSplitter::default(),
            buf: [0; READ_CHUNK],
            batches: 0,
            frames: 0,
        }
    }

    fn connect(&mut self) -> Result<(), SourceFault> {
        let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT).map_err(|e| {
            SourceFault::Connect {
                target: self.addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        info!("[gripper] connected to {}", self.addr);
        self.stream = Some(stream);
        self.splitter.reset();
        Ok(())
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl SessionRecorder for GripperRelayRecorder {
    fn kind(&self) -> SourceKind {
        SourceKind::Gripper
    }

    fn begin_session(&mut self, path: &Path) -> Result<(), SourceFault> {
        self.connect()?;
        self.file = Some(BufWriter::new(File::create(path)?));
        self.batches = 0;
        self.frames = 0;
        Ok(())
    }

    fn capture(&mut self) -> Result<(), SourceFault> {
        let stream = self.stream.as_mut().ok_or(SourceFault::Closed)?;
        let n = match stream.read(&mut self.buf) {
            Ok(0) => return Err(SourceFault::Closed),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let frames = self.splitter.push(&self.buf[..n])?;
        let file = self.file.as_mut().ok_or(SourceFault::Closed)?;
        for frame in &frames {
            writeln!(file, "{}", frame)?;
        }
        self.frames += frames.len() as u64;

        self.batches += 1;
        if self.batches % FLUSH_BATCHES == 0 {
            file.flush()?;
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), SourceFault> {
        self.close_stream();
        debug!("[gripper] {} frames this session", self.frames);
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.close_stream();
        self.splitter.reset();
    }

    fn disconnect(&mut self) {
        self.close_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"GripperData": {"act": "True", "cal": "True", "pos": "255", "pos_mm": "0.0", "but": "False", "open": "False", "actTime": "1.5"}}"#;

    #[test]
    fn splits_back_to_back_json_across_reads() {
        let mut s = FrameSplitter::default();
        let stream = format!("{}{}", FRAME, FRAME);
        let (a, b) = stream.as_bytes().split_at(FRAME.len() - 10);

        assert!(s.push(a).unwrap().is_empty());
        let frames = s.push(b).unwrap();
        assert_eq!(frames, vec![FRAME.to_string(), FRAME.to_string()]);
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn braces_inside_strings_do_not_end_a_frame() {
        let mut s = FrameSplitter::default();
        let frame = r#"{"a": "}{", "b": {"c": "\"}"}}"#;
        assert_eq!(s.push(frame.as_bytes()).unwrap(), vec![frame.to_string()]);
    }

    #[test]
    fn splits_xml_on_closing_root() {
        let mut s = FrameSplitter::default();
        let frame = "<?xml version=\"1.0\" ?><GripperData><act>True</act></GripperData>";
        let frames = s.push(format!("{}{}", frame, &frame[..20]).as_bytes()).unwrap();
        assert_eq!(frames, vec![frame.to_string()]);
        assert_eq!(s.pending_len(), 20);
    }

    #[test]
    fn garbage_is_a_protocol_fault() {
        let mut s = FrameSplitter::default();
        assert!(matches!(s.push(b"hello"), Err(ProtocolFault::Malformed(_))));

        let mut s = FrameSplitter::default();
        assert!(matches!(s.push(b"{\"a\": tru}"), Err(ProtocolFault::Malformed(_))));

        let mut s = FrameSplitter::new(16);
        assert_eq!(
            s.push(b"{\"a\": \"0123456789abcdef\""),
            Err(ProtocolFault::Oversized { limit: 16 })
        );
    }

    #[test]
    fn pretty_printed_frames_are_folded_onto_one_line() {
        let mut s = FrameSplitter::default();
        let json = "{\n    \"GripperData\": {\n        \"act\": \"True\",\n        \"note\": \"a  b\"\n    }\n}\n";
        let xml = "<?xml version=\"1.0\" ?>\n<GripperData>\n\t<act>True</act>\n\t<note>two\n\t\twords</note>\n</GripperData>\n";

        let frames = s.push(format!("{}{}", json, xml).as_bytes()).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| !f.contains('\n')));

        assert_eq!(frames[0], r#"{"GripperData": {"act": "True","note": "a  b"}}"#);
        let v: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["GripperData"]["note"], "a  b");

        assert_eq!(
            frames[1],
            "<?xml version=\"1.0\" ?><GripperData><act>True</act><note>two words</note></GripperData>"
        );
    }

    #[test]
    fn connect_failure_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut relay = GripperRelayRecorder::new(addr, Duration::from_millis(50));
        let dir = tempfile::tempdir().unwrap();
        let err = relay.begin_session(&dir.path().join("x_gripper.json")).unwrap_err();
        assert!(matches!(err, SourceFault::Connect { .. }));
    }
}
