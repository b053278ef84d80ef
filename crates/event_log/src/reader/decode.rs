use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::thread;

use tracing::{debug, warn};
use xz2::stream::{Action, Error as XzError, Status, Stream};

use crate::config::ReaderConfig;
use crate::error::LogError;
use crate::stop::StopFlag;

/// First bytes of every xz stream.
pub const XZ_MAGIC: [u8; 5] = [0xFD, b'7', b'z', b'X', b'Z'];

/// Literal starts of uncompressed records that may open a plain log.
const RAW_MARKERS: [&[u8]; 2] = [b"PROTOCOL,\"", b"TEST,\""];

/// Longest marker searched for during resynchronisation.
const MAX_MARKER_LEN: usize = 10;

/// Compressed bytes kept for the resync scan.
const HISTORY_LIMIT: usize = 1 << 20;

/// Result of one non-blocking fill attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Fill {
    /// Decoded bytes are ready.
    Data(usize),
    /// Nothing available yet; only returned while tailing.
    Idle,
    /// End of stream.
    Eof,
}

enum Mode {
    /// Nothing classified yet.
    Start,
    Xz(Box<Stream>),
    /// A compressed stream ended; expecting padding or another stream.
    Between,
    Raw,
    /// Scanning for a marker after a decoder failure (`fatal`) or after
    /// trailing bytes following a complete stream.
    Resync { at: u64, fatal: bool },
}

enum Marker {
    Xz,
    Raw,
}

/// Byte stream over a log that may be xz-compressed, plain, still growing or
/// transiently corrupt.
pub struct LogReader<R: Read> {
    inner: R,
    config: ReaderConfig,
    stop: StopFlag,
    mode: Mode,
    /// Undecoded bytes; `input[0]` sits at `offset` in the source.
    input: Vec<u8>,
    offset: u64,
    /// Bytes already fed to the current decoder.
    history: Vec<u8>,
    history_from_stream_start: bool,
    output: Vec<u8>,
    output_pos: usize,
    scratch: Vec<u8>,
    /// Last decode call filled `scratch`; the decoder may hold more output.
    decoder_full: bool,
}

impl LogReader<File> {
    pub fn open(
        path: impl AsRef<Path>,
        config: ReaderConfig,
        stop: StopFlag,
    ) -> Result<Self, LogError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(file, config, stop))
    }
}

impl<R: Read> LogReader<R> {
    pub fn new(inner: R, config: ReaderConfig, stop: StopFlag) -> Self {
        let chunk = config.chunk_size.max(MAX_MARKER_LEN);
        Self {
            inner,
            config,
            stop,
            mode: Mode::Start,
            input: Vec::new(),
            offset: 0,
            history: Vec::new(),
            history_from_stream_start: true,
            output: Vec::new(),
            output_pos: 0,
            scratch: vec![0u8; chunk],
            decoder_full: false,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// True once the reader has fallen back to plain pass-through.
    pub fn is_raw(&self) -> bool {
        matches!(self.mode, Mode::Raw)
    }

    pub(crate) fn pending(&self) -> usize {
        self.output.len() - self.output_pos
    }

    /// Moves every decoded byte out.
    pub(crate) fn take_output(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.output);
        out.drain(..self.output_pos);
        self.output_pos = 0;
        out
    }

    fn copy_output(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending().min(buf.len());
        buf[..n].copy_from_slice(&self.output[self.output_pos..self.output_pos + n]);
        self.output_pos += n;
        if self.output_pos == self.output.len() {
            self.output.clear();
            self.output_pos = 0;
        }
        n
    }

    /// Decodes as much as the currently available input allows without
    /// sleeping.
    pub fn poll_fill(&mut self) -> Result<Fill, LogError> {
        loop {
            if self.pending() > 0 {
                return Ok(Fill::Data(self.pending()));
            }
            if self.step()? {
                continue;
            }
            if self.read_more()? {
                continue;
            }
            if self.config.tail && !self.stop.is_set() {
                return Ok(Fill::Idle);
            }
            return self.finish_input();
        }
    }

    fn read_more(&mut self) -> Result<bool, LogError> {
        loop {
            match self.inner.read(&mut self.scratch) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.input.extend_from_slice(&self.scratch[..n]);
                    return Ok(true);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(LogError::Io(err)),
            }
        }
    }

    /// Advances the state machine over buffered input. Returns whether any
    /// progress was made.
    fn step(&mut self) -> Result<bool, LogError> {
        match &mut self.mode {
            Mode::Start => {
                if self.input.is_empty() {
                    return Ok(false);
                }
                if self.input.starts_with(&XZ_MAGIC) {
                    self.start_stream()?;
                    return Ok(true);
                }
                if XZ_MAGIC.starts_with(&self.input) {
                    return Ok(false);
                }
                debug!("event log is not compressed");
                self.mode = Mode::Raw;
                Ok(true)
            }
            Mode::Raw => {
                if self.input.is_empty() {
                    return Ok(false);
                }
                self.offset += self.input.len() as u64;
                self.output.append(&mut self.input);
                Ok(true)
            }
            Mode::Xz(stream) => {
                if self.input.is_empty() && !self.decoder_full {
                    return Ok(false);
                }
                let before_in = stream.total_in();
                let before_out = stream.total_out();
                let status = stream.process(&self.input, &mut self.scratch, Action::Run);
                let consumed = (stream.total_in() - before_in) as usize;
                let produced = (stream.total_out() - before_out) as usize;

                self.output.extend_from_slice(&self.scratch[..produced]);
                self.decoder_full = produced == self.scratch.len();
                self.remember(consumed);

                match status {
                    Ok(Status::StreamEnd) => {
                        debug!(offset = self.offset, "compressed stream complete");
                        self.mode = Mode::Between;
                        Ok(true)
                    }
                    Ok(_) => Ok(consumed > 0 || produced > 0),
                    Err(err @ (XzError::Mem | XzError::MemLimit | XzError::Program)) => {
                        Err(LogError::Decoder(err))
                    }
                    Err(err) => {
                        warn!(
                            offset = self.offset,
                            error = %err,
                            "xz decoder rejected input, resynchronising"
                        );
                        let at = self.offset;
                        let skip_first = self.history_from_stream_start || self.history.is_empty();
                        self.resync(at, true, skip_first);
                        Ok(true)
                    }
                }
            }
            Mode::Between => {
                let padding = self.input.iter().take_while(|b| **b == 0).count();
                if padding > 0 {
                    self.input.drain(..padding);
                    self.offset += padding as u64;
                    return Ok(true);
                }
                if self.input.is_empty() {
                    return Ok(false);
                }
                if self.input.starts_with(&XZ_MAGIC) {
                    self.start_stream()?;
                    return Ok(true);
                }
                if XZ_MAGIC.starts_with(&self.input) {
                    return Ok(false);
                }
                let at = self.offset;
                self.history.clear();
                self.resync(at, false, false);
                Ok(true)
            }
            Mode::Resync { at, fatal } => {
                let (at, fatal) = (*at, *fatal);
                if self.input.is_empty() {
                    return Ok(false);
                }
                let before = self.input.len();
                self.resync(at, fatal, false);
                Ok(!matches!(self.mode, Mode::Resync { .. }) || self.input.len() != before)
            }
        }
    }

    fn start_stream(&mut self) -> Result<(), LogError> {
        let stream = Stream::new_stream_decoder(u64::MAX, 0).map_err(LogError::Decoder)?;
        self.history.clear();
        self.history_from_stream_start = true;
        self.decoder_full = false;
        self.mode = Mode::Xz(Box::new(stream));
        Ok(())
    }

    fn remember(&mut self, consumed: usize) {
        self.history.extend(self.input.drain(..consumed));
        self.offset += consumed as u64;
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
            self.history_from_stream_start = false;
        }
    }

    /// Scans history plus pending input for the earliest xz magic or raw
    /// record marker and switches mode accordingly. `skip_first` excludes
    /// the magic of the stream that just failed.
    fn resync(&mut self, at: u64, fatal: bool, skip_first: bool) {
        let base = self.offset - self.history.len() as u64;
        let from = usize::from(skip_first);
        let mut combined = std::mem::take(&mut self.history);
        combined.append(&mut self.input);
        self.history_from_stream_start = false;

        match find_marker(&combined, from) {
            Some((idx, Marker::Xz)) => {
                debug!(offset = base + idx as u64, "found xz magic, resuming decompression");
                self.offset = base + idx as u64;
                self.input = combined.split_off(idx);
                self.history.clear();
                self.history_from_stream_start = true;
                self.decoder_full = false;
                match Stream::new_stream_decoder(u64::MAX, 0) {
                    Ok(stream) => self.mode = Mode::Xz(Box::new(stream)),
                    Err(_) => self.mode = Mode::Resync { at, fatal },
                }
            }
            Some((idx, Marker::Raw)) => {
                warn!(offset = base + idx as u64, "switching to raw mode for the rest of the log");
                self.offset = base + idx as u64;
                self.input = combined.split_off(idx);
                self.mode = Mode::Raw;
            }
            None => {
                let keep = combined.len().min(MAX_MARKER_LEN - 1);
                let drop_len = combined.len() - keep;
                self.offset = base + drop_len as u64;
                self.input = combined.split_off(drop_len);
                self.mode = Mode::Resync { at, fatal };
            }
        }
    }

    /// Handles exhaustion when not tailing (or once stopped).
    fn finish_input(&mut self) -> Result<Fill, LogError> {
        match self.mode {
            Mode::Start if !self.input.is_empty() => {
                self.mode = Mode::Raw;
                self.offset += self.input.len() as u64;
                self.output.append(&mut self.input);
                Ok(Fill::Data(self.pending()))
            }
            Mode::Xz(_) => {
                warn!(offset = self.offset, "compressed stream ended before its footer");
                Ok(Fill::Eof)
            }
            Mode::Between if !self.input.is_empty() => {
                warn!(
                    offset = self.offset,
                    bytes = self.input.len(),
                    "ignoring trailing bytes after compressed stream"
                );
                Ok(Fill::Eof)
            }
            Mode::Resync { at, fatal: true } if !self.stop.is_set() => {
                Err(LogError::Corrupt { offset: at })
            }
            Mode::Resync { .. } => {
                warn!(offset = self.offset, "no record marker found before end of log");
                Ok(Fill::Eof)
            }
            _ => Ok(Fill::Eof),
        }
    }
}

fn find_marker(buf: &[u8], from: usize) -> Option<(usize, Marker)> {
    (from..buf.len()).find_map(|idx| {
        let tail = &buf[idx..];
        if tail.starts_with(&XZ_MAGIC) {
            Some((idx, Marker::Xz))
        } else if RAW_MARKERS.iter().any(|marker| tail.starts_with(marker)) {
            Some((idx, Marker::Raw))
        } else {
            None
        }
    })
}

impl<R: Read> Read for LogReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pending() > 0 {
                return Ok(self.copy_output(buf));
            }
            if self.stop.is_set() {
                return Ok(0);
            }
            match self.poll_fill().map_err(LogError::into_io)? {
                Fill::Data(_) => return Ok(self.copy_output(buf)),
                Fill::Idle => thread::sleep(self.config.poll_interval),
                Fill::Eof => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use xz2::write::XzEncoder;

    use super::*;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).expect("compress");
        encoder.finish().expect("finish")
    }

    fn reader(bytes: Vec<u8>, tail: bool) -> LogReader<Cursor<Vec<u8>>> {
        let config = ReaderConfig {
            tail,
            poll_interval: Duration::from_millis(1),
            chunk_size: 64,
            ..ReaderConfig::default()
        };
        LogReader::new(Cursor::new(bytes), config, StopFlag::new())
    }

    fn drain(reader: &mut LogReader<Cursor<Vec<u8>>>) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        out
    }

    /// Source that can grow while a reader is attached.
    #[derive(Clone, Default)]
    struct Growing {
        data: Arc<Mutex<Vec<u8>>>,
        pos: usize,
    }

    impl Growing {
        fn append(&self, bytes: &[u8]) {
            self.data.lock().expect("lock").extend_from_slice(bytes);
        }
    }

    impl Read for Growing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.data.lock().expect("lock");
            let n = (data.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn plain_text_passes_through() {
        let text = b"PROTOCOL,\"a\",0\nNOTE,\"b\",1\n".to_vec();
        let mut reader = reader(text.clone(), false);
        assert_eq!(drain(&mut reader), text);
        assert!(reader.is_raw());
    }

    #[test]
    fn compressed_stream_is_decoded() {
        let text = b"TEST,\"a\",0\n".repeat(200);
        let mut reader = reader(compress(&text), false);
        assert_eq!(drain(&mut reader), text);
        assert!(!reader.is_raw());
    }

    #[test]
    fn concatenated_streams_with_padding_are_decoded() {
        let mut bytes = compress(b"first\n");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend(compress(b"second\n"));
        let mut reader = reader(bytes, false);
        assert_eq!(drain(&mut reader), b"first\nsecond\n".to_vec());
    }

    #[test]
    fn truncated_stream_without_tail_ends_cleanly() {
        let text = b"NOTE,\"a\",0\n".repeat(50);
        let compressed = compress(&text);
        let cut = compressed.len() - 20;
        let mut reader = reader(compressed[..cut].to_vec(), false);
        let out = drain(&mut reader);
        assert!(text.starts_with(&out));
    }

    #[test]
    fn truncated_magic_while_tailing_waits_for_more_bytes() {
        let compressed = compress(b"STOP,\"a\",0\n");
        let source = Growing::default();
        source.append(&compressed[..8]);
        let config = ReaderConfig {
            tail: true,
            chunk_size: 64,
            ..ReaderConfig::default()
        };
        let mut reader = LogReader::new(source.clone(), config, StopFlag::new());
        assert_eq!(reader.poll_fill().expect("poll"), Fill::Idle);
        assert_eq!(reader.poll_fill().expect("poll"), Fill::Idle);

        source.append(&compressed[8..]);
        let mut out = Vec::new();
        while let Fill::Data(_) = reader.poll_fill().expect("poll") {
            out.extend(reader.take_output());
        }
        assert_eq!(out, b"STOP,\"a\",0\n".to_vec());
    }

    #[test]
    fn corrupt_stream_falls_back_to_raw_marker() {
        let mut bytes = XZ_MAGIC.to_vec();
        bytes.extend_from_slice(b"\x00\x01garbage-garbage");
        bytes.extend_from_slice(b"TEST,\"x\",0\nNOTE,\"y\",1\n");
        let mut reader = reader(bytes, false);
        assert_eq!(drain(&mut reader), b"TEST,\"x\",0\nNOTE,\"y\",1\n".to_vec());
        assert!(reader.is_raw());
    }

    #[test]
    fn corrupt_stream_resynchronises_on_next_magic() {
        let mut bytes = compress(&b"lost line\n".repeat(40));
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        bytes[mid + 1] ^= 0xFF;
        bytes.extend(compress(b"kept line\n"));
        let mut reader = reader(bytes, false);
        let out = drain(&mut reader);
        assert!(out.ends_with(b"kept line\n"));
    }

    #[test]
    fn unresolved_corruption_without_tail_is_fatal() {
        let mut bytes = XZ_MAGIC.to_vec();
        bytes.extend_from_slice(&[0x13; 64]);
        let mut reader = reader(bytes, false);
        let err = reader.read_to_end(&mut Vec::new()).expect_err("corrupt");
        assert!(matches!(LogError::from_io(err), LogError::Corrupt { .. }));
    }

    #[test]
    fn unresolved_corruption_while_tailing_is_idle() {
        let mut bytes = XZ_MAGIC.to_vec();
        bytes.extend_from_slice(&[0x13; 64]);
        let mut reader = reader(bytes, true);
        assert_eq!(reader.poll_fill().expect("poll"), Fill::Idle);
    }

    #[test]
    fn stop_flag_ends_blocking_tail() {
        let mut reader = reader(Vec::new(), true);
        reader.stop_flag().set();
        assert_eq!(drain(&mut reader), Vec::<u8>::new());
    }
}
