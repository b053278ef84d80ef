use std::collections::VecDeque;
use std::io::{self, Read};

use crate::error::LogError;

const CHUNK_SIZE_BYTES: usize = 8192;

#[derive(Debug)]
pub enum BoundedLine {
    /// One line without its terminator. `offset` is the position of its
    /// first byte in the decoded stream.
    Line { offset: u64, bytes: Vec<u8> },
    LineTooLong {
        offset: u64,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    ReadError { offset: u64, error: LogError },
}

/// Splits a byte stream into bounded lines. Shared by the blocking and async
/// drivers.
#[derive(Debug)]
pub(crate) struct LineAssembler {
    max_line_bytes: usize,
    current_line: Vec<u8>,
    line_offset: u64,
    consumed: u64,
    observed_bytes: usize,
    discard_mode: bool,
}

impl LineAssembler {
    pub(crate) fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            current_line: Vec::new(),
            line_offset: 0,
            consumed: 0,
            observed_bytes: 0,
            discard_mode: false,
        }
    }

    pub(crate) fn consumed(&self) -> u64 {
        self.consumed
    }

    pub(crate) fn feed(&mut self, mut chunk: &[u8], out: &mut VecDeque<BoundedLine>) {
        while !chunk.is_empty() {
            let Some(newline_idx) = chunk.iter().position(|b| *b == b'\n') else {
                self.observe(chunk);
                self.consumed += chunk.len() as u64;
                return;
            };
            self.observe(&chunk[..newline_idx]);
            self.consumed += newline_idx as u64 + 1;
            out.push_back(self.finish_line());
            chunk = &chunk[newline_idx + 1..];
        }
    }

    /// Releases a trailing line that never got its terminator.
    pub(crate) fn finish(&mut self) -> Option<BoundedLine> {
        if self.discard_mode || !self.current_line.is_empty() {
            Some(self.finish_line())
        } else {
            None
        }
    }

    fn observe(&mut self, segment: &[u8]) {
        self.observed_bytes = self.observed_bytes.saturating_add(segment.len());
        if self.observed_bytes > self.max_line_bytes {
            if !self.discard_mode {
                self.discard_mode = true;
                self.current_line = Vec::new();
            }
            return;
        }
        self.current_line.extend_from_slice(segment);
    }

    fn finish_line(&mut self) -> BoundedLine {
        let offset = self.line_offset;
        let line = if self.discard_mode {
            BoundedLine::LineTooLong {
                offset,
                observed_bytes: self.observed_bytes,
                max_line_bytes: self.max_line_bytes,
            }
        } else {
            BoundedLine::Line {
                offset,
                bytes: std::mem::take(&mut self.current_line),
            }
        };
        self.current_line.clear();
        self.observed_bytes = 0;
        self.discard_mode = false;
        self.line_offset = self.consumed;
        line
    }
}

/// Blocking line iterator. Over a tailing [`LogReader`](super::LogReader)
/// a partial final line waits for its terminator; at end of input it is
/// yielded as-is so the parser can decide.
pub struct BoundedLines<R: Read> {
    reader: R,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    assembler: LineAssembler,
    ready: VecDeque<BoundedLine>,
    done: bool,
}

impl<R: Read> BoundedLines<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            assembler: LineAssembler::new(max_line_bytes),
            ready: VecDeque::new(),
            done: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }
}

impl<R: Read> Iterator for BoundedLines<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.buffer[..]) {
                Ok(0) => {
                    self.done = true;
                    return self.assembler.finish();
                }
                Ok(n) => self.assembler.feed(&self.buffer[..n], &mut self.ready),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.done = true;
                    return Some(BoundedLine::ReadError {
                        offset: self.assembler.consumed(),
                        error: LogError::from_io(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(bytes: &[u8], max: usize) -> Vec<BoundedLine> {
        BoundedLines::new(std::io::Cursor::new(bytes.to_vec()), max).collect()
    }

    #[test]
    fn oversized_line_is_discarded_and_iteration_continues() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ok\n");
        bytes.extend_from_slice(&[b'a'; 50]);
        bytes.extend_from_slice(b"\nnext\n");

        let lines = lines(&bytes, 16);

        assert!(matches!(lines[0], BoundedLine::Line { offset: 0, .. }));
        assert!(matches!(
            lines[1],
            BoundedLine::LineTooLong {
                offset: 3,
                observed_bytes: 50,
                ..
            }
        ));
        match &lines[2] {
            BoundedLine::Line { offset, bytes } => {
                assert_eq!(*offset, 54);
                assert_eq!(bytes, b"next");
            }
            other => panic!("unexpected line: {other:?}"),
        }
    }

    #[test]
    fn torn_final_line_is_yielded_at_eof() {
        let lines = lines(b"one\ntw", 64);
        assert_eq!(lines.len(), 2);
        assert!(matches!(&lines[1], BoundedLine::Line { offset: 4, bytes } if bytes == b"tw"));
    }

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let mut assembler = LineAssembler::new(64);
        let mut out = VecDeque::new();
        assembler.feed(b"ab", &mut out);
        assert!(out.is_empty());
        assembler.feed(b"c\nd", &mut out);
        assert!(matches!(out.pop_front(), Some(BoundedLine::Line { bytes, .. }) if bytes == b"abc"));
        assert!(matches!(assembler.finish(), Some(BoundedLine::Line { offset: 4, .. })));
    }
}
