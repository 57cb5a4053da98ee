// src/supervisor/lines.rs

//! Turning a pipe into complete lines without blocking.
//!
//! [`LineBuffer`] is the pure part: bytes in, `\n`-terminated lines out, with
//! the unterminated remainder released at end of stream. [`LineStream`]
//! owns a pipe and reads from it only after `poll(2)` has reported it ready.

use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};

use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, terminator included.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left after the last newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// One output pipe of a supervised process.
#[derive(Debug)]
pub struct LineStream<R> {
    name: &'static str,
    reader: Option<R>,
    buffer: LineBuffer,
}

impl<R: Read + AsFd> LineStream<R> {
    pub fn new(name: &'static str, reader: R) -> Self {
        Self {
            name,
            reader: Some(reader),
            buffer: LineBuffer::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.reader.as_ref().map(AsFd::as_fd)
    }

    /// Read once and return the lines completed by it.
    ///
    /// Only call after the fd polled ready; the single `read` then returns
    /// without blocking. End of file closes the stream and flushes the
    /// trailing partial line.
    pub fn read_available(&mut self) -> Vec<String> {
        let Some(reader) = self.reader.as_mut() else {
            return Vec::new();
        };

        let mut chunk = vec![0u8; READ_CHUNK];
        match reader.read(&mut chunk) {
            Ok(0) => return self.close(),
            Ok(n) => self.buffer.push(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                warn!(stream = self.name, error = %err, "read failed; closing stream");
                return self.close();
            }
        }

        let mut lines = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            lines.push(line);
        }
        lines
    }

    /// Drop the pipe and return any buffered lines, including an
    /// unterminated last one.
    pub fn close(&mut self) -> Vec<String> {
        if self.reader.take().is_some() {
            debug!(stream = self.name, "stream closed");
        }
        let mut lines = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            lines.push(line);
        }
        lines.extend(self.buffer.finish());
        lines
    }
}
