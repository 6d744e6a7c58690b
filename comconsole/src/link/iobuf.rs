//! Receive buffer for the serial byte stream.

use std::io;

/// Size of the internal buffer.
const IOBUF_SIZE: usize = 4096;

/// Result of a `refill`.
pub enum Refill {
    /// New data was read.
    Data,
    /// Nothing to read right now.
    NotReady,
    /// The stream reached end of file.
    Disconnected,
}

/// Buffers bytes read from the port until they can be decoded as text.
/// A UTF-8 sequence split across reads stays buffered until complete.
pub struct IOBuf {
    /// Internal buffer. Valid data (possibly none) is
    /// in a slice delimited by `start` and `end`.
    buf: [u8; IOBUF_SIZE],
    start: usize,
    end: usize,
}

impl IOBuf {
    pub fn new() -> IOBuf {
        IOBuf {
            buf: [0; IOBUF_SIZE],
            start: 0,
            end: 0,
        }
    }

    pub fn empty(&self) -> bool {
        self.start == self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Discards `len` bytes off the beginning of the contained data.
    fn consume(&mut self, len: usize) {
        self.start += std::cmp::min(len, self.size());
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            let len = self.size();
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = len;
        }
    }

    /// Reads as much as fits from `reader`.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> io::Result<Refill> {
        self.compact();
        match reader.read(&mut self.buf[self.end..]) {
            Ok(0) => Ok(Refill::Disconnected),
            Ok(size) => {
                self.end += size;
                Ok(Refill::Data)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Refill::NotReady),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Refill::NotReady),
            Err(e) => Err(e),
        }
    }

    /// Decodes and consumes the buffered bytes. Invalid sequences become
    /// U+FFFD; an incomplete sequence at the end is left in the buffer.
    pub fn take_text(&mut self) -> String {
        let mut text = String::new();
        loop {
            let (decoded, used, done) = {
                let data = self.data();
                match std::str::from_utf8(data) {
                    Ok(s) => (s.to_string(), data.len(), true),
                    Err(e) => {
                        let valid = e.valid_up_to();
                        let mut s = String::from_utf8_lossy(&data[..valid]).into_owned();
                        match e.error_len() {
                            Some(len) => {
                                s.push(char::REPLACEMENT_CHARACTER);
                                (s, valid + len, false)
                            }
                            None => (s, valid, true),
                        }
                    }
                }
            };
            text.push_str(&decoded);
            self.consume(used);
            if done {
                break;
            }
        }
        if self.empty() {
            self.start = 0;
            self.end = 0;
        }
        text
    }
}

/// Outgoing bytes not yet accepted by the port.
pub struct TxBuf {
    data: Vec<u8>,
}

impl TxBuf {
    pub fn new() -> TxBuf {
        TxBuf { data: Vec::new() }
    }

    pub fn empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Writes as much as possible. Returns true once everything is out.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> io::Result<bool> {
        while !self.data.is_empty() {
            match writer.write(&self.data) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(size) => {
                    self.data.drain(..size);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
