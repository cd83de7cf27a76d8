//! Line framing over a byte stream delivered in arbitrary chunks.

use bytes::{BufMut, BytesMut};
use std::time::Duration;

/// Line-level access to the radio module, as used by the controllers.
#[allow(async_fn_in_trait)]
pub trait LineChannel {
    /// Sends `text` followed by CR/LF. True only if every byte was accepted.
    async fn write_line(&mut self, text: &str, timeout: Duration) -> bool;

    /// Next newline-terminated line (trimmed), the partial buffer if the timeout
    /// elapsed before a newline, or `None` if nothing arrived.
    async fn read_line(&mut self, timeout: Duration) -> Option<String>;

    /// False once the underlying link is gone; nothing more will arrive.
    fn is_open(&self) -> bool;
}

/// Accumulates chunks until a `\n`; every `\r` is dropped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: BytesMut,
}

impl LineAssembler {
    /// Feeds one chunk. On a newline returns the finished line and the number of
    /// bytes of `chunk` consumed, including the newline; later bytes are untouched.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<(String, usize)> {
        for (i, &b) in chunk.iter().enumerate() {
            match b {
                b'\n' => return Some((self.finish(), i + 1)),
                b'\r' => {}
                _ => self.buf.put_u8(b),
            }
        }
        None
    }

    /// Whatever was accumulated without a newline, if anything.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.finish())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn finish(&mut self) -> String {
        let raw = self.buf.split();
        String::from_utf8_lossy(&raw).trim().to_string()
    }
}
