//! Byte-level primitives shared by the opcode decoders.
//!
//! All integers on the wire are little-endian. Strings are null-terminated
//! and BSON documents carry their total size as a leading int32.

use crate::error::ProtocolError;
use crate::request::NamespacedCollection;
use bson::Document;

/// A checked cursor over a request payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current offset from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn need(&self, n: usize, what: &'static str) -> Result<(), ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                what,
                needed: n - self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8, ProtocolError> {
        self.need(1, what)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i32(&mut self, what: &'static str) -> Result<i32, ProtocolError> {
        self.need(4, what)?;
        let v = i32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u32(&mut self, what: &'static str) -> Result<u32, ProtocolError> {
        Ok(self.read_i32(what)? as u32)
    }

    pub fn read_i64(&mut self, what: &'static str) -> Result<i64, ProtocolError> {
        self.need(8, what)?;
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    /// Consumes and returns the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], ProtocolError> {
        self.need(n, what)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consumes the rest of the payload.
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    /// Reads bytes up to and including a null terminator and returns the
    /// preceding bytes as a UTF-8 string. Fails if no terminator shows up
    /// before the payload (or the supplied bound) runs out.
    pub fn read_cstring(&mut self, max_len: usize) -> Result<String, ProtocolError> {
        let window = &self.buf[self.pos..self.buf.len().min(self.pos + max_len + 1)];
        let terminator = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::UnterminatedCString(max_len.min(window.len())))?;
        let s = std::str::from_utf8(&window[..terminator])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_string();
        self.pos += terminator + 1;
        Ok(s)
    }

    /// Reads a `database.collection` cstring. Both halves must be non-empty;
    /// the namespace splits on the first dot.
    pub fn read_namespace(&mut self) -> Result<NamespacedCollection, ProtocolError> {
        let ns = self.read_cstring(self.remaining())?;
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(NamespacedCollection {
                database: db.to_string(),
                collection: coll.to_string(),
            }),
            _ => Err(ProtocolError::MalformedNamespace(ns)),
        }
    }

    /// Reads one length-prefixed BSON document.
    ///
    /// A size field of exactly 4 denotes an empty document; anything smaller
    /// is rejected. The document bytes, size prefix included, are handed to
    /// the BSON parser as-is.
    pub fn read_document(&mut self) -> Result<Document, ProtocolError> {
        let size = self.read_i32("document size")?;
        if size < 4 {
            return Err(ProtocolError::InvalidDocumentLength(size));
        }
        if size == 4 {
            return Ok(Document::new());
        }

        let body = self.read_bytes(size as usize - 4, "document body")?;
        let mut raw = Vec::with_capacity(size as usize);
        raw.extend_from_slice(&size.to_le_bytes());
        raw.extend_from_slice(body);
        Ok(Document::from_reader(&mut std::io::Cursor::new(raw))?)
    }
}
