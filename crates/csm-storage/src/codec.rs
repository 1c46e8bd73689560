use byteorder::{BigEndian, ByteOrder};
use csm_core::{Uid, UidKind};
use smol_str::SmolStr;

use crate::error::StorageError;

type Result<T> = std::result::Result<T, StorageError>;

/// A value with a fixed binary representation in the repository.
pub trait Persistent: Sized {
    fn write(&self, out: &mut DataOutput);
    fn read(input: &mut DataInput<'_>) -> Result<Self>;
}

/// Append-only binary writer.
#[derive(Debug, Default)]
pub struct DataOutput {
    buf: Vec<u8>,
}

impl DataOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, v);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_u32(&mut self, v: u32) {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, v);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_i32(&mut self, v: i32) {
        let mut bytes = [0u8; 4];
        BigEndian::write_i32(&mut bytes, v);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_u64(&mut self, v: u64) {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, v);
        self.buf.extend_from_slice(&bytes);
    }

    /// Collection lengths are written as `u32`.
    pub fn write_len(&mut self, len: usize) {
        debug_assert!(u32::try_from(len).is_ok(), "collection too large: {len}");
        self.write_u32(len as u32);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_len(s.len());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_uid(&mut self, uid: Uid) {
        self.write_u8(uid.kind().tag());
        self.write_u32(uid.id());
    }

    pub fn write_opt_uid(&mut self, uid: Option<Uid>) {
        match uid {
            Some(uid) => {
                self.write_bool(true);
                self.write_uid(uid);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_uids<'a>(&mut self, uids: impl ExactSizeIterator<Item = &'a Uid>) {
        self.write_len(uids.len());
        for uid in uids {
            self.write_uid(*uid);
        }
    }
}

/// Cursor over bytes produced by [`DataOutput`].
#[derive(Debug)]
pub struct DataInput<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DataInput<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(StorageError::UnexpectedEof {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// Reads a collection length, rejecting counts that cannot possibly fit in
    /// the remaining input (each element takes at least `min_element_len` bytes).
    pub fn read_len(&mut self, min_element_len: usize) -> Result<usize> {
        let len = self.read_u32()? as usize;
        let needed = len.saturating_mul(min_element_len.max(1));
        if needed > self.remaining() {
            return Err(StorageError::UnexpectedEof {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        Ok(len)
    }

    pub fn read_str(&mut self) -> Result<SmolStr> {
        let len = self.read_u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(SmolStr::new)
            .map_err(|_| StorageError::InvalidUtf8 { offset })
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn read_uid(&mut self) -> Result<Uid> {
        let tag = self.read_u8()?;
        let kind = UidKind::from_tag(tag).ok_or(StorageError::InvalidTag { what: "uid", tag })?;
        Ok(Uid::new(kind, self.read_u32()?))
    }

    pub fn read_opt_uid(&mut self) -> Result<Option<Uid>> {
        if self.read_bool()? {
            Ok(Some(self.read_uid()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_uids(&mut self) -> Result<Vec<Uid>> {
        let len = self.read_len(5)?;
        (0..len).map(|_| self.read_uid()).collect()
    }
}
