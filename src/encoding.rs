//! # Little-Endian Slice I/O
//!
//! Bounds-checked fixed-width integer access into byte slices. All multibyte
//! integers in the store file are little-endian; there is no endianness
//! detection. Two access styles are provided:
//!
//! - [`get_u32`] / [`put_u32`] read or write at an explicit offset, used by
//!   the index block whose slots are addressed randomly.
//! - [`Cursor`] / [`CursorMut`] walk a slice sequentially, used by the
//!   record codec whose fields are laid out back to back.
//!
//! Every operation fails with a short-read/short-write error rather than
//! panicking when the remaining capacity is insufficient.

use eyre::{ensure, Result};

/// Reads a little-endian u32 at `offset`.
pub fn get_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| eyre::eyre!("u32 read offset {} overflows", offset))?;
    ensure!(
        end <= buf.len(),
        "short read at offset {}: need 4 bytes, {} available",
        offset,
        buf.len().saturating_sub(offset)
    );
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..end]);
    Ok(u32::from_le_bytes(raw))
}

/// Writes a little-endian u32 at `offset`.
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = offset
        .checked_add(4)
        .ok_or_else(|| eyre::eyre!("u32 write offset {} overflows", offset))?;
    ensure!(
        end <= buf.len(),
        "short write at offset {}: need 4 bytes, {} available",
        offset,
        buf.len().saturating_sub(offset)
    );
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Sequential reader over a byte slice.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn u32(&mut self) -> Result<u32> {
        let value = get_u32(self.buf, self.pos)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| eyre::eyre!("read of {} bytes at {} overflows", len, self.pos))?;
        ensure!(
            end <= self.buf.len(),
            "short read at offset {}: need {} bytes, {} available",
            self.pos,
            len,
            self.buf.len().saturating_sub(self.pos)
        );
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }
}

/// Sequential writer over a mutable byte slice.
#[derive(Debug)]
pub struct CursorMut<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> CursorMut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        put_u32(self.buf, self.pos, value)?;
        self.pos += 4;
        Ok(())
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> Result<()> {
        let end = self
            .pos
            .checked_add(data.len())
            .ok_or_else(|| eyre::eyre!("write of {} bytes at {} overflows", data.len(), self.pos))?;
        ensure!(
            end <= self.buf.len(),
            "short write at offset {}: need {} bytes, {} available",
            self.pos,
            data.len(),
            self.buf.len().saturating_sub(self.pos)
        );
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip_at_offset() {
        let mut buf = [0u8; 12];
        put_u32(&mut buf, 4, 0xDEAD_BEEF).unwrap();
        assert_eq!(get_u32(&buf, 4).unwrap(), 0xDEAD_BEEF);
        assert_eq!(get_u32(&buf, 0).unwrap(), 0);
    }

    #[test]
    fn u32_is_little_endian() {
        let mut buf = [0u8; 4];
        put_u32(&mut buf, 0, 0x0102_0304).unwrap();
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn short_read_and_write_fail() {
        let mut buf = [0u8; 3];
        assert!(get_u32(&buf, 0).is_err());
        assert!(put_u32(&mut buf, 0, 1).is_err());
        assert!(get_u32(&buf, usize::MAX).is_err());
    }

    #[test]
    fn cursor_walks_fields_in_order() {
        let mut buf = [0u8; 14];
        {
            let mut w = CursorMut::new(&mut buf);
            w.put_u32(3).unwrap();
            w.put_bytes(b"abc").unwrap();
            w.put_u32(7).unwrap();
            assert_eq!(w.position(), 11);
        }
        let mut r = Cursor::new(&buf);
        assert_eq!(r.u32().unwrap(), 3);
        assert_eq!(r.bytes(3).unwrap(), b"abc");
        assert_eq!(r.u32().unwrap(), 7);
        assert_eq!(r.position(), 11);
    }

    #[test]
    fn cursor_fails_past_end() {
        let buf = [0u8; 6];
        let mut r = Cursor::new(&buf);
        r.u32().unwrap();
        assert!(r.u32().is_err());
        assert!(r.bytes(3).is_err());
    }
}
