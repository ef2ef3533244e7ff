//! Big-endian primitive encoding shared by the container header and payloads.

use std::io::{Read, Write};

use crate::core::error::Error;
use crate::core::types::Result;

/// Separator word written between payload sections; a mismatch means corruption.
pub const GUARD: u32 = 0xFFFF_FFFF;

/// Upper bound on a single encoded string, to reject garbage lengths before allocating.
const MAX_STR_LEN: u32 = 1 << 16;

pub trait WriteBe: Write {
    fn put_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn put_u16(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn put_u32(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn put_i32(&mut self, v: i32) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn put_u64(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn put_guard(&mut self) -> Result<()> {
        self.put_u32(GUARD)
    }

    /// Length-prefixed UTF-8.
    fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_u32(s.len() as u32)?;
        self.write_all(s.as_bytes())?;
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteBe for W {}

pub trait ReadBe: Read {
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)
            .map_err(|e| Error::from_payload_io(e, "payload field"))?;
        Ok(buf)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn take_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn take_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    fn take_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)
            .map_err(|e| Error::from_payload_io(e, "payload bytes"))?;
        Ok(buf)
    }

    fn take_str(&mut self) -> Result<String> {
        let len = self.take_u32()?;
        if len > MAX_STR_LEN {
            return Err(Error::Format(format!("string length {} exceeds limit", len)));
        }
        let bytes = self.take_bytes(len as usize)?;
        String::from_utf8(bytes).map_err(|e| Error::Format(format!("invalid UTF-8: {}", e)))
    }

    /// Consume a guard word, failing with a format error that names `section`.
    fn expect_guard(&mut self, section: &str) -> Result<()> {
        let word = self.take_u32()?;
        if word != GUARD {
            return Err(Error::Format(format!(
                "guard mismatch after {}: expected {:#010x}, found {:#010x}",
                section, GUARD, word
            )));
        }
        Ok(())
    }
}

impl<R: Read + ?Sized> ReadBe for R {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut buf = Vec::new();
        buf.put_u16(0x0102).unwrap();
        buf.put_i32(-2).unwrap();
        buf.put_str("ab").unwrap();
        assert_eq!(buf, [1, 2, 0xFF, 0xFF, 0xFF, 0xFE, 0, 0, 0, 2, b'a', b'b']);

        let mut r = buf.as_slice();
        assert_eq!(r.take_u16().unwrap(), 0x0102);
        assert_eq!(r.take_i32().unwrap(), -2);
        assert_eq!(r.take_str().unwrap(), "ab");
    }

    #[test]
    fn test_short_read_is_format_error() {
        let mut r: &[u8] = &[0, 1];
        assert!(r.take_u32().unwrap_err().is_format());
    }

    #[test]
    fn test_guard_mismatch() {
        let mut r: &[u8] = &[0xFF, 0xFF, 0xFF, 0x00];
        let err = r.expect_guard("columns").unwrap_err();
        assert!(err.to_string().contains("columns"));
    }
}
