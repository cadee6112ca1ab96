//! Big-endian primitives shared by snapshot and index files.

use std::io::{self, Read, Write};

use crate::error::{Result, TraceError};

pub(crate) struct Encoder<W> {
    out: W,
}

impl<W: Write> Encoder<W> {
    pub(crate) const fn new(out: W) -> Self {
        Self { out }
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<()> {
        Ok(self.out.write_all(&[value])?)
    }

    pub(crate) fn bool(&mut self, value: bool) -> Result<()> {
        self.u8(u8::from(value))
    }

    pub(crate) fn i16(&mut self, value: i16) -> Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    pub(crate) fn i32(&mut self, value: i32) -> Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    pub(crate) fn i64(&mut self, value: i64) -> Result<()> {
        Ok(self.out.write_all(&value.to_be_bytes())?)
    }

    /// Addresses and sizes travel as signed 64-bit values.
    pub(crate) fn u64(&mut self, value: u64) -> Result<()> {
        self.i64(i64::try_from(value).map_err(|_| {
            TraceError::InvalidSnapshot(format!("value {value:#x} exceeds the signed 64-bit range"))
        })?)
    }

    /// Counts travel as signed 32-bit values.
    pub(crate) fn count(&mut self, len: usize) -> Result<()> {
        self.i32(
            i32::try_from(len)
                .map_err(|_| TraceError::InvalidSnapshot(format!("count {len} exceeds the 32-bit range")))?,
        )
    }

    /// String with a u16 byte length.
    pub(crate) fn str(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| TraceError::InvalidSnapshot(format!("string of {} bytes is too long", value.len())))?;
        self.out.write_all(&len.to_be_bytes())?;
        Ok(self.out.write_all(value.as_bytes())?)
    }

    /// String with an i32 byte length.
    pub(crate) fn long_str(&mut self, value: &str) -> Result<()> {
        self.count(value.len())?;
        Ok(self.out.write_all(value.as_bytes())?)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }

    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

pub(crate) struct Decoder<R> {
    input: R,
}

impl<R: Read> Decoder<R> {
    pub(crate) const fn new(input: R) -> Self {
        Self { input }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0; N];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TraceError::InvalidSnapshot(format!("invalid boolean {other}"))),
        }
    }

    pub(crate) fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let value = self.i64()?;
        u64::try_from(value).map_err(|_| TraceError::InvalidSnapshot(format!("negative address {value}")))
    }

    pub(crate) fn count(&mut self) -> Result<usize> {
        let value = self.i32()?;
        usize::try_from(value).map_err(|_| TraceError::InvalidSnapshot(format!("negative count {value}")))
    }

    fn utf8(&mut self, len: usize) -> Result<String> {
        let mut buf = vec![0; len];
        self.input.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|err| TraceError::InvalidSnapshot(format!("invalid string: {err}")))
    }

    pub(crate) fn str(&mut self) -> Result<String> {
        let len = u16::from_be_bytes(self.array()?);
        self.utf8(usize::from(len))
    }

    pub(crate) fn long_str(&mut self) -> Result<String> {
        let len = self.count()?;
        self.utf8(len)
    }

    /// Like [`Decoder::i64`], but `None` at a clean end of input.
    pub(crate) fn try_i64(&mut self) -> Result<Option<i64>> {
        let mut buf = [0; 8];
        let mut filled = 0;
        while filled < buf.len() {
            match self.input.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(i64::from_be_bytes(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut enc = Encoder::new(Vec::new());
        enc.i32(0x0102_0304).unwrap();
        enc.str("ab").unwrap();
        enc.bool(true).unwrap();
        assert_eq!(enc.into_inner(), vec![1, 2, 3, 4, 0, 2, b'a', b'b', 1]);
    }

    #[test]
    fn test_decode_primitives() {
        let mut enc = Encoder::new(Vec::new());
        enc.i16(-2).unwrap();
        enc.i64(-1).unwrap();
        enc.long_str("Thread-0").unwrap();
        let bytes = enc.into_inner();
        let mut dec = Decoder::new(bytes.as_slice());
        assert_eq!(dec.i16().unwrap(), -2);
        assert_eq!(dec.i64().unwrap(), -1);
        assert_eq!(dec.long_str().unwrap(), "Thread-0");
        assert_eq!(dec.try_i64().unwrap(), None);
    }

    #[test]
    fn test_truncated_input() {
        let mut dec = Decoder::new([0u8, 0, 1].as_slice());
        assert!(matches!(dec.try_i64(), Err(TraceError::Io(_))));
        let mut dec = Decoder::new([2u8].as_slice());
        assert!(matches!(dec.bool(), Err(TraceError::InvalidSnapshot(_))));
    }
}
