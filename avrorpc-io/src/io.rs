//! Byte channels the codec reads from and writes to.

use crate::error::IoError;
use std::io::{Read, Seek, SeekFrom, Write};

/// A readable, writable, seekable byte channel.
pub trait AvroIo {
    /// Fills `buf` completely; running out of input is a [`IoError::ShortRead`].
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), IoError>;

    /// Writes all of `bytes`, returning the count written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, IoError>;

    /// Current position.
    fn tell(&mut self) -> Result<u64, IoError>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, IoError>;

    fn is_eof(&mut self) -> Result<bool, IoError>;

    /// Bytes left between the current position and the end of input.
    fn remaining(&mut self) -> Result<u64, IoError>;

    fn flush(&mut self) -> Result<(), IoError>;

    fn close(&mut self) -> Result<(), IoError>;

    /// Reads exactly `len` bytes.
    ///
    /// A `len` beyond the remaining input fails before anything is allocated.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, IoError> {
        let available = self.remaining()?;
        if len as u64 > available {
            return Err(IoError::ShortRead {
                wanted: len,
                got: usize::try_from(available).unwrap_or(usize::MAX),
            });
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Moves forward `len` bytes without materializing them.
    fn skip(&mut self, len: u64) -> Result<(), IoError> {
        let offset = i64::try_from(len).map_err(|_| IoError::InvalidSeek(i64::MAX))?;
        self.seek(SeekFrom::Current(offset))?;
        Ok(())
    }
}

/// In-memory byte channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryIo {
    buf: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl MemoryIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel positioned at the start of `bytes`.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            buf: bytes.into(),
            pos: 0,
            closed: false,
        }
    }

    /// Entire buffer contents, regardless of position.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Empties the buffer and rewinds.
    pub fn truncate(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<(), IoError> {
        if self.closed {
            Err(IoError::Closed)
        } else {
            Ok(())
        }
    }
}

impl AvroIo for MemoryIo {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), IoError> {
        self.check_open()?;
        let available = self.buf.len().saturating_sub(self.pos);
        if available < buf.len() {
            return Err(IoError::ShortRead {
                wanted: buf.len(),
                got: available,
            });
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, IoError> {
        self.check_open()?;
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(bytes.len())
    }

    fn tell(&mut self) -> Result<u64, IoError> {
        self.check_open()?;
        Ok(self.pos as u64)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, IoError> {
        self.check_open()?;
        let target = match pos {
            SeekFrom::Start(n) => i64::try_from(n).unwrap_or(i64::MAX),
            SeekFrom::Current(n) => (self.pos as i64).saturating_add(n),
            SeekFrom::End(n) => (self.buf.len() as i64).saturating_add(n),
        };
        if target < 0 || target as usize > self.buf.len() {
            return Err(IoError::InvalidSeek(target));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn is_eof(&mut self) -> Result<bool, IoError> {
        self.check_open()?;
        Ok(self.pos >= self.buf.len())
    }

    fn remaining(&mut self) -> Result<u64, IoError> {
        self.check_open()?;
        Ok(self.buf.len().saturating_sub(self.pos) as u64)
    }

    fn flush(&mut self) -> Result<(), IoError> {
        self.check_open()
    }

    fn close(&mut self) -> Result<(), IoError> {
        self.check_open()?;
        self.closed = true;
        Ok(())
    }
}

/// Byte channel over any seekable stream, such as a [`std::fs::File`].
#[derive(Debug)]
pub struct StreamIo<T> {
    inner: Option<T>,
}

impl<T: Read + Write + Seek> StreamIo<T> {
    pub fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    /// Returns the wrapped stream, or `None` once closed.
    pub fn into_inner(self) -> Option<T> {
        self.inner
    }

    fn stream(&mut self) -> Result<&mut T, IoError> {
        self.inner.as_mut().ok_or(IoError::Closed)
    }
}

impl<T: Read + Write + Seek> AvroIo for StreamIo<T> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), IoError> {
        let stream = self.stream()?;
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(IoError::ShortRead {
                        wanted: buf.len(),
                        got: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(IoError::Os(e)),
            }
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, IoError> {
        self.stream()?.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn tell(&mut self) -> Result<u64, IoError> {
        Ok(self.stream()?.stream_position()?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, IoError> {
        Ok(self.stream()?.seek(pos)?)
    }

    fn is_eof(&mut self) -> Result<bool, IoError> {
        let stream = self.stream()?;
        let pos = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(pos))?;
        Ok(pos >= end)
    }

    fn remaining(&mut self) -> Result<u64, IoError> {
        let stream = self.stream()?;
        let pos = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(pos))?;
        Ok(end.saturating_sub(pos))
    }

    fn flush(&mut self) -> Result<(), IoError> {
        Ok(self.stream()?.flush()?)
    }

    fn close(&mut self) -> Result<(), IoError> {
        let mut stream = self.inner.take().ok_or(IoError::Closed)?;
        stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_write_then_read() {
        let mut io = MemoryIo::new();
        assert_eq!(io.write(b"abc").unwrap(), 3);
        assert_eq!(io.tell().unwrap(), 3);
        assert!(io.is_eof().unwrap());

        io.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(io.read(2).unwrap(), b"ab");
        assert!(!io.is_eof().unwrap());
    }

    #[test]
    fn test_memory_short_read() {
        let mut io = MemoryIo::from_bytes(vec![1, 2]);
        let result = io.read(3);
        assert!(matches!(result, Err(IoError::ShortRead { wanted: 3, got: 2 })));
    }

    #[test]
    fn test_oversized_read_fails_without_allocating() {
        let mut io = MemoryIo::from_bytes(vec![1, 2, 3]);
        io.skip(1).unwrap();
        assert_eq!(io.remaining().unwrap(), 2);
        assert!(matches!(
            io.read(1 << 40),
            Err(IoError::ShortRead { wanted, got: 2 }) if wanted == 1 << 40
        ));
        assert_eq!(io.read(2).unwrap(), vec![2, 3]);

        let mut stream = StreamIo::new(Cursor::new(vec![0u8; 4]));
        assert_eq!(stream.remaining().unwrap(), 4);
        assert!(matches!(stream.read(usize::MAX), Err(IoError::ShortRead { got: 4, .. })));
        assert_eq!(stream.tell().unwrap(), 0);
    }

    #[test]
    fn test_memory_seek_bounds() {
        let mut io = MemoryIo::from_bytes(vec![0; 4]);
        assert!(io.skip(4).is_ok());
        assert!(matches!(io.skip(1), Err(IoError::InvalidSeek(5))));
        assert!(matches!(
            io.seek(SeekFrom::Current(-5)),
            Err(IoError::InvalidSeek(-1))
        ));
        assert_eq!(io.seek(SeekFrom::End(-1)).unwrap(), 3);
    }

    #[test]
    fn test_memory_overwrite() {
        let mut io = MemoryIo::from_bytes(b"hello".to_vec());
        io.seek(SeekFrom::Start(1)).unwrap();
        io.write(b"EL").unwrap();
        assert_eq!(io.as_bytes(), b"hELlo");
    }

    #[test]
    fn test_memory_closed() {
        let mut io = MemoryIo::new();
        io.close().unwrap();
        assert!(io.is_closed());
        assert!(matches!(io.write(b"x"), Err(IoError::Closed)));
        assert!(matches!(io.read(1), Err(IoError::Closed)));
        assert!(matches!(io.close(), Err(IoError::Closed)));
    }

    #[test]
    fn test_stream_io() {
        let mut io = StreamIo::new(Cursor::new(Vec::new()));
        io.write(b"xyz").unwrap();
        assert!(io.is_eof().unwrap());
        io.seek(SeekFrom::Start(1)).unwrap();
        assert_eq!(io.read(2).unwrap(), b"yz");
        assert!(matches!(io.read(1), Err(IoError::ShortRead { .. })));

        io.close().unwrap();
        assert!(matches!(io.tell(), Err(IoError::Closed)));
    }
}
