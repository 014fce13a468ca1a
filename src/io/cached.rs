use crate::prelude::*;
use std::io::{Error as IOError, ErrorKind as IOErrorKind, Result as IOResult};

/// Stream wrapper that remembers the position and length of the wrapped stream.
///
/// Every buffer access seeks first; with the position cached, a seek to the current
/// position and the length queries used for allocation never reach the file.
#[derive(Debug)]
pub struct CachedStream<S> {
    inner: S,
    position: u64,
    length: u64,
}

impl<S: Seek> CachedStream<S> {
    /// Wraps `inner`, positioning it at the start.
    ///
    /// # Errors
    /// Fails if `inner` cannot be seeked.
    pub fn new(mut inner: S) -> IOResult<Self> {
        let length = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            position: 0,
            length,
        })
    }

    /// Current length of the stream in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Checks if nothing was written to the stream.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Gets a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unwraps the stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read> Read for CachedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> IOResult<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: Write> Write for CachedStream<S> {
    fn write(&mut self, buf: &[u8]) -> IOResult<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        self.length = self.length.max(self.position);
        Ok(n)
    }

    fn flush(&mut self) -> IOResult<()> {
        self.inner.flush()
    }
}

impl<S: Seek> Seek for CachedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> IOResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        }
        .ok_or_else(|| IOError::new(IOErrorKind::InvalidInput, "seek to a negative offset"))?;
        if target != self.position {
            self.position = self.inner.seek(SeekFrom::Start(target))?;
        }
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tracks_length_and_position() {
        let mut stream = CachedStream::new(Cursor::new(vec![0_u8; 4])).unwrap();
        assert_eq!(stream.len(), 4);
        stream.seek(SeekFrom::End(-1)).unwrap();
        stream.write_all(&[7, 8, 9]).unwrap();
        assert_eq!(stream.len(), 6);
        assert_eq!(stream.seek(SeekFrom::Current(0)).unwrap(), 6);
        stream.seek(SeekFrom::Start(3)).unwrap();
        let mut buf = [0; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [7, 8, 9]);
        assert_eq!(stream.into_inner().into_inner(), vec![0, 0, 0, 7, 8, 9]);
    }

    #[test]
    fn negative_seek_fails() {
        let mut stream = CachedStream::new(Cursor::new(Vec::<u8>::new())).unwrap();
        assert!(stream.seek(SeekFrom::Current(-1)).is_err());
    }
}
