use crate::io::{read_at, stream_len, write_at};
use crate::prelude::*;
use bincode::{deserialize, serialize};
use static_assertions::const_assert_eq;

pub(crate) const BUFFER_FILE_MAGIC: [u8; 5] = [98, 112, 78, 98, 102];
pub(crate) const BUFFER_FILE_VERSION: u8 = 0;
/// Smallest buffer a `BufferFile` accepts.
pub const MIN_BUFFER_SIZE: usize = 16;
pub(crate) const BUFFER_FILE_HEADER_SIZE: usize = 10;

const_assert_eq!(BUFFER_FILE_HEADER_SIZE, 5 + 1 + 4);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Header {
    magic: [u8; 5],
    version: u8,
    buffer_size: u32,
}

impl Header {
    fn new(buffer_size: u32) -> Self {
        Self {
            magic: BUFFER_FILE_MAGIC,
            version: BUFFER_FILE_VERSION,
            buffer_size,
        }
    }

    fn from_raw(buf: &[u8]) -> bincode::Result<Self> {
        deserialize(buf)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != BUFFER_FILE_MAGIC {
            return Err(Error::structure("buffer file header magic mismatch").into());
        }
        if self.version != BUFFER_FILE_VERSION {
            let cause = format!(
                "buffer file version: {}, expected: {}",
                self.version, BUFFER_FILE_VERSION
            );
            return Err(Error::structure(cause).into());
        }
        if (self.buffer_size as usize) < MIN_BUFFER_SIZE {
            let cause = format!("buffer size too small: {}", self.buffer_size);
            return Err(Error::structure(cause).into());
        }
        Ok(())
    }
}

/// Store of fixed-size buffers over a seekable stream.
///
/// Layout: `[magic][version][buffer size][buffer 0][buffer 1]...` starting at `seek_start`.
/// Buffers are addressed by number and may only be written at or below the current
/// extent, so the file never gets holes.
#[derive(Debug)]
pub struct BufferFile<S> {
    stream: S,
    seek_start: u64,
    buffer_size: usize,
}

impl<S: Stream> BufferFile<S> {
    /// Writes a fresh header to `stream` at `seek_start`.
    ///
    /// # Errors
    /// Fails if `buffer_size` is smaller than [`MIN_BUFFER_SIZE`] or on I/O error.
    pub fn initialize_in_stream(mut stream: S, buffer_size: usize, seek_start: u64) -> Result<Self> {
        if buffer_size < MIN_BUFFER_SIZE {
            let cause = format!("buffer size too small: {} < {}", buffer_size, MIN_BUFFER_SIZE);
            return Err(Error::config(cause).into());
        }
        let size = u32::try_from(buffer_size)
            .map_err(|_| Error::config(format!("buffer size too large: {}", buffer_size)))?;
        let header = serialize(&Header::new(size))?;
        write_at(&mut stream, seek_start, &header)?;
        trace!("buffer file initialized, buffer size: {}", buffer_size);
        Ok(Self {
            stream,
            seek_start,
            buffer_size,
        })
    }

    /// Reads and validates the header found in `stream` at `seek_start`.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the header is not a buffer file header.
    pub fn setup_from_existing_stream(mut stream: S, seek_start: u64) -> Result<Self> {
        let mut buf = [0; BUFFER_FILE_HEADER_SIZE];
        let read = read_at(&mut stream, seek_start, &mut buf)?;
        if read < BUFFER_FILE_HEADER_SIZE {
            return Err(Error::structure("buffer file header is truncated").into());
        }
        let header = Header::from_raw(&buf)?;
        header.validate()?;
        Ok(Self {
            stream,
            seek_start,
            buffer_size: header.buffer_size as usize,
        })
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of the first buffer past the end of the stream.
    ///
    /// A trailing, partially written buffer counts as a whole one.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn next_buffer_number(&mut self) -> Result<u64> {
        let data_start = self.data_start();
        let len = stream_len(&mut self.stream)?;
        if len <= data_start {
            return Ok(0);
        }
        let data = len - data_start;
        let size = self.buffer_size as u64;
        Ok(data / size + u64::from(data % size != 0))
    }

    /// Reads `buf.len()` bytes from the start of buffer `number`.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if the buffer does not exist or `buf` is larger than a
    /// buffer.
    pub fn get_buffer(&mut self, number: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() > self.buffer_size {
            let cause = format!(
                "buffer read too large: {} > {}",
                buf.len(),
                self.buffer_size
            );
            return Err(Error::structure(cause).into());
        }
        let next = self.next_buffer_number()?;
        if number >= next {
            let cause = format!("buffer {} does not exist, extent is {}", number, next);
            return Err(Error::structure(cause).into());
        }
        let offset = self.buffer_seek(number);
        read_at(&mut self.stream, offset, buf)?;
        Ok(())
    }

    /// Writes `data` at the start of buffer `number`.
    ///
    /// # Errors
    /// Fails with [`Kind::Structure`] if `number` would leave a hole or `data` does not fit.
    pub fn set_buffer(&mut self, number: u64, data: &[u8]) -> Result<()> {
        if data.len() > self.buffer_size {
            let cause = format!("buffer write too large: {} > {}", data.len(), self.buffer_size);
            return Err(Error::structure(cause).into());
        }
        let next = self.next_buffer_number()?;
        if number > next {
            let cause = format!("buffer {} would skip buffers, extent is {}", number, next);
            return Err(Error::structure(cause).into());
        }
        let offset = self.buffer_seek(number);
        write_at(&mut self.stream, offset, data)?;
        Ok(())
    }

    /// Flushes the underlying stream.
    ///
    /// # Errors
    /// Fails on I/O error.
    pub fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    pub(crate) fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwraps the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn data_start(&self) -> u64 {
        self.seek_start + BUFFER_FILE_HEADER_SIZE as u64
    }

    fn buffer_seek(&self, number: u64) -> u64 {
        self.data_start() + number * self.buffer_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn new_file(buffer_size: usize, seek_start: u64) -> BufferFile<Cursor<Vec<u8>>> {
        let stream = Cursor::new(vec![0xAA; seek_start as usize]);
        BufferFile::initialize_in_stream(stream, buffer_size, seek_start).unwrap()
    }

    #[test]
    fn header_layout() {
        let file = new_file(20, 3);
        let raw = file.into_inner().into_inner();
        assert_eq!(raw.len(), 3 + BUFFER_FILE_HEADER_SIZE);
        assert_eq!(&raw[3..8], b"bpNbf");
        assert_eq!(raw[8], 0);
        assert_eq!(&raw[9..13], &20_u32.to_le_bytes());
    }

    #[test]
    fn set_get_buffers() {
        let mut file = new_file(16, 0);
        assert_eq!(file.next_buffer_number().unwrap(), 0);
        file.set_buffer(0, &[1; 16]).unwrap();
        file.set_buffer(1, &[2; 4]).unwrap();
        assert_eq!(file.next_buffer_number().unwrap(), 2);
        let mut buf = [0; 16];
        file.get_buffer(1, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[2; 4]);
        assert_eq!(&buf[4..], &[0; 12]);
        file.get_buffer(0, &mut buf).unwrap();
        assert_eq!(buf, [1; 16]);
    }

    #[test]
    fn holes_and_missing_buffers_are_rejected() {
        let mut file = new_file(16, 0);
        let err = file.set_buffer(1, &[1]).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
        let mut buf = [0; 16];
        let err = file.get_buffer(0, &mut buf).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
        assert!(file.set_buffer(0, &[0; 17]).is_err());
    }

    #[test]
    fn reopen_validates_header() {
        let mut file = new_file(32, 5);
        file.set_buffer(0, &[3; 32]).unwrap();
        let stream = file.into_inner();
        let mut file = BufferFile::setup_from_existing_stream(stream, 5).unwrap();
        assert_eq!(file.buffer_size(), 32);
        assert_eq!(file.next_buffer_number().unwrap(), 1);

        let mut raw = file.into_inner().into_inner();
        raw[5] = b'x';
        let err = BufferFile::setup_from_existing_stream(Cursor::new(raw), 5).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::Structure));
    }

    #[test]
    fn small_buffers_are_rejected() {
        let err = BufferFile::initialize_in_stream(Cursor::new(Vec::new()), 15, 0).unwrap_err();
        assert_eq!(Error::kind_of(&err), Some(&Kind::WrongConfig));
    }
}
