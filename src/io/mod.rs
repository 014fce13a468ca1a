use crate::prelude::*;
use std::fs::File;

mod cached;
#[cfg(target_family = "unix")]
mod unix;

pub use cached::CachedStream;

#[cfg(not(target_family = "unix"))]
compile_error!("Specified target platform is not supported (only unix family supported)");

/// Random-access byte stream the files are built on.
///
/// Implemented for every `Read + Write + Seek` type, e.g. [`std::fs::File`] or
/// [`std::io::Cursor`] over a `Vec<u8>`.
pub trait Stream: Read + Write + Seek {}

impl<T: Read + Write + Seek> Stream for T {}

/// Stream over a locked file on disk.
pub type FileStream = CachedStream<File>;

/// Creates a new file at `path` and locks it for exclusive use.
///
/// # Errors
/// Fails if the file already exists or another process holds its lock.
pub fn create(path: impl AsRef<Path>) -> Result<FileStream> {
    let path = path.as_ref();
    let file = File::options()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create file: {}", path.display()))?;
    unix::lock(&file, path, false)?;
    debug!("created {}", path.display());
    Ok(CachedStream::new(file)?)
}

/// Opens an existing file at `path`.
///
/// A read-only file is shared-locked, a writable one exclusively locked.
///
/// # Errors
/// Fails if the file is missing or the lock is held by another process.
pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<FileStream> {
    let path = path.as_ref();
    let file = File::options()
        .read(true)
        .write(!read_only)
        .open(path)
        .with_context(|| format!("failed to open file: {}", path.display()))?;
    unix::lock(&file, path, read_only)?;
    debug!("opened {} (read only: {})", path.display(), read_only);
    Ok(CachedStream::new(file)?)
}

/// Returns the current length of `stream`. Leaves the position at the end.
pub(crate) fn stream_len<S: Seek>(stream: &mut S) -> std::io::Result<u64> {
    stream.seek(SeekFrom::End(0))
}

/// Fills `buf` from `offset`, zeroing whatever lies past the end of the stream.
pub(crate) fn read_at<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    stream.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf[filled..].fill(0);
    Ok(filled)
}

pub(crate) fn write_at<S: Write + Seek>(
    stream: &mut S,
    offset: u64,
    buf: &[u8],
) -> std::io::Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.write_all(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_past_end_is_zero_filled() {
        let mut stream = Cursor::new(vec![1_u8, 2, 3]);
        let mut buf = [9_u8; 5];
        let read = read_at(&mut stream, 1, &mut buf).unwrap();
        assert_eq!(read, 2);
        assert_eq!(buf, [2, 3, 0, 0, 0]);
    }

    #[test]
    fn write_extends_stream() {
        let mut stream = Cursor::new(Vec::new());
        write_at(&mut stream, 0, &[1, 2]).unwrap();
        write_at(&mut stream, 2, &[3]).unwrap();
        assert_eq!(stream_len(&mut stream).unwrap(), 3);
        assert_eq!(stream.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn create_refuses_existing_file() {
        let path = std::env::temp_dir().join(format!("bsharptree-io-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let stream = create(&path).unwrap();
        drop(stream);
        assert!(create(&path).is_err());
        let stream = open(&path, true).unwrap();
        assert_eq!(stream.len(), 0);
        drop(stream);
        std::fs::remove_file(&path).unwrap();
    }
}
