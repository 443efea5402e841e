//! In-memory byte streams.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

type Commit = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// A seekable buffer handed out by `open()`.
///
/// Read-only streams reject writes. Writable streams hand their full
/// contents to a commit callback on `flush()` and again on drop if anything
/// changed since the last flush.
pub struct BufferStream {
    cursor: Cursor<Vec<u8>>,
    commit: Option<Commit>,
    dirty: bool,
}

impl BufferStream {
    /// A read-only stream over `data`.
    pub fn reader(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            commit: None,
            dirty: false,
        }
    }

    /// A writable stream starting from `data`.
    pub fn writer(
        data: Vec<u8>,
        commit: impl FnMut(&[u8]) -> io::Result<()> + Send + 'static,
    ) -> Self {
        Self {
            cursor: Cursor::new(data),
            commit: Some(Box::new(commit)),
            dirty: false,
        }
    }

    /// Returns true if the stream accepts writes.
    pub fn is_writable(&self) -> bool {
        self.commit.is_some()
    }
}

impl std::fmt::Debug for BufferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferStream")
            .field("len", &self.cursor.get_ref().len())
            .field("position", &self.cursor.position())
            .field("writable", &self.is_writable())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Read for BufferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for BufferStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.commit.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "stream was opened read-only",
            ));
        }
        let n = self.cursor.write(buf)?;
        self.dirty = true;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(commit) = self.commit.as_mut() {
            commit(self.cursor.get_ref())?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl Seek for BufferStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Drop for BufferStream {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to commit stream on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_reader_rejects_writes() {
        let mut stream = BufferStream::reader(b"hello".to_vec());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");

        let err = stream.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_writer_commits_on_flush_and_drop() {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let sink = committed.clone();
        let mut stream = BufferStream::writer(Vec::new(), move |bytes| {
            *sink.lock().unwrap() = bytes.to_vec();
            Ok(())
        });

        stream.write_all(b"hello").unwrap();
        stream.flush().unwrap();
        assert_eq!(*committed.lock().unwrap(), b"hello");

        stream.seek(SeekFrom::Start(0)).unwrap();
        stream.write_all(b"J").unwrap();
        drop(stream);
        assert_eq!(*committed.lock().unwrap(), b"Jello");
    }

    #[test]
    fn test_clean_drop_does_not_commit() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let stream = BufferStream::writer(b"data".to_vec(), move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        drop(stream);
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
