use std::io::{self, Read, Write};
use std::sync::MutexGuard;

use redcat_channel::Channel;
use redcat_gtfobins::{ReadAdapter, WriteAdapter};
use redcat_protocol::RemoteStream;

/// A file-like stream over a remote path, produced by
/// [`Session::open_read`](crate::Session::open_read) and
/// [`Session::open_write`](crate::Session::open_write).
///
/// The file holds the session's channel lock for its whole lifetime; no
/// other remote interaction can happen until it is closed or dropped.
/// Reading and writing are exclusive per file: the inappropriate direction
/// reports [`io::ErrorKind::Unsupported`].
#[derive(Debug)]
pub struct RemoteFile<'session, C: Channel> {
    path: String,
    inner: FileInner<'session, C>,
}

#[derive(Debug)]
enum FileInner<'session, C: Channel> {
    Reader(ReadAdapter<RemoteStream<MutexGuard<'session, C>>>),
    Writer(WriteAdapter<RemoteStream<MutexGuard<'session, C>>>),
}

impl<'session, C: Channel> RemoteFile<'session, C> {
    pub(crate) fn reader(
        path: String,
        adapter: ReadAdapter<RemoteStream<MutexGuard<'session, C>>>,
    ) -> Self {
        Self {
            path,
            inner: FileInner::Reader(adapter),
        }
    }

    pub(crate) fn writer(
        path: String,
        adapter: WriteAdapter<RemoteStream<MutexGuard<'session, C>>>,
    ) -> Self {
        Self {
            path,
            inner: FileInner::Writer(adapter),
        }
    }

    /// The remote path this file is bound to.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Closes the file, unwinding remote state (codec tail, declared-length
    /// padding, exit command, terminal restore).
    pub fn close(mut self) -> io::Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> io::Result<()> {
        match &mut self.inner {
            FileInner::Reader(adapter) => adapter.get_mut().close(),
            FileInner::Writer(adapter) => {
                adapter.finish()?;
                adapter.get_mut().close()
            }
        }
    }
}

impl<C: Channel> Read for RemoteFile<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            FileInner::Reader(adapter) => adapter.read(buf),
            FileInner::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file opened for writing",
            )),
        }
    }
}

impl<C: Channel> Write for RemoteFile<'_, C> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            FileInner::Writer(adapter) => adapter.write(data),
            FileInner::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "file opened for reading",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            FileInner::Writer(adapter) => adapter.flush(),
            FileInner::Reader(_) => Ok(()),
        }
    }
}

impl<C: Channel> Drop for RemoteFile<'_, C> {
    fn drop(&mut self) {
        let _ = self.close_inner();
    }
}
