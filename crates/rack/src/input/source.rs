use std::io;
use std::io::SeekFrom;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::trace;

/// A byte producer for one request body.
///
/// This is the seam between [`RackInput`](super::RackInput) and whatever the
/// host container reads the body from. A source is owned by exactly one
/// input and never shared, so implementations need no interior locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BodySource: Send {
    /// Reads into `buf`, returning the number of bytes written. `Ok(0)` means
    /// the body is exhausted.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Repositions the source at the first byte of the body.
    async fn rewind(&mut self) -> io::Result<()>;

    /// Whether [`rewind`](Self::rewind) can currently succeed.
    fn is_rewindable(&self) -> bool;

    /// Releases the underlying resource. Must tolerate repeated calls.
    async fn close(&mut self) -> io::Result<()>;
}

pub(crate) fn source_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "body source is closed")
}

/// A forward only source over any [`AsyncRead`].
///
/// It can only be rewound while nothing has been read from it yet.
#[derive(Debug)]
pub struct StreamSource<R> {
    reader: Option<R>,
    consumed: u64,
}

impl<R> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: Some(reader), consumed: 0 }
    }
}

#[async_trait]
impl<R> BodySource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self.reader.as_mut().ok_or_else(source_closed)?;
        let size = reader.read(buf).await?;
        self.consumed += size as u64;
        Ok(size)
    }

    async fn rewind(&mut self) -> io::Result<()> {
        if self.consumed == 0 {
            return Ok(());
        }

        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("can't rewind a forward only body after {} bytes were read", self.consumed),
        ))
    }

    fn is_rewindable(&self) -> bool {
        self.consumed == 0
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.reader.take().is_some() {
            trace!(consumed = self.consumed, "stream source closed");
        }
        Ok(())
    }
}

/// A source over a seekable reader, rewound by seeking back to where the
/// body starts.
#[derive(Debug)]
pub struct SeekableSource<S> {
    inner: Option<S>,
    start: u64,
}

impl<S> SeekableSource<S> {
    /// The body starts at offset 0 of `inner`.
    pub fn new(inner: S) -> Self {
        Self::with_start(inner, 0)
    }

    pub fn with_start(inner: S, start: u64) -> Self {
        Self { inner: Some(inner), start }
    }
}

#[async_trait]
impl<S> BodySource for SeekableSource<S>
where
    S: AsyncRead + AsyncSeek + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(source_closed)?;
        inner.read(buf).await
    }

    async fn rewind(&mut self) -> io::Result<()> {
        let inner = self.inner.as_mut().ok_or_else(source_closed)?;
        inner.seek(SeekFrom::Start(self.start)).await?;
        Ok(())
    }

    fn is_rewindable(&self) -> bool {
        self.inner.is_some()
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }
}
