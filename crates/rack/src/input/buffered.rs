use std::io;
use std::io::SeekFrom;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::source::{source_closed, BodySource};

/// Bytes kept in memory before the record spills to a temp file.
pub const DEFAULT_MEMORY_THRESHOLD: usize = 64 * 1024;

/// Makes a forward only body replayable.
///
/// Every byte pulled from the upstream reader is recorded. The record lives
/// in memory until it would grow past the memory threshold, then moves to an
/// anonymous temp file which is unlinked on creation and removed from disk
/// when the source is closed or dropped.
///
/// Reads below the recorded length are served from the record, reads past it
/// continue from upstream, so a rewind never re-reads the network.
///
/// Bytes taken from upstream are never dropped. If the temp file can't be
/// created the record stays in memory. If a write to an existing temp file
/// fails the record can no longer be trusted, and every later read or
/// rewind fails with that error.
#[derive(Debug)]
pub struct BufferedSource<R> {
    upstream: Option<R>,
    record: Record,
    recorded: u64,
    position: u64,
    upstream_eof: bool,
    memory_threshold: usize,
    spill_dir: Option<PathBuf>,
    spill_failed: bool,
    broken: Option<(io::ErrorKind, String)>,
    closed: bool,
}

#[derive(Debug)]
enum Record {
    Memory(Vec<u8>),
    File(File),
}

impl<R> BufferedSource<R> {
    pub fn new(upstream: R) -> Self {
        Self::with_memory_threshold(upstream, DEFAULT_MEMORY_THRESHOLD)
    }

    pub fn with_memory_threshold(upstream: R, memory_threshold: usize) -> Self {
        Self {
            upstream: Some(upstream),
            record: Record::Memory(Vec::new()),
            recorded: 0,
            position: 0,
            upstream_eof: false,
            memory_threshold,
            spill_dir: None,
            spill_failed: false,
            broken: None,
            closed: false,
        }
    }

    /// Creates the temp file in `dir` instead of the system temp directory.
    pub fn spill_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Whether the record has moved to disk.
    pub fn is_spilled(&self) -> bool {
        matches!(self.record, Record::File(_))
    }

    /// Number of body bytes recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

impl<R> BufferedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn replay(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.recorded - self.position;
        let size = usize::try_from(available).map_or(buf.len(), |available| available.min(buf.len()));

        match &mut self.record {
            Record::Memory(data) => {
                let start = self.position as usize;
                buf[..size].copy_from_slice(&data[start..start + size]);
            }
            Record::File(file) => {
                file.seek(SeekFrom::Start(self.position)).await?;
                file.read_exact(&mut buf[..size]).await?;
            }
        }

        self.position += size as u64;
        Ok(size)
    }

    async fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.record {
            Record::Memory(data) if self.spill_failed || data.len() + chunk.len() <= self.memory_threshold => {
                data.extend_from_slice(chunk);
            }
            Record::Memory(data) => match spill(self.spill_dir.clone(), data, chunk).await {
                Ok(file) => {
                    debug!(recorded = self.recorded + chunk.len() as u64, "request body spilled to temp file");
                    self.record = Record::File(file);
                }
                Err(e) => {
                    warn!(cause = %e, recorded = data.len(), "can't spill request body, keeping it in memory");
                    self.spill_failed = true;
                    data.extend_from_slice(chunk);
                }
            },
            Record::File(file) => {
                // the record length is only advanced once the whole chunk is on disk
                file.seek(SeekFrom::Start(self.recorded)).await?;
                file.write_all(chunk).await?;
                file.flush().await?;
            }
        }

        Ok(())
    }

    fn ensure_intact(&self) -> io::Result<()> {
        if self.closed {
            return Err(source_closed());
        }
        match &self.broken {
            Some((kind, message)) => Err(io::Error::new(*kind, message.clone())),
            None => Ok(()),
        }
    }
}

async fn spill(dir: Option<PathBuf>, memory: &[u8], chunk: &[u8]) -> io::Result<File> {
    let file = tokio::task::spawn_blocking(move || match dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    })
    .await
    .map_err(io::Error::other)??;
    let mut file = File::from_std(file);
    file.write_all(memory).await?;
    file.write_all(chunk).await?;
    file.flush().await?;
    Ok(file)
}

#[async_trait]
impl<R> BodySource for BufferedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_intact()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if self.position < self.recorded {
            return self.replay(buf).await;
        }

        if self.upstream_eof {
            return Ok(0);
        }

        let upstream = self.upstream.as_mut().ok_or_else(source_closed)?;
        let size = upstream.read(buf).await?;
        if size == 0 {
            self.upstream_eof = true;
            trace!(recorded = self.recorded, "upstream body exhausted");
            return Ok(0);
        }

        if let Err(e) = self.append(&buf[..size]).await {
            warn!(cause = %e, recorded = self.recorded, "request body record broken");
            self.broken = Some((e.kind(), format!("request body record broken after {} bytes: {e}", self.recorded)));
            return Err(e);
        }
        self.recorded += size as u64;
        self.position += size as u64;
        Ok(size)
    }

    async fn rewind(&mut self) -> io::Result<()> {
        self.ensure_intact()?;
        self.position = 0;
        Ok(())
    }

    fn is_rewindable(&self) -> bool {
        !self.closed && self.broken.is_none()
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.upstream.take();
        if let Record::File(file) = std::mem::replace(&mut self.record, Record::Memory(Vec::new())) {
            drop(file);
            debug!(recorded = self.recorded, "temp file for request body released");
        }
        Ok(())
    }
}
