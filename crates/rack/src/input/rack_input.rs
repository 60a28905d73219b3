use std::fmt;
use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tracing::{debug, trace};

use super::error::InputError;
use super::source::{BodySource, SeekableSource};

/// Default size of a single read from the body source.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Largest length [`RackInput::read`] honors; bigger limits are clamped to it.
pub const MAX_READ_LENGTH: usize = isize::MAX as usize;

/// The `rack.input` stream of one request.
///
/// Yields raw body bytes through line reads ([`gets`](Self::gets),
/// [`each`](Self::each)), bounded or unbounded reads ([`read`](Self::read)),
/// and replay from the beginning ([`rewind`](Self::rewind)). Nothing is
/// ever decoded: the bytes returned are exactly the bytes the client sent.
///
/// End of stream is reported as `Ok(None)`, which is distinct from an empty
/// chunk. Loops over the input should stop on either.
pub struct RackInput {
    source: Box<dyn BodySource>,
    buffer: BytesMut,
    // prefix of `buffer` already known to hold no line terminator
    scanned: usize,
    source_eof: bool,
    position: u64,
    chunk_size: usize,
    closed: bool,
}

impl fmt::Debug for RackInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RackInput")
            .field("buffered", &self.buffer.len())
            .field("source_eof", &self.source_eof)
            .field("position", &self.position)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl RackInput {
    pub fn new<S: BodySource + 'static>(source: S) -> Self {
        Self::with_chunk_size(source, DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size<S: BodySource + 'static>(source: S, chunk_size: usize) -> Self {
        Self {
            source: Box::new(source),
            buffer: BytesMut::new(),
            scanned: 0,
            source_eof: false,
            position: 0,
            chunk_size: chunk_size.max(1),
            closed: false,
        }
    }

    /// An input over an in-memory body.
    pub fn from_bytes<B: Into<Bytes>>(body: B) -> Self {
        Self::new(SeekableSource::new(Cursor::new(body.into())))
    }

    /// An input for a request without a body.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Reads the next line, terminator included.
    ///
    /// The last line is returned without a terminator if the body does not
    /// end with one. Returns `Ok(None)` once the body is exhausted.
    pub async fn gets(&mut self) -> Result<Option<Bytes>, InputError> {
        self.ensure_open()?;

        loop {
            if let Some(index) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + index + 1;
                return Ok(Some(self.take(end)));
            }
            self.scanned = self.buffer.len();

            if self.source_eof {
                return Ok(self.take_remaining());
            }
            self.fill().await?;
        }
    }

    /// Reads up to `limit` bytes, or everything left when `limit` is `None`.
    ///
    /// Fewer than `limit` bytes are returned only when the body ends first.
    /// A limit above [`MAX_READ_LENGTH`] is clamped to it. `Some(0)` yields an
    /// empty chunk without touching the source.
    pub async fn read(&mut self, limit: Option<u64>) -> Result<Option<Bytes>, InputError> {
        self.ensure_open()?;

        let Some(limit) = limit else {
            while !self.source_eof {
                self.fill().await?;
            }
            return Ok(self.take_remaining());
        };

        let limit = usize::try_from(limit).map_or(MAX_READ_LENGTH, |limit| limit.min(MAX_READ_LENGTH));
        if limit == 0 {
            return Ok(Some(Bytes::new()));
        }

        while self.buffer.len() < limit && !self.source_eof {
            self.fill().await?;
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }
        let size = limit.min(self.buffer.len());
        Ok(Some(self.take(size)))
    }

    /// Moves the cursor back to the first byte of the body.
    ///
    /// On failure the cursor and everything buffered stay where they were.
    pub async fn rewind(&mut self) -> Result<(), InputError> {
        self.ensure_open()?;

        if self.position == 0 {
            // nothing handed out yet, the read-ahead still starts at offset 0
            return Ok(());
        }

        self.source.rewind().await?;
        debug!(from = self.position, "rack input rewound");

        self.buffer.clear();
        self.scanned = 0;
        self.source_eof = false;
        self.position = 0;
        Ok(())
    }

    /// Calls `visit` with every remaining line.
    pub async fn each<F>(&mut self, mut visit: F) -> Result<(), InputError>
    where
        F: FnMut(Bytes),
    {
        while let Some(line) = self.gets().await? {
            visit(line);
        }
        Ok(())
    }

    /// The remaining lines as a stream, ending at end of stream or after the
    /// first error.
    pub fn lines(&mut self) -> impl Stream<Item = Result<Bytes, InputError>> + Send + '_ {
        futures::stream::unfold(Some(self), |input| async move {
            let Some(input) = input else {
                return None;
            };
            match input.gets().await {
                Ok(Some(line)) => Some((Ok(line), Some(input))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Releases the body source. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), InputError> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.buffer = BytesMut::new();
        self.scanned = 0;
        trace!(position = self.position, "rack input closed");
        self.source.close().await?;
        Ok(())
    }

    /// Bytes handed out since the start of the body.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_rewindable(&self) -> bool {
        !self.closed && (self.position == 0 || self.source.is_rewindable())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), InputError> {
        if self.closed {
            return Err(InputError::closed());
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<(), InputError> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.chunk_size, 0);

        let result = self.source.read(&mut self.buffer[start..]).await;
        let size = *result.as_ref().unwrap_or(&0);
        self.buffer.truncate(start + size);

        if result? == 0 {
            self.source_eof = true;
        }
        Ok(())
    }

    fn take(&mut self, size: usize) -> Bytes {
        let bytes = self.buffer.split_to(size).freeze();
        self.scanned = self.scanned.saturating_sub(size);
        self.position += size as u64;
        bytes
    }

    fn take_remaining(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        let size = self.buffer.len();
        Some(self.take(size))
    }
}
