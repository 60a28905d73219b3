//! Writing a [`RackResponse`] back to the host.
//!
//! [`ResponsePropagator`] is the seam between the dispatcher and the host
//! container's response object. [`HttpResponsePropagator`] renders the
//! response as HTTP/1.1 onto any [`AsyncWrite`]:
//!
//! - the body is framed with `Content-Length` when its size is known, either
//!   from the body itself or from a `Content-Length` the application set; a
//!   body that doesn't match that length is rejected rather than sent
//! - otherwise it is sent with chunked transfer encoding
//! - `1xx`, `204` and `304` responses are sent without framing headers or body

use std::io;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::response::{BoxError, RackResponse};

/// Initial buffer size allocated for the status line and headers
const INIT_HEADER_SIZE: usize = 4 * 1024;

#[async_trait]
pub trait ResponsePropagator<H: ?Sized + Send>: Send + Sync {
    type Error: Into<BoxError>;

    /// Writes status, headers and body onto `host`.
    async fn propagate(&self, response: RackResponse, host: &mut H) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum PropagateError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl PropagateError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadSize {
    Length(u64),
    Chunked,
    Empty,
    // the status forbids a body
    Forbidden,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpResponsePropagator;

impl HttpResponsePropagator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<W> ResponsePropagator<W> for HttpResponsePropagator
where
    W: AsyncWrite + Unpin + Send,
{
    type Error = PropagateError;

    async fn propagate(&self, response: RackResponse, writer: &mut W) -> Result<(), Self::Error> {
        let (status, mut headers, mut body) = response.into_parts();
        let payload_size = resolve_payload_size(status, &headers, &body);

        let mut head = BytesMut::with_capacity(INIT_HEADER_SIZE);
        encode_head(status, &mut headers, payload_size, &mut head);
        writer.write_all(&head).await?;

        if payload_size == PayloadSize::Forbidden {
            if !body.is_end_stream() {
                warn!(status = status.as_u16(), "dropping response body the status does not allow");
            }
            writer.flush().await?;
            return Ok(());
        }

        let declared = match payload_size {
            PayloadSize::Length(length) => length,
            _ => 0,
        };
        let mut remaining = declared;

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    // trailers are not sent
                    let Ok(data) = frame.into_data() else { continue };
                    if data.is_empty() {
                        continue;
                    }

                    if payload_size == PayloadSize::Chunked {
                        writer.write_all(format!("{:X}\r\n", data.len()).as_bytes()).await?;
                        writer.write_all(&data).await?;
                        writer.write_all(b"\r\n").await?;
                        continue;
                    }

                    let size = data.len() as u64;
                    if size > remaining {
                        return Err(PropagateError::invalid_body(format!("response body exceeds content-length {declared}")));
                    }
                    remaining -= size;
                    writer.write_all(&data).await?;
                }
                Some(Err(e)) => return Err(PropagateError::invalid_body(format!("resolve response body error: {e}"))),
                None => break,
            }
        }

        if remaining > 0 {
            return Err(PropagateError::invalid_body(format!(
                "response body ended {remaining} bytes short of content-length {declared}"
            )));
        }

        if payload_size == PayloadSize::Chunked {
            writer.write_all(b"0\r\n\r\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

fn resolve_payload_size<B: Body>(status: StatusCode, headers: &HeaderMap, body: &B) -> PayloadSize {
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return PayloadSize::Forbidden;
    }

    match body.size_hint().exact() {
        Some(0) => PayloadSize::Empty,
        Some(length) => PayloadSize::Length(length),
        None => headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map_or(PayloadSize::Chunked, PayloadSize::Length),
    }
}

fn encode_head(status: StatusCode, headers: &mut HeaderMap, payload_size: PayloadSize, dst: &mut BytesMut) {
    dst.put_slice(b"HTTP/1.1 ");
    dst.put_slice(status.as_str().as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(status.canonical_reason().unwrap_or_default().as_bytes());
    dst.put_slice(b"\r\n");

    match payload_size {
        PayloadSize::Length(n) => {
            headers.remove(TRANSFER_ENCODING);
            headers.insert(CONTENT_LENGTH, n.into());
        }
        PayloadSize::Chunked => {
            headers.remove(CONTENT_LENGTH);
            headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        PayloadSize::Empty => {
            headers.remove(TRANSFER_ENCODING);
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        PayloadSize::Forbidden => {
            headers.remove(TRANSFER_ENCODING);
            headers.remove(CONTENT_LENGTH);
        }
    }

    for (header_name, header_value) in headers.iter() {
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}
