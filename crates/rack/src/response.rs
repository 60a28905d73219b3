//! The status, headers and body triple a Rack application returns.

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};

pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug)]
pub struct RackResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: RackBody,
}

impl RackResponse {
    pub fn new<B: Into<RackBody>>(status: StatusCode, headers: HeaderMap, body: B) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// A response with no headers.
    pub fn with_status<B: Into<RackBody>>(status: StatusCode, body: B) -> Self {
        Self::new(status, HeaderMap::new(), body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RackBody {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, RackBody) {
        (self.status, self.headers, self.body)
    }
}

impl<B: Into<RackBody>> From<Response<B>> for RackResponse {
    fn from(response: Response<B>) -> Self {
        let (parts, body) = response.into_parts();
        Self { status: parts.status, headers: parts.headers, body: body.into() }
    }
}

impl From<RackResponse> for Response<RackBody> {
    fn from(response: RackResponse) -> Self {
        let mut converted = Response::new(response.body);
        *converted.status_mut() = response.status;
        *converted.headers_mut() = response.headers;
        converted
    }
}

/// The body producer of a [`RackResponse`].
pub struct RackBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(UnsyncBoxBody<Bytes, BoxError>),
}

impl RackBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self { inner: Kind::Once(Some(bytes)) }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: Kind::Stream(UnsyncBoxBody::new(body.map_err(Into::into))) }
    }

    /// A body yielding each chunk in order, the way a Rack body yields from
    /// `each`.
    pub fn chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        let frames = chunks.into_iter().map(|chunk| Ok::<_, BoxError>(Frame::data(chunk)));
        Self::stream(StreamBody::new(futures::stream::iter(frames)))
    }
}

impl fmt::Debug for RackBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Kind::Once(bytes) => f.debug_tuple("RackBody::Once").field(bytes).finish(),
            Kind::Stream(_) => f.write_str("RackBody::Stream"),
        }
    }
}

impl Default for RackBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for RackBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RackBody {
    fn from(bytes: Bytes) -> Self {
        Self::once(bytes)
    }
}

impl From<Vec<u8>> for RackBody {
    fn from(value: Vec<u8>) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<String> for RackBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for RackBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl HttpBody for RackBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.get_mut().inner {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(box_body) => Pin::new(box_body).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use http::HeaderValue;
    use std::io;

    fn check_send<T: Send>() {}

    #[test]
    fn is_send() {
        check_send::<RackBody>();
        check_send::<RackResponse>();
    }

    #[tokio::test]
    async fn string_body() {
        let mut body = RackBody::from("Hello world".to_owned());

        assert_eq!(body.size_hint().exact(), Some(11));
        assert!(!body.is_end_stream());

        let bytes = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(bytes, Bytes::from("Hello world"));

        assert!(body.is_end_stream());
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn empty_body() {
        let mut body = RackBody::from("");

        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn chunked_body() {
        let mut body = RackBody::chunks(vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")]);

        assert!(body.size_hint().exact().is_none());
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), b"a");
        assert_eq!(body.frame().await.unwrap().unwrap().into_data().unwrap().as_ref(), b"bc");
        assert!(body.frame().await.is_none());
    }

    #[tokio::test]
    async fn stream_body_errors_are_boxed() {
        let frames: Vec<Result<Frame<Bytes>, io::Error>> = vec![Err(io::Error::other("broken"))];
        let mut body = RackBody::stream(StreamBody::new(futures::stream::iter(frames)));

        let error = body.frame().await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "broken");
    }

    #[test]
    fn converts_from_http_response() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header(CONTENT_TYPE, "text/plain")
            .body("made")
            .unwrap();

        let rack_response = RackResponse::from(response);
        assert_eq!(rack_response.status(), StatusCode::CREATED);
        assert_eq!(rack_response.headers().get(CONTENT_TYPE), Some(&HeaderValue::from_static("text/plain")));
        assert_eq!(rack_response.body().size_hint().exact(), Some(4));

        let response: Response<RackBody> = rack_response.into();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
