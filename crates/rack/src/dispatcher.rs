//! One Rack request/response cycle with guaranteed input cleanup.
//!
//! [`RackDispatcher::handle`] runs:
//!
//! 1. build the environment, which allocates the request's `rack.input`
//! 2. call the application with it
//! 3. propagate the response to the host
//! 4. close `rack.input`
//!
//! Step 4 runs on every path out of steps 2 and 3: a normal return, an
//! error from either step, or a panic (caught, then resumed once the input
//! is closed). The input is closed exactly once per call.
//!
//! If the `handle` future itself is dropped before completion, the input's
//! body source is released by `Drop` instead.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use http::Request;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::application::RackApplication;
use crate::config::RackConfig;
use crate::environment::{EnvironmentBuilder, HttpEnvironmentBuilder, PATH_INFO, REQUEST_METHOD, RackEnvironment};
use crate::input::InputError;
use crate::propagator::{HttpResponsePropagator, ResponsePropagator};
use crate::response::BoxError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("rack application error: {source}")]
    Application { source: BoxError },

    #[error("response propagation error: {source}")]
    Propagation { source: BoxError },

    /// Closing `rack.input` failed after an otherwise successful dispatch.
    #[error("rack input error: {source}")]
    Input {
        #[from]
        source: InputError,
    },
}

impl DispatchError {
    /// The underlying error, as raised by the application, the propagator or
    /// the input.
    pub fn into_source(self) -> BoxError {
        match self {
            Self::Application { source } | Self::Propagation { source } => source,
            Self::Input { source } => Box::new(source),
        }
    }
}

/// Drives an application for each host request.
///
/// The dispatcher holds no per-request state, so one instance can be shared
/// across tasks behind an `Arc`.
#[derive(Debug)]
pub struct RackDispatcher<A, E = HttpEnvironmentBuilder, P = HttpResponsePropagator> {
    environment_builder: E,
    application: A,
    propagator: P,
}

impl<A> RackDispatcher<A> {
    pub fn new(application: A) -> Self {
        Self::with_config(application, RackConfig::default())
    }

    pub fn with_config(application: A, config: RackConfig) -> Self {
        Self::from_parts(HttpEnvironmentBuilder::new(config), application, HttpResponsePropagator::new())
    }
}

impl<A, E, P> RackDispatcher<A, E, P> {
    pub fn from_parts(environment_builder: E, application: A, propagator: P) -> Self {
        Self { environment_builder, application, propagator }
    }

    pub fn application(&self) -> &A {
        &self.application
    }

    /// Handles one request, writing the response onto `host`.
    ///
    /// Application and propagation errors are returned after `rack.input`
    /// has been closed. A failure to close is logged and dropped if the
    /// dispatch already failed, and returned otherwise.
    pub async fn handle<B, H>(&self, request: Request<B>, host: &mut H) -> Result<(), DispatchError>
    where
        A: RackApplication,
        E: EnvironmentBuilder<B>,
        P: ResponsePropagator<H>,
        H: ?Sized + Send,
    {
        let mut env = self.environment_builder.build(request);
        debug!(
            method = env.get_str(REQUEST_METHOD).unwrap_or("-"),
            path = env.get_str(PATH_INFO).unwrap_or("-"),
            "dispatching rack request"
        );

        let outcome = AssertUnwindSafe(self.invoke(&mut env, host)).catch_unwind().await;
        let closed = env.close_input().await;

        match outcome {
            Ok(Ok(())) => closed.map_err(DispatchError::from),
            Ok(Err(e)) => {
                if let Err(close_error) = closed {
                    warn!(cause = %close_error, "failed to close rack input after a failed dispatch");
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(close_error) = closed {
                    warn!(cause = %close_error, "failed to close rack input after a panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn invoke<H>(&self, env: &mut RackEnvironment, host: &mut H) -> Result<(), DispatchError>
    where
        A: RackApplication,
        P: ResponsePropagator<H>,
        H: ?Sized + Send,
    {
        let response = self.application.call(env).await.map_err(|e| {
            let source = e.into();
            error!(cause = %source, "rack application failed");
            DispatchError::Application { source }
        })?;

        let status = response.status();
        self.propagator.propagate(response, host).await.map_err(|e| {
            let source = e.into();
            error!(status = status.as_u16(), cause = %source, "failed to propagate rack response");
            DispatchError::Propagation { source }
        })?;

        debug!(status = status.as_u16(), "rack response propagated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::make_application;
    use crate::environment::RackEnvironment;
    use crate::input::{MockBodySource, RackInput};
    use crate::response::RackResponse;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Puts the request body straight into `rack.input`.
    struct SourceBuilder;

    impl EnvironmentBuilder<MockBodySource> for SourceBuilder {
        fn build(&self, request: Request<MockBodySource>) -> RackEnvironment {
            RackEnvironment::new(RackInput::new(request.into_body()))
        }
    }

    struct OkApp;

    #[async_trait]
    impl RackApplication for OkApp {
        type Error = BoxError;

        async fn call(&self, env: &mut RackEnvironment) -> Result<RackResponse, Self::Error> {
            let body = env.input_mut().read(None).await?.unwrap_or_default();
            Ok(RackResponse::with_status(StatusCode::OK, body))
        }
    }

    #[derive(Debug, Error)]
    #[error("i'm a teapot")]
    struct Teapot;

    struct FailingApp;

    #[async_trait]
    impl RackApplication for FailingApp {
        type Error = Teapot;

        async fn call(&self, _env: &mut RackEnvironment) -> Result<RackResponse, Self::Error> {
            Err(Teapot)
        }
    }

    struct PanickingApp;

    #[async_trait]
    impl RackApplication for PanickingApp {
        type Error = BoxError;

        async fn call(&self, _env: &mut RackEnvironment) -> Result<RackResponse, Self::Error> {
            panic!("application blew up")
        }
    }

    struct FailingPropagator;

    #[async_trait]
    impl ResponsePropagator<Vec<u8>> for FailingPropagator {
        type Error = io::Error;

        async fn propagate(&self, _response: RackResponse, host: &mut Vec<u8>) -> Result<(), Self::Error> {
            host.extend_from_slice(b"HTTP/1.1 200");
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        }
    }

    fn counted_source(body: &'static [u8], closes: &Arc<AtomicUsize>) -> MockBodySource {
        let mut source = MockBodySource::new();
        let mut remaining = body;
        source.expect_read().returning(move |buf| {
            let size = remaining.len().min(buf.len());
            buf[..size].copy_from_slice(&remaining[..size]);
            remaining = &remaining[size..];
            Ok(size)
        });
        let closes = Arc::clone(closes);
        source.expect_close().returning(move || {
            closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        source
    }

    #[tokio::test]
    async fn closes_input_once_on_success() {
        let closes = Arc::new(AtomicUsize::new(0));
        let dispatcher = RackDispatcher::from_parts(SourceBuilder, OkApp, HttpResponsePropagator::new());

        let mut out = Vec::new();
        let request = Request::new(counted_source(b"ping", &closes));
        dispatcher.handle(request, &mut out).await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(out, b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nping");
    }

    #[tokio::test]
    async fn closes_input_once_on_application_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let dispatcher = RackDispatcher::from_parts(SourceBuilder, FailingApp, HttpResponsePropagator::new());

        let mut out = Vec::new();
        let request = Request::new(counted_source(b"ping", &closes));
        let error = dispatcher.handle(request, &mut out).await.unwrap_err();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(error, DispatchError::Application { .. }));
        assert!(error.into_source().downcast::<Teapot>().is_ok());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn closes_input_once_on_propagation_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let dispatcher = RackDispatcher::from_parts(SourceBuilder, OkApp, FailingPropagator);

        let mut out = Vec::new();
        let request = Request::new(counted_source(b"ping", &closes));
        let error = dispatcher.handle(request, &mut out).await.unwrap_err();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(error, DispatchError::Propagation { .. }));
        let source = error.into_source().downcast::<io::Error>().unwrap();
        assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn closes_input_once_on_panic() {
        let closes = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(RackDispatcher::from_parts(SourceBuilder, PanickingApp, HttpResponsePropagator::new()));

        let request = Request::new(counted_source(b"", &closes));
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            dispatcher.handle(request, &mut out).await
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_error_surfaces_after_success() {
        let mut source = MockBodySource::new();
        source.expect_read().returning(|_| Ok(0));
        source.expect_close().times(1).returning(|| Err(io::Error::other("close failed")));
        let dispatcher = RackDispatcher::from_parts(SourceBuilder, OkApp, HttpResponsePropagator::new());

        let mut out = Vec::new();
        let error = dispatcher.handle(Request::new(source), &mut out).await.unwrap_err();

        assert!(matches!(error, DispatchError::Input { .. }));
        assert!(error.to_string().contains("close failed"));
    }

    #[tokio::test]
    async fn close_error_does_not_mask_application_error() {
        let mut source = MockBodySource::new();
        source.expect_close().times(1).returning(|| Err(io::Error::other("close failed")));
        let dispatcher = RackDispatcher::from_parts(SourceBuilder, FailingApp, HttpResponsePropagator::new());

        let mut out = Vec::new();
        let error = dispatcher.handle(Request::new(source), &mut out).await.unwrap_err();

        assert!(matches!(error, DispatchError::Application { .. }));
    }

    #[tokio::test]
    async fn application_may_reread_the_body() {
        let app = make_application(|env: &mut RackEnvironment| {
            Box::pin(async move {
                let input = env.input_mut();
                let first = input.gets().await?.unwrap_or_default();
                input.rewind().await?;
                let all = input.read(None).await?.unwrap_or_default();
                Ok::<_, BoxError>(RackResponse::with_status(StatusCode::OK, format!("{}|{}", first.len(), all.len())))
            })
        });
        let dispatcher = RackDispatcher::new(app);

        let request = Request::post("/echo").body(&b"one\ntwo\n"[..]).unwrap();
        let mut out = Vec::new();
        dispatcher.handle(request, &mut out).await.unwrap();

        assert_eq!(out, b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\n4|8");
    }
}
