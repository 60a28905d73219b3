//! A Rack style bridge between a host HTTP container and an application.
//!
//! An application receives a [`RackEnvironment`](environment::RackEnvironment),
//! a map of request facts plus the request body as `rack.input`, and returns
//! a [`RackResponse`](response::RackResponse). The crate takes care of the
//! parts with real invariants:
//!
//! - [`input::RackInput`]: a byte exact, rewindable stream over the request
//!   body with line, bounded and unbounded reads
//! - [`dispatcher::RackDispatcher`]: runs one request/response cycle and
//!   closes `rack.input` exactly once on every exit path
//!
//! # Example
//!
//! ```no_run
//! use http::StatusCode;
//! use micro_rack::application::make_application;
//! use micro_rack::dispatcher::RackDispatcher;
//! use micro_rack::environment::RackEnvironment;
//! use micro_rack::response::{BoxError, RackResponse};
//!
//! # async fn run() -> Result<(), BoxError> {
//! let dispatcher = RackDispatcher::new(make_application(|env: &mut RackEnvironment| {
//!     Box::pin(async move {
//!         let mut lines = 0;
//!         env.input_mut().each(|_line| lines += 1).await?;
//!         Ok::<_, BoxError>(RackResponse::with_status(StatusCode::OK, format!("{lines} lines\n")))
//!     })
//! }));
//!
//! let request = http::Request::post("/count").body(&b"a\nb\n"[..])?;
//! let mut response = Vec::new();
//! dispatcher.handle(request, &mut response).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`input`]: `rack.input` and the body sources behind it
//! - [`environment`]: the environment, its keys and the builder that fills it
//! - [`application`]: the application trait
//! - [`response`]: the status, headers and body triple
//! - [`propagator`]: writing a response back to the host
//! - [`dispatcher`]: the per-request cycle
//! - [`config`]: settings for the builder
//!
//! # Concurrency
//!
//! Each dispatch owns its environment and input; nothing is shared between
//! requests, so the core takes no locks. Reads wait on the body source. A
//! host that wants timeouts drops the dispatch future or closes the
//! connection, which makes a pending read fail with an [`input::InputError`].

pub mod application;
pub mod config;
pub mod dispatcher;
pub mod environment;
pub mod input;
pub mod propagator;
pub mod response;
