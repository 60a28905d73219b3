use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::environment::RackEnvironment;
use crate::response::{BoxError, RackResponse};

/// A Rack application: takes the environment, returns a response.
///
/// The environment is lent for the duration of the call. The application
/// may read `rack.input` as often and in whatever order it likes; the
/// dispatcher closes it afterwards.
#[async_trait]
pub trait RackApplication: Send + Sync {
    type Error: Into<BoxError>;

    async fn call(&self, env: &mut RackEnvironment) -> Result<RackResponse, Self::Error>;
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug)]
pub struct ApplicationFn<F> {
    f: F,
}

#[async_trait]
impl<F, Err> RackApplication for ApplicationFn<F>
where
    F: for<'env> Fn(&'env mut RackEnvironment) -> BoxFuture<'env, Result<RackResponse, Err>> + Send + Sync,
    Err: Into<BoxError>,
{
    type Error = Err;

    async fn call(&self, env: &mut RackEnvironment) -> Result<RackResponse, Self::Error> {
        (self.f)(env).await
    }
}

/// Turns a closure into a [`RackApplication`].
///
/// The closure borrows the environment, so it returns a boxed future:
///
/// ```
/// use micro_rack::application::make_application;
/// use micro_rack::environment::RackEnvironment;
/// use micro_rack::response::{BoxError, RackResponse};
/// use http::StatusCode;
///
/// let app = make_application(|env: &mut RackEnvironment| {
///     Box::pin(async move {
///         let body = env.input_mut().read(None).await?.unwrap_or_default();
///         Ok::<_, BoxError>(RackResponse::with_status(StatusCode::OK, body))
///     })
/// });
/// ```
pub fn make_application<F, Err>(f: F) -> ApplicationFn<F>
where
    F: for<'env> Fn(&'env mut RackEnvironment) -> BoxFuture<'env, Result<RackResponse, Err>> + Send + Sync,
    Err: Into<BoxError>,
{
    ApplicationFn { f }
}
