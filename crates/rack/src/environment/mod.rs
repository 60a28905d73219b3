//! The Rack environment handed to an application.
//!
//! A [`RackEnvironment`] holds the CGI style request facts as string keys
//! plus the two streams Rack requires: the request body under
//! [`RACK_INPUT`] and the diagnostics stream under [`RACK_ERRORS`].
//!
//! Environments are produced by an [`EnvironmentBuilder`];
//! [`HttpEnvironmentBuilder`] copies an [`http::Request`] into the usual
//! keys and wraps its body according to the [`RackConfig`](crate::config::RackConfig).

mod builder;
mod errors;

pub use builder::EnvironmentBuilder;
pub use builder::HttpEnvironmentBuilder;
pub use errors::RackErrors;

use std::collections::BTreeMap;

use tracing::warn;

use crate::input::{InputError, RackInput};

pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const PATH_INFO: &str = "PATH_INFO";
pub const QUERY_STRING: &str = "QUERY_STRING";
pub const SERVER_NAME: &str = "SERVER_NAME";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";

pub const RACK_VERSION: &str = "rack.version";
pub const RACK_URL_SCHEME: &str = "rack.url_scheme";
pub const RACK_INPUT: &str = "rack.input";
pub const RACK_ERRORS: &str = "rack.errors";
pub const RACK_MULTITHREAD: &str = "rack.multithread";
pub const RACK_MULTIPROCESS: &str = "rack.multiprocess";
pub const RACK_RUN_ONCE: &str = "rack.run_once";
pub const RACK_HIJACK: &str = "rack.hijack?";

/// Version of the Rack contract this environment follows.
pub const RACK_PROTOCOL_VERSION: (u32, u32) = (1, 3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RackValue {
    String(String),
    Bool(bool),
    Version(u32, u32),
}

impl RackValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<String> for RackValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for RackValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for RackValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<(u32, u32)> for RackValue {
    fn from((major, minor): (u32, u32)) -> Self {
        Self::Version(major, minor)
    }
}

/// The per-request environment.
///
/// It exclusively owns the request's [`RackInput`]; the dispatcher closes
/// it once the request is done.
#[derive(Debug)]
pub struct RackEnvironment {
    values: BTreeMap<String, RackValue>,
    input: RackInput,
    errors: RackErrors,
}

impl RackEnvironment {
    pub fn new(input: RackInput) -> Self {
        Self::with_errors(input, RackErrors::default())
    }

    pub fn with_errors(input: RackInput, errors: RackErrors) -> Self {
        Self { values: BTreeMap::new(), input, errors }
    }

    pub fn get(&self, key: &str) -> Option<&RackValue> {
        self.values.get(key)
    }

    /// The value under `key` if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(RackValue::as_str)
    }

    /// Sets `key`, returning the previous value.
    ///
    /// [`RACK_INPUT`] and [`RACK_ERRORS`] are bound to the request's streams
    /// and can't be replaced; inserting them is ignored.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<RackValue>
    where
        K: Into<String>,
        V: Into<RackValue>,
    {
        let key = key.into();
        if key == RACK_INPUT || key == RACK_ERRORS {
            warn!(key = %key, "ignoring attempt to replace a rack stream");
            return None;
        }
        self.values.insert(key, value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<RackValue> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        key == RACK_INPUT || key == RACK_ERRORS || self.values.contains_key(key)
    }

    /// Keys of the plain values, in order. The two stream keys are not listed.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RackValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// `rack.input`
    pub fn input(&self) -> &RackInput {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut RackInput {
        &mut self.input
    }

    /// `rack.errors`
    pub fn errors(&self) -> &RackErrors {
        &self.errors
    }

    pub async fn close_input(&mut self) -> Result<(), InputError> {
        self.input.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_and_reserved_keys() {
        let mut env = RackEnvironment::new(RackInput::empty());

        assert_eq!(env.insert(REQUEST_METHOD, "GET"), None);
        assert_eq!(env.insert(RACK_MULTITHREAD, true), None);
        assert_eq!(env.insert(RACK_VERSION, RACK_PROTOCOL_VERSION), None);
        assert_eq!(env.insert(REQUEST_METHOD, "PUT"), Some(RackValue::from("GET")));

        assert_eq!(env.get_str(REQUEST_METHOD), Some("PUT"));
        assert_eq!(env.get(RACK_MULTITHREAD).and_then(RackValue::as_bool), Some(true));
        assert_eq!(env.get(RACK_VERSION), Some(&RackValue::Version(1, 3)));
        assert_eq!(env.get_str(RACK_MULTITHREAD), None);

        assert_eq!(env.insert(RACK_INPUT, "nope"), None);
        assert!(env.get(RACK_INPUT).is_none());
        assert!(env.contains_key(RACK_INPUT));
        assert!(env.contains_key(RACK_ERRORS));

        assert_eq!(env.keys().collect::<Vec<_>>(), vec![REQUEST_METHOD, RACK_MULTITHREAD, RACK_VERSION]);
        assert_eq!(env.remove(REQUEST_METHOD), Some(RackValue::from("PUT")));
        assert!(!env.contains_key(REQUEST_METHOD));
    }

    #[tokio::test]
    async fn close_input_closes_the_stream() {
        let mut env = RackEnvironment::new(RackInput::from_bytes(&b"body"[..]));

        assert_eq!(env.input_mut().read(None).await.unwrap().unwrap().as_ref(), b"body");
        env.close_input().await.unwrap();
        env.close_input().await.unwrap();

        assert!(env.input().is_closed());
    }
}
