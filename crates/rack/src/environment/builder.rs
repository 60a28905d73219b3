use std::net::SocketAddr;

use http::header::{self, HeaderName};
use http::request::Parts;
use http::{Request, Version};
use tokio::io::AsyncRead;
use tracing::trace;

use super::*;
use crate::config::{InputPolicy, RackConfig};
use crate::input::{BufferedSource, StreamSource};

/// Turns a host request into a [`RackEnvironment`].
///
/// The builder allocates the request's [`RackInput`] over the request body;
/// from then on the environment owns it.
pub trait EnvironmentBuilder<B>: Send + Sync {
    fn build(&self, request: Request<B>) -> RackEnvironment;
}

/// Builds the standard CGI and `rack.*` keys from an [`http::Request`]
/// whose body is an [`AsyncRead`].
///
/// `REMOTE_ADDR` is filled from a [`SocketAddr`] request extension when the
/// host provides one.
#[derive(Debug, Clone, Default)]
pub struct HttpEnvironmentBuilder {
    config: RackConfig,
}

impl HttpEnvironmentBuilder {
    pub fn new(config: RackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RackConfig {
        &self.config
    }

    fn wrap_body<B>(&self, body: B) -> RackInput
    where
        B: AsyncRead + Send + Unpin + 'static,
    {
        let chunk_size = self.config.read_chunk_size();
        match self.config.input_policy() {
            InputPolicy::Buffered { memory_threshold } => {
                RackInput::with_chunk_size(BufferedSource::with_memory_threshold(body, memory_threshold), chunk_size)
            }
            InputPolicy::Streaming => RackInput::with_chunk_size(StreamSource::new(body), chunk_size),
        }
    }

    fn copy_request_line(&self, parts: &Parts, env: &mut RackEnvironment) {
        let script_name = self.config.script_name();
        let path = parts.uri.path();

        env.insert(REQUEST_METHOD, parts.method.as_str());
        env.insert(SCRIPT_NAME, script_name);
        env.insert(PATH_INFO, strip_script_name(path, script_name));
        env.insert(QUERY_STRING, parts.uri.query().unwrap_or_default());
        env.insert(SERVER_PROTOCOL, protocol_name(parts.version));
    }

    fn copy_server(&self, parts: &Parts, env: &mut RackEnvironment) {
        let authority = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| parts.uri.authority().map(http::uri::Authority::as_str));

        let (server_name, server_port) = match authority.map(split_host_port) {
            Some((host, Some(port))) => (host.to_owned(), port.to_owned()),
            Some((host, None)) => (host.to_owned(), self.scheme_port().to_string()),
            None => (self.config.default_server_name().to_owned(), self.config.default_server_port().to_string()),
        };

        env.insert(SERVER_NAME, server_name);
        env.insert(SERVER_PORT, server_port);

        if let Some(remote_addr) = parts.extensions.get::<SocketAddr>() {
            env.insert(REMOTE_ADDR, remote_addr.ip().to_string());
        }
    }

    fn copy_headers(parts: &Parts, env: &mut RackEnvironment) {
        for name in parts.headers.keys() {
            let key = if *name == header::CONTENT_TYPE {
                CONTENT_TYPE.to_owned()
            } else if *name == header::CONTENT_LENGTH {
                CONTENT_LENGTH.to_owned()
            } else {
                cgi_header_key(name)
            };
            env.insert(key, join_values(name, parts));
        }
    }

    fn copy_rack_keys(&self, env: &mut RackEnvironment) {
        env.insert(RACK_VERSION, RACK_PROTOCOL_VERSION);
        env.insert(RACK_URL_SCHEME, self.config.url_scheme());
        env.insert(RACK_MULTITHREAD, self.config.multithread());
        env.insert(RACK_MULTIPROCESS, false);
        env.insert(RACK_RUN_ONCE, false);
        env.insert(RACK_HIJACK, false);
    }

    fn scheme_port(&self) -> u16 {
        match self.config.url_scheme() {
            "https" => 443,
            "http" => 80,
            _ => self.config.default_server_port(),
        }
    }
}

impl<B> EnvironmentBuilder<B> for HttpEnvironmentBuilder
where
    B: AsyncRead + Send + Unpin + 'static,
{
    fn build(&self, request: Request<B>) -> RackEnvironment {
        let (parts, body) = request.into_parts();

        let input = self.wrap_body(body);
        let errors = RackErrors::new(parts.method.as_str(), parts.uri.path());
        let mut env = RackEnvironment::with_errors(input, errors);

        self.copy_request_line(&parts, &mut env);
        self.copy_server(&parts, &mut env);
        Self::copy_headers(&parts, &mut env);
        self.copy_rack_keys(&mut env);

        trace!(method = %parts.method, uri = %parts.uri, "rack environment built");
        env
    }
}

fn strip_script_name<'a>(path: &'a str, script_name: &str) -> &'a str {
    if script_name.is_empty() {
        return path;
    }
    match path.strip_prefix(script_name) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}

fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    // bracketed IPv6 literals keep their colons
    let port_start = match authority.rfind(':') {
        Some(index) if !authority[index..].contains(']') => index,
        _ => return (authority, None),
    };
    let (host, port) = (&authority[..port_start], &authority[port_start + 1..]);
    if port.is_empty() { (host, None) } else { (host, Some(port)) }
}

fn cgi_header_key(name: &HeaderName) -> String {
    let mut key = String::with_capacity(name.as_str().len() + 5);
    key.push_str("HTTP_");
    for c in name.as_str().chars() {
        key.push(if c == '-' { '_' } else { c.to_ascii_uppercase() });
    }
    key
}

fn join_values(name: &HeaderName, parts: &Parts) -> String {
    let separator = if *name == header::COOKIE { "; " } else { ", " };
    parts
        .headers
        .get_all(name)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
        .collect::<Vec<_>>()
        .join(separator)
}
