//! A tiny host container: one request per connection, `Content-Length`
//! bodies only. Try it with
//!
//! ```text
//! curl -v --data-binary $'first\nsecond\n' http://127.0.0.1:8080/lines?x=1
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, StatusCode, Version};
use micro_rack::application::{BoxFuture, RackApplication, make_application};
use micro_rack::dispatcher::RackDispatcher;
use micro_rack::environment::{PATH_INFO, QUERY_STRING, REQUEST_METHOD, RackEnvironment};
use micro_rack::response::{BoxError, RackBody, RackResponse};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const MAX_HEADER_SIZE: usize = 8 * 1024;
const MAX_HEADER_NUM: usize = 64;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let dispatcher = Arc::new(RackDispatcher::new(make_application(|env: &mut RackEnvironment| -> BoxFuture<'_, Result<RackResponse, BoxError>> { Box::pin(lines(env)) })));

    loop {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let dispatcher = Arc::clone(&dispatcher);

        tokio::spawn(async move {
            match serve(tcp_stream, remote_addr, &dispatcher).await {
                Ok(()) => info!("finished process, connection shutdown"),
                Err(e) => error!("service has error, cause {}, connection shutdown", e),
            }
        });
    }
}

/// Echoes the request line and every body line back, twice, to show that
/// `rack.input` can be replayed.
async fn lines(env: &mut RackEnvironment) -> Result<RackResponse, BoxError> {
    let summary = format!(
        "{} {}?{}\n",
        env.get_str(REQUEST_METHOD).unwrap_or_default(),
        env.get_str(PATH_INFO).unwrap_or_default(),
        env.get_str(QUERY_STRING).unwrap_or_default()
    );

    let mut chunks = vec![Bytes::from(summary)];
    for _ in 0..2 {
        let input = env.input_mut();
        input.rewind().await?;
        while let Some(line) = input.gets().await? {
            chunks.push(line);
        }
    }

    if chunks.len() == 1 {
        env.errors().puts("request had no body");
    }

    Ok(RackResponse::with_status(StatusCode::OK, RackBody::chunks(chunks)))
}

async fn serve<A>(tcp_stream: TcpStream, remote_addr: SocketAddr, dispatcher: &RackDispatcher<A>) -> Result<(), BoxError>
where
    A: RackApplication,
{
    let (reader, mut writer) = tcp_stream.into_split();
    let mut reader = BufReader::new(reader);

    let head = read_head(&mut reader).await?;
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut parsed = httparse::Request::new(&mut headers);
    if !parsed.parse(&head)?.is_complete() {
        return Err("incomplete request head".into());
    }

    let mut builder = Request::builder()
        .method(parsed.method.unwrap_or("GET"))
        .uri(parsed.path.unwrap_or("/"))
        .version(if parsed.version == Some(0) { Version::HTTP_10 } else { Version::HTTP_11 })
        .extension(remote_addr);

    let mut content_length = 0u64;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case("transfer-encoding") {
            writer.write_all(b"HTTP/1.1 411 Length Required\r\ncontent-length: 0\r\n\r\n").await?;
            return Err("chunked request bodies are not supported".into());
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = std::str::from_utf8(header.value)?.trim().parse()?;
        }
        builder = builder.header(header.name, header.value);
    }

    let request = builder.body(reader.take(content_length))?;
    dispatcher.handle(request, &mut writer).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn read_head<R>(reader: &mut R) -> Result<Vec<u8>, BoxError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut head = Vec::with_capacity(1024);
    loop {
        let size = reader.read_until(b'\n', &mut head).await?;
        if size == 0 {
            return Err("connection closed before the request head ended".into());
        }
        if head.ends_with(b"\r\n\r\n") || head == b"\r\n" {
            return Ok(head);
        }
        if head.len() > MAX_HEADER_SIZE {
            return Err(format!("request head exceeds {MAX_HEADER_SIZE} bytes").into());
        }
    }
}
