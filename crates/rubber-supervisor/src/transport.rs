//! Socket transport and HTTP framing for supervisor's XML-RPC interface.
//!
//! Each remote call opens a fresh connection, sends one HTTP/1.0 `POST`,
//! and reads the answer until the server closes the stream. The response
//! head is parsed with `httparse`, and the body is framed by chunked
//! transfer encoding or `Content-Length` when the server supplies them.
//! Only the connection attempt is bounded by a timeout; reads block for as
//! long as supervisor takes to answer.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;

use crate::endpoint::{Credentials, ServerEndpoint};

const TRANSPORT_TARGET: &str = "rubber_supervisor::transport";

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_HEADERS: usize = 32;

/// Errors raised while exchanging an HTTP request with supervisor.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host name did not resolve to a usable address.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// Display form of the endpoint.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The connection could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Display form of the endpoint.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Sending the request failed.
    #[error("failed to send request: {0}")]
    Send(#[source] io::Error),
    /// Reading the response failed.
    #[error("failed to read response: {0}")]
    Receive(#[source] io::Error),
    /// The response was not valid HTTP.
    #[error("malformed HTTP response: {0}")]
    MalformedResponse(String),
    /// The platform cannot reach Unix sockets.
    #[cfg(not(unix))]
    #[error("platform does not support Unix sockets: {0}")]
    UnsupportedUnixTransport(String),
}

pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

pub(crate) fn connect(endpoint: &ServerEndpoint) -> Result<Connection, TransportError> {
    match endpoint {
        ServerEndpoint::Http { host, port } => {
            let address =
                resolve_tcp_address(host, *port).map_err(|source| TransportError::Resolve {
                    endpoint: endpoint.to_string(),
                    source,
                })?;

            TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
                .map(Connection::Tcp)
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
        }
        ServerEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str()).map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                Err(TransportError::UnsupportedUnixTransport(endpoint.to_string()))
            }
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream: UnixStream = socket.into();
    Ok(Connection::Unix(stream))
}

/// Status line and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) body: String,
}

impl HttpResponse {
    pub(crate) const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends `body` as a `text/xml` POST to `path` and returns the response.
pub(crate) fn post(
    endpoint: &ServerEndpoint,
    path: &str,
    credentials: Option<&Credentials>,
    body: &str,
) -> Result<HttpResponse, TransportError> {
    let mut connection = connect(endpoint)?;
    let request = build_request(&endpoint.host_header(), path, credentials, body);

    debug!(
        target: TRANSPORT_TARGET,
        endpoint = %endpoint,
        request_bytes = request.len(),
        "sending request to supervisor"
    );

    connection
        .write_all(request.as_bytes())
        .map_err(TransportError::Send)?;
    connection.flush().map_err(TransportError::Send)?;

    let mut raw = Vec::new();
    connection
        .read_to_end(&mut raw)
        .map_err(TransportError::Receive)?;

    debug!(
        target: TRANSPORT_TARGET,
        endpoint = %endpoint,
        response_bytes = raw.len(),
        "received response from supervisor"
    );

    parse_response(&raw)
}

pub(crate) fn build_request(
    host: &str,
    path: &str,
    credentials: Option<&Credentials>,
    body: &str,
) -> String {
    let authorization = credentials.map(|account| {
        let token = STANDARD.encode(format!("{}:{}", account.username(), account.password()));
        format!("Authorization: Basic {token}\r\n")
    });
    format!(
        concat!(
            "POST {path} HTTP/1.0\r\n",
            "Host: {host}\r\n",
            "User-Agent: rubber/{version}\r\n",
            "Content-Type: text/xml\r\n",
            "Content-Length: {length}\r\n",
            "Connection: close\r\n",
            "{authorization}",
            "\r\n",
            "{body}",
        ),
        path = path,
        host = host,
        version = env!("CARGO_PKG_VERSION"),
        length = body.len(),
        authorization = authorization.unwrap_or_default(),
        body = body,
    )
}

/// Splits a complete response into its status line and decoded body.
///
/// The body is framed by `Transfer-Encoding: chunked` when present, then by
/// `Content-Length`, and otherwise runs to the end of the stream.
pub(crate) fn parse_response(raw: &[u8]) -> Result<HttpResponse, TransportError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let head_length = match response.parse(raw) {
        Ok(httparse::Status::Complete(length)) => length,
        Ok(httparse::Status::Partial) => {
            return Err(malformed("response ended inside the header block"));
        }
        Err(error) => return Err(malformed(format!("invalid response head: {error}"))),
    };

    let status = response
        .code
        .ok_or_else(|| malformed("missing status code"))?;
    let reason = response.reason.unwrap_or_default().to_owned();
    let framing = BodyFraming::from_headers(response.headers)?;
    let content = framing.extract(raw.get(head_length..).unwrap_or_default())?;

    Ok(HttpResponse {
        status,
        reason,
        body: String::from_utf8_lossy(&content).into_owned(),
    })
}

/// How the end of a response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Chunked,
    Length(usize),
    UntilClose,
}

impl BodyFraming {
    fn from_headers(headers: &[httparse::Header<'_>]) -> Result<Self, TransportError> {
        let mut framing = Self::UntilClose;
        for header in headers {
            if header.name.eq_ignore_ascii_case("transfer-encoding") {
                if is_chunked(header.value) {
                    return Ok(Self::Chunked);
                }
            } else if header.name.eq_ignore_ascii_case("content-length") {
                framing = Self::Length(content_length(header.value)?);
            }
        }
        Ok(framing)
    }

    fn extract(self, rest: &[u8]) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Chunked => decode_chunked(rest),
            Self::Length(length) => rest.get(..length).map(<[u8]>::to_vec).ok_or_else(|| {
                malformed(format!(
                    "body has {} bytes but Content-Length is {length}",
                    rest.len()
                ))
            }),
            Self::UntilClose => Ok(rest.to_vec()),
        }
    }
}

fn is_chunked(value: &[u8]) -> bool {
    String::from_utf8_lossy(value)
        .rsplit(',')
        .next()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

fn content_length(value: &[u8]) -> Result<usize, TransportError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.trim().parse::<usize>().ok())
        .ok_or_else(|| malformed("Content-Length is not a non-negative integer"))
}

fn decode_chunked(mut remaining: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut content = Vec::new();
    loop {
        let (size_line, size) = match httparse::parse_chunk_size(remaining) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => {
                return Err(malformed("chunked body ended before the last chunk"));
            }
            Err(_) => return Err(malformed("invalid chunk size")),
        };
        if size == 0 {
            return Ok(content);
        }

        let chunk_end = usize::try_from(size)
            .ok()
            .and_then(|length| size_line.checked_add(length))
            .ok_or_else(|| malformed("chunk size does not fit in memory"))?;
        let chunk = remaining
            .get(size_line..chunk_end)
            .ok_or_else(|| malformed("chunk is shorter than its declared size"))?;
        content.extend_from_slice(chunk);
        remaining = remaining
            .get(chunk_end..)
            .and_then(|tail| tail.strip_prefix(b"\r\n"))
            .ok_or_else(|| malformed("chunk is missing its CRLF terminator"))?;
    }
}

fn malformed(reason: impl Into<String>) -> TransportError {
    TransportError::MalformedResponse(reason.into())
}
