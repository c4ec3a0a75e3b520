//! A thin HTTP/1.1 client built on the framer in [`super::message_consumer`]
//! (spec §4.4, used by the ACME client per spec §4.3.1). Grounded on
//! `http/client.hpp`'s `client::perform`/`performer`, trimmed down from its
//! queueing/redirect-following/timeout machinery to a single
//! request-response round trip per call, since this crate's only caller
//! (the ACME client) drives its own retry and polling loops.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use super::headers::Headers;
use super::message_consumer::{ConsumerError, ConsumerEvent, MessageConsumer};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("response body exceeds the configured limit")]
    BodyTooLarge,
    #[error("request timed out")]
    Timeout,
    #[error("connection closed before a complete response was received")]
    ConnectionClosed,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

struct ParsedUri {
    secure: bool,
    host: String,
    port: u16,
    path: String,
}

impl ParsedUri {
    fn parse(uri: &str) -> Result<Self, HttpError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| HttpError::InvalidUri(uri.to_string()))?;
        let secure = match scheme {
            "https" => true,
            "http" => false,
            _ => return Err(HttpError::InvalidUri(uri.to_string())),
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h.to_string(), p.parse().unwrap_or(if secure { 443 } else { 80 }))
            }
            _ => (authority.to_string(), if secure { 443 } else { 80 }),
        };

        if host.is_empty() {
            return Err(HttpError::InvalidUri(uri.to_string()));
        }

        Ok(Self {
            secure,
            host,
            port,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        })
    }
}

pub struct HttpClient {
    tls: Arc<rustls::ClientConfig>,
    user_agent: String,
    max_body_size: usize,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(tls: Arc<rustls::ClientConfig>) -> Self {
        Self {
            tls,
            user_agent: format!("fz-serverd/{}", env!("CARGO_PKG_VERSION")),
            max_body_size: 10 * 1024 * 1024,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: Headers,
        body: &[u8],
    ) -> Result<Response, HttpError> {
        let parsed = ParsedUri::parse(uri)?;
        let request_bytes = build_request(method, &parsed.path, &parsed.host, &headers, &self.user_agent, body);

        let result = timeout(self.timeout, async {
            let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port)).await?;
            if parsed.secure {
                let server_name = rustls::pki_types::ServerName::try_from(parsed.host.clone())
                    .map_err(|_| HttpError::InvalidUri(parsed.host.clone()))?;
                let connector = TlsConnector::from(self.tls.clone());
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| HttpError::Tls(e.to_string()))?;
                read_response(stream, &request_bytes, self.max_body_size).await
            } else {
                read_response(tcp, &request_bytes, self.max_body_size).await
            }
        })
        .await;

        match result {
            Ok(r) => r,
            Err(_) => Err(HttpError::Timeout),
        }
    }
}

fn build_request(method: &str, path: &str, host: &str, headers: &Headers, user_agent: &str, body: &[u8]) -> Vec<u8> {
    let mut req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\nConnection: close\r\n"
    );
    for (name, value) in headers.iter() {
        req.push_str(name);
        req.push_str(": ");
        req.push_str(value);
        req.push_str("\r\n");
    }
    if !body.is_empty() {
        req.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    req.push_str("\r\n");

    let mut bytes = req.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

async fn read_response<S>(mut stream: S, request_bytes: &[u8], max_body: usize) -> Result<Response, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request_bytes).await?;
    stream.flush().await?;

    let mut consumer = MessageConsumer::new(8192, false);
    let mut status = 0u16;
    let mut reason = String::new();
    let mut headers = Headers::new();
    let mut body = Vec::new();
    let mut read_buf = [0u8; 8192];
    let mut done = false;

    while !done {
        while let Some(event) = consumer.next_event()? {
            match event {
                ConsumerEvent::StartLine(line) => {
                    let mut parts = line.splitn(3, ' ');
                    let _version = parts.next();
                    status = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    reason = parts.next().unwrap_or("").to_string();
                }
                ConsumerEvent::Header(name, value) => headers.insert(name, value),
                ConsumerEvent::EndOfHeaders => {
                    if status == 204 || status == 304 {
                        consumer.expect_no_body();
                    }
                }
                ConsumerEvent::BodyChunk(chunk) => {
                    if body.len() + chunk.len() > max_body {
                        return Err(HttpError::BodyTooLarge);
                    }
                    body.extend_from_slice(&chunk);
                }
                ConsumerEvent::EndOfMessage => {
                    done = true;
                }
            }
        }

        if done {
            break;
        }

        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            return Err(HttpError::ConnectionClosed);
        }
        consumer.feed(&read_buf[..n]);
    }

    Ok(Response { status, reason, headers, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_uri_with_default_port() {
        let u = ParsedUri::parse("https://example.com/directory").unwrap();
        assert!(u.secure);
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, 443);
        assert_eq!(u.path, "/directory");
    }

    #[test]
    fn parses_uri_with_explicit_port_and_no_path() {
        let u = ParsedUri::parse("http://127.0.0.1:8080").unwrap();
        assert!(!u.secure);
        assert_eq!(u.port, 8080);
        assert_eq!(u.path, "/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(ParsedUri::parse("ftp://example.com").is_err());
    }

    #[test]
    fn request_bytes_include_content_length_and_headers() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/jose+json");
        let bytes = build_request("POST", "/acme/new-order", "example.com", &headers, "fz-serverd/test", b"{}");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("POST /acme/new-order HTTP/1.1\r\n"));
        assert!(text.contains("Content-Type: application/jose+json\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("{}"));
    }
}
