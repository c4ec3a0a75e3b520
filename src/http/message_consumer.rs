//! Line/chunk HTTP message framer (spec §4.4). Grounded on
//! `http/message_consumer.{hpp,cpp}`'s state machine
//! (`parse_start_line` → `parse_headers` → body/chunk states); the
//! original's `buffer_operator::line_consumer` base and the pluggable
//! body-consumer delegate are replaced with a plain internal byte buffer
//! and a pull-based `next_event`, since nothing in this crate streams a
//! body to a second consumer concurrently.

use thiserror::Error;

use super::headers::name;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("line exceeds the maximum allowed length")]
    LineTooLong,
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(String),
    #[error("client sent an internal header: {0}")]
    InternalHeaderFromClient(String),
    #[error("unsupported Transfer-Encoding: {0}")]
    UnsupportedTransferEncoding(String),
    #[error("Content-Length and chunked Transfer-Encoding are not compatible")]
    ChunkedAndContentLength,
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),
    #[error("spurious data after end of chunk")]
    SpuriousDataAfterChunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    StartLine(String),
    Header(String, String),
    EndOfHeaders,
    BodyChunk(Vec<u8>),
    EndOfMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Headers,
    Trailer,
    ChunkSize,
    EndOfChunk,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferEncoding {
    NotProvided,
    Identity,
    Chunked,
}

/// Consumes raw bytes fed via [`Self::feed`] and yields parsed
/// [`ConsumerEvent`]s one at a time via [`Self::next_event`].
///
/// `reject_internal_headers` gates the `X-FZ-INT-` check: set for traffic
/// arriving from an untrusted peer, left off when this crate parses its
/// own ACME-server responses (spec §9 open question: the rejection is an
/// ingress-only rule).
pub struct MessageConsumer {
    buf: Vec<u8>,
    state: State,
    transfer_encoding: TransferEncoding,
    has_content_length: bool,
    remaining: usize,
    max_line_size: usize,
    reject_internal_headers: bool,
}

impl MessageConsumer {
    pub fn new(max_line_size: usize, reject_internal_headers: bool) -> Self {
        Self {
            buf: Vec::new(),
            state: State::StartLine,
            transfer_encoding: TransferEncoding::NotProvided,
            has_content_length: false,
            remaining: 0,
            max_line_size,
            reject_internal_headers,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::StartLine;
        self.transfer_encoding = TransferEncoding::NotProvided;
        self.has_content_length = false;
        self.remaining = 0;
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// For responses to HEAD-style requests, where no body follows
    /// regardless of what the headers say.
    pub fn expect_no_body(&mut self) {
        self.remaining = 0;
    }

    fn take_line(&mut self) -> Result<Option<Vec<u8>>, ConsumerError> {
        if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
            if pos > self.max_line_size {
                return Err(ConsumerError::LineTooLong);
            }
            let line = self.buf[..pos].to_vec();
            self.buf.drain(..pos + 2);
            Ok(Some(line))
        } else if self.buf.len() > self.max_line_size {
            Err(ConsumerError::LineTooLong)
        } else {
            Ok(None)
        }
    }

    /// Pulls the next event out of whatever has been fed so far. Call in a
    /// loop until it returns `Ok(None)`, then feed more bytes.
    pub fn next_event(&mut self) -> Result<Option<ConsumerEvent>, ConsumerError> {
        match self.state {
            State::Body => self.consume_body(),
            _ => self.consume_line(),
        }
    }

    fn consume_body(&mut self) -> Result<Option<ConsumerEvent>, ConsumerError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let to_consume = self.remaining.min(self.buf.len());
        let chunk: Vec<u8> = self.buf.drain(..to_consume).collect();
        self.remaining -= to_consume;

        if self.remaining == 0 {
            if self.transfer_encoding == TransferEncoding::Chunked {
                self.state = State::EndOfChunk;
            } else {
                self.reset();
                return Ok(Some(ConsumerEvent::EndOfMessage));
            }
        }
        Ok(Some(ConsumerEvent::BodyChunk(chunk)))
    }

    fn consume_line(&mut self) -> Result<Option<ConsumerEvent>, ConsumerError> {
        let Some(raw) = self.take_line()? else {
            return Ok(None);
        };
        let line = String::from_utf8_lossy(&raw).into_owned();

        match self.state {
            State::StartLine => {
                self.state = State::Headers;
                Ok(Some(ConsumerEvent::StartLine(line)))
            }
            State::Headers | State::Trailer => self.consume_header_line(line),
            State::ChunkSize => self.consume_chunk_size_line(&line),
            State::EndOfChunk => {
                if !line.is_empty() {
                    return Err(ConsumerError::SpuriousDataAfterChunk);
                }
                self.state = State::ChunkSize;
                Ok(None)
            }
            State::Body => unreachable!("consume_line is never called while parsing a body"),
        }
    }

    fn consume_header_line(&mut self, line: String) -> Result<Option<ConsumerEvent>, ConsumerError> {
        if line.is_empty() {
            if self.state == State::Headers {
                if self.transfer_encoding == TransferEncoding::Chunked {
                    if self.has_content_length {
                        return Err(ConsumerError::ChunkedAndContentLength);
                    }
                    self.state = State::ChunkSize;
                    return Ok(Some(ConsumerEvent::EndOfHeaders));
                }
                if self.remaining != 0 {
                    self.state = State::Body;
                    return Ok(Some(ConsumerEvent::EndOfHeaders));
                }
            }
            self.reset();
            return Ok(Some(ConsumerEvent::EndOfMessage));
        }

        let (name_part, value) = line
            .split_once(": ")
            .ok_or_else(|| ConsumerError::InvalidHeaderLine(line.clone()))?;

        if name_part.is_empty()
            || !name_part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConsumerError::InvalidHeaderLine(line.clone()));
        }

        if self.reject_internal_headers
            && name_part.len() >= name::X_FZ_INT_PREFIX.len()
            && name_part[..name::X_FZ_INT_PREFIX.len()].eq_ignore_ascii_case(name::X_FZ_INT_PREFIX)
        {
            return Err(ConsumerError::InternalHeaderFromClient(line));
        }

        if name_part.eq_ignore_ascii_case(name::TRANSFER_ENCODING) {
            let last = value.rsplit(',').next().unwrap_or(value).trim();
            self.transfer_encoding = if last.eq_ignore_ascii_case("identity") {
                TransferEncoding::Identity
            } else if last.eq_ignore_ascii_case("chunked") {
                TransferEncoding::Chunked
            } else {
                return Err(ConsumerError::UnsupportedTransferEncoding(value.to_string()));
            };
        } else if name_part.eq_ignore_ascii_case(name::CONTENT_LENGTH) {
            self.remaining = value
                .trim()
                .parse()
                .map_err(|_| ConsumerError::InvalidContentLength(value.to_string()))?;
            self.has_content_length = true;
        }

        Ok(Some(ConsumerEvent::Header(name_part.to_string(), value.to_string())))
    }

    fn consume_chunk_size_line(&mut self, line: &str) -> Result<Option<ConsumerEvent>, ConsumerError> {
        let size_part = line.split(';').next().unwrap_or(line).trim();
        let size = usize::from_str_radix(size_part, 16)
            .map_err(|_| ConsumerError::InvalidChunkSize(line.to_string()))?;
        self.remaining = size;

        self.state = if size > 0 { State::Body } else { State::Trailer };
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(c: &mut MessageConsumer) -> Vec<ConsumerEvent> {
        let mut events = Vec::new();
        while let Some(ev) = c.next_event().unwrap() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn identity_with_content_length() {
        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        let events = drain(&mut c);
        assert_eq!(events[0], ConsumerEvent::StartLine("HTTP/1.1 200 OK".into()));
        assert!(events.contains(&ConsumerEvent::EndOfHeaders));
        assert!(events.contains(&ConsumerEvent::BodyChunk(b"hello".to_vec())));
        assert_eq!(events.last(), Some(&ConsumerEvent::EndOfMessage));
    }

    #[test]
    fn identity_without_content_length_has_no_body() {
        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"HTTP/1.1 204 No Content\r\n\r\n");
        let events = drain(&mut c);
        assert_eq!(events.last(), Some(&ConsumerEvent::EndOfMessage));
        assert!(!events.iter().any(|e| matches!(e, ConsumerEvent::BodyChunk(_))));
    }

    #[test]
    fn chunked_body_is_reassembled() {
        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n");
        let events = drain(&mut c);
        let body: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::BodyChunk(c) => Some(c.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"Wiki");
        assert_eq!(events.last(), Some(&ConsumerEvent::EndOfMessage));
    }

    #[test]
    fn chunked_and_content_length_is_rejected() {
        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 4\r\n\r\n");
        let err = drain_err(&mut c);
        assert_eq!(err, ConsumerError::ChunkedAndContentLength);
    }

    #[test]
    fn unsupported_transfer_encoding_is_rejected() {
        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\n");
        let err = drain_err(&mut c);
        assert!(matches!(err, ConsumerError::UnsupportedTransferEncoding(_)));
    }

    #[test]
    fn internal_header_is_rejected_only_when_asked() {
        let mut c = MessageConsumer::new(4096, true);
        c.feed(b"GET / HTTP/1.1\r\nX-FZ-INT-Original-Path: /etc/passwd\r\n\r\n");
        let err = drain_err(&mut c);
        assert!(matches!(err, ConsumerError::InternalHeaderFromClient(_)));

        let mut c = MessageConsumer::new(4096, false);
        c.feed(b"GET / HTTP/1.1\r\nX-FZ-INT-Original-Path: /etc/passwd\r\n\r\n");
        let events = drain(&mut c);
        assert_eq!(events.last(), Some(&ConsumerEvent::EndOfMessage));
    }

    fn drain_err(c: &mut MessageConsumer) -> ConsumerError {
        loop {
            match c.next_event() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("expected an error, ran out of buffered data instead"),
                Err(e) => return e,
            }
        }
    }
}
