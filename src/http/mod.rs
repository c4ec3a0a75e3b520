//! HTTP message framing and a minimal client atop it (spec §4.4), used by
//! the ACME client (§4.3) to talk to a directory server.

pub mod client;
pub mod field;
pub mod headers;
pub mod message_consumer;

pub use client::{HttpClient, HttpError, Response};
pub use headers::Headers;
pub use message_consumer::{ConsumerError, ConsumerEvent, MessageConsumer};
