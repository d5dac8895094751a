//! Client side of chunked artifact delivery.
//!
//! A [`TransferClient`] drives a [`TransferSession`] against any
//! [`ChunkSource`]: the HTTP retrieval endpoint through [`HttpChunkSource`],
//! or an in-process coordinator.

mod client;
mod http;
mod session;
mod source;

pub use client::{ClientConfig, TransferClient};
pub use http::HttpChunkSource;
pub use session::{Step, TransferError, TransferEvent, TransferSession, TransferState};
pub use source::{ChunkSource, TransportError};
