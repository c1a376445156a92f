//! Course bot backend API
//!
//! Typed access to the history, prompt creation and response streaming
//! endpoints.

mod client;
mod error;
pub mod types;

pub use client::CourseBotClient;
pub use error::{ApiError, ApiErrorKind};

use bytes::Bytes;
use futures::stream::BoxStream;

/// Raw response body, chunked as it arrives from the network
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;
