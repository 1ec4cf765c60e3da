mod http_transport;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::StreamError;

pub use http_transport::HttpTransport;

/// Response body as a stream of raw chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// One streaming POST to the chat backend.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// Status line plus body of a streaming response.
pub struct TransportResponse {
    pub status: http::StatusCode,
    /// `None` when the response carried no readable body.
    pub body: Option<ByteStream>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// HTTP client capability the stream controller drives.
///
/// Dropping the returned body releases the underlying connection.
pub trait Transport: Send + Sync + 'static {
    /// Issue the request and return as soon as the status line is available.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] when the connection cannot be
    /// established or the request fails before a response arrives.
    fn post_stream(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, StreamError>> + Send;
}
