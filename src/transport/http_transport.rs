use std::error::Error as _;
use std::time::Duration;

use futures_util::StreamExt;

use super::{Transport, TransportRequest, TransportResponse};
use crate::config::BackendConfig;
use crate::error::StreamError;

fn build_reqwest_client(
    connect_timeout: Duration,
    timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, StreamError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| StreamError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| StreamError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from the backend section of the client config.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] for an invalid proxy URL, or
    /// [`StreamError::Transport`] if the TLS backend cannot be initialized.
    pub fn new(config: &BackendConfig) -> Result<Self, StreamError> {
        let timeout = (config.request_timeout_secs > 0)
            .then(|| Duration::from_secs(config.request_timeout_secs));
        let client = build_reqwest_client(
            Duration::from_secs(config.connect_timeout_secs),
            timeout,
            config.http_use_env_proxy,
            config.proxy.as_deref(),
        )?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let kind = if err.is_connect() {
        "connect failed"
    } else if err.is_timeout() {
        "timed out"
    } else if err.is_body() || err.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };
    // reqwest's top-level message hides the io cause; walk the chain.
    let mut message = format!("{kind}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl Transport for HttpTransport {
    async fn post_stream(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, StreamError> {
        let mut outgoing = reqwest::Request::new(http::Method::POST, request.url);
        *outgoing.headers_mut() = request.headers;
        *outgoing.body_mut() = Some(reqwest::Body::from(request.body));

        let response = self.client.execute(outgoing).await.map_err(|err| {
            tracing::debug!(error = %err, "chat stream request failed");
            StreamError::Transport(describe_reqwest_error(&err))
        })?;

        let status = response.status();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| StreamError::Transport(describe_reqwest_error(&err))));

        Ok(TransportResponse {
            status,
            body: Some(Box::pin(body)),
        })
    }
}
