use std::sync::Arc;

use crate::auth::{build_stream_headers, CredentialProvider, StreamAccess};
use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::protocol::StreamRequest;
use crate::state::StreamIdGenerator;
use crate::stream::controller::{reject, spawn_stream};
use crate::stream::sink::ChannelSink;
use crate::stream::{ChatStream, StreamHandle, StreamOptions, StreamSink};
use crate::transport::{HttpTransport, Transport, TransportRequest};

/// Entry point for chat streams against one backend.
///
/// Each call to [`ChatClient::start_stream_with`] or [`ChatClient::start_stream`]
/// spawns an independent pump task; the client itself holds no per-stream state.
pub struct ChatClient<T: Transport = HttpTransport> {
    transport: Arc<T>,
    credentials: Arc<dyn CredentialProvider>,
    authenticated_url: url::Url,
    public_url: url::Url,
    options: StreamOptions,
    default_use_rag: Option<bool>,
    ids: StreamIdGenerator,
}

impl ChatClient<HttpTransport> {
    /// Client with a reqwest transport built from `config.backend`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when the backend URLs or proxy are
    /// invalid, or [`StreamError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, StreamError> {
        let transport = HttpTransport::new(&config.backend)?;
        Self::new(transport, credentials, config)
    }
}

impl<T: Transport> ChatClient<T> {
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] when an endpoint URL cannot be built.
    pub fn new(
        transport: T,
        credentials: Arc<dyn CredentialProvider>,
        config: &ClientConfig,
    ) -> Result<Self, StreamError> {
        let backend = &config.backend;
        Ok(Self {
            transport: Arc::new(transport),
            credentials,
            authenticated_url: endpoint_url(&backend.base_url, &backend.chat_stream_path)?,
            public_url: endpoint_url(&backend.base_url, &backend.public_stream_path)?,
            options: config.streaming.stream_options(),
            default_use_rag: config.features.default_use_rag,
            ids: StreamIdGenerator::new(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn endpoint(&self, access: StreamAccess) -> &url::Url {
        match access {
            StreamAccess::Authenticated => &self.authenticated_url,
            StreamAccess::Public => &self.public_url,
        }
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Start a stream that reports into `sink`.
    ///
    /// Returns immediately. Request validation and a missing credential for
    /// an authenticated stream are reported through `sink.on_error` before
    /// this returns, and the returned handle is already finished.
    pub fn start_stream_with<S: StreamSink>(
        &self,
        access: StreamAccess,
        mut request: StreamRequest,
        sink: S,
    ) -> StreamHandle {
        let id = self.ids.next_id();

        if let Err(err) = request.validate() {
            return reject(sink, id, err);
        }
        let headers = match build_stream_headers(access, &*self.credentials) {
            Ok(headers) => headers,
            Err(err) => return reject(sink, id, err),
        };
        if request.use_rag.is_none() {
            request.use_rag = self.default_use_rag;
        }
        let body = match request.to_body() {
            Ok(body) => body,
            Err(err) => return reject(sink, id, err),
        };

        tracing::debug!(
            stream_id = %id,
            access = ?access,
            conversation_id = ?request.conversation_id,
            "starting chat stream"
        );
        let transport_request = TransportRequest {
            url: self.endpoint(access).clone(),
            headers,
            body,
        };
        spawn_stream(
            Arc::clone(&self.transport),
            transport_request,
            self.options,
            sink,
            id,
        )
    }

    /// Start a stream consumed as a [`futures_util::Stream`] of events.
    pub fn start_stream(&self, access: StreamAccess, request: StreamRequest) -> ChatStream {
        let (sink, rx) = ChannelSink::new();
        let handle = self.start_stream_with(access, request, sink);
        ChatStream::new(rx, handle)
    }
}

impl<T: Transport> std::fmt::Debug for ChatClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("authenticated_url", &self.authenticated_url.as_str())
            .field("public_url", &self.public_url.as_str())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn endpoint_url(base_url: &str, path: &str) -> Result<url::Url, StreamError> {
    let joined = format!("{}{}", base_url.trim_end_matches('/'), path);
    url::Url::parse(&joined)
        .map_err(|err| StreamError::Config(format!("Invalid endpoint URL '{joined}': {err}")))
}
