use http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use parking_lot::RwLock;

use crate::error::StreamError;

const EVENT_STREAM: HeaderValue = HeaderValue::from_static("text/event-stream");
const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");

/// Which chat endpoint a stream targets.
///
/// - `Authenticated`: requires a bearer token; fails before any network call without one.
/// - `Public`: attaches a bearer token when one is available, works without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamAccess {
    Public,
    Authenticated,
}

/// Source of the bearer token attached to stream requests.
pub trait CredentialProvider: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

/// Provider for clients that only ever use public streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Session token holder: set on login, cleared on logout or expiry.
#[derive(Debug, Default)]
pub struct CredentialStore {
    token: RwLock<Option<Box<str>>>,
}

impl CredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-validated with `token`.
    ///
    /// # Errors
    ///
    /// Same as [`CredentialStore::login`].
    pub fn with_token(token: &str) -> Result<Self, StreamError> {
        let store = Self::new();
        store.login(token)?;
        Ok(store)
    }

    /// Replace the current token.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Auth`] when the token is empty or cannot be
    /// sent in an HTTP header.
    pub fn login(&self, token: &str) -> Result<(), StreamError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(StreamError::Auth("token cannot be empty".to_string()));
        }
        bearer_header(token)?;
        *self.token.write() = Some(token.into());
        tracing::debug!("credential stored");
        Ok(())
    }

    pub fn logout(&self) {
        if self.token.write().take().is_some() {
            tracing::debug!("credential cleared");
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }
}

impl CredentialProvider for CredentialStore {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().as_deref().map(ToString::to_string)
    }
}

impl<P: CredentialProvider> CredentialProvider for std::sync::Arc<P> {
    fn bearer_token(&self) -> Option<String> {
        (**self).bearer_token()
    }
}

/// Build an `Authorization: Bearer <token>` header value.
///
/// # Errors
///
/// Returns [`StreamError::Auth`] when the token contains bytes not allowed in a header.
pub fn bearer_header(token: &str) -> Result<HeaderValue, StreamError> {
    let mut value = HeaderValue::try_from(format!("Bearer {token}"))
        .map_err(|_| StreamError::Auth("token contains invalid header characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Headers for one stream request.
///
/// # Errors
///
/// Returns [`StreamError::Auth`] when `access` is `Authenticated` and no
/// token is available, or when the token is not a valid header value.
pub fn build_stream_headers(
    access: StreamAccess,
    credentials: &dyn CredentialProvider,
) -> Result<http::HeaderMap, StreamError> {
    let mut headers = http::HeaderMap::with_capacity(3);
    headers.insert(CONTENT_TYPE, APPLICATION_JSON);
    headers.insert(ACCEPT, EVENT_STREAM);

    match (access, credentials.bearer_token()) {
        (_, Some(token)) => {
            headers.insert(AUTHORIZATION, bearer_header(&token)?);
        }
        (StreamAccess::Authenticated, None) => {
            return Err(StreamError::Auth("Not authenticated".to_string()));
        }
        (StreamAccess::Public, None) => {}
    }
    Ok(headers)
}
