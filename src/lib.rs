pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod transport;

pub use auth::{CredentialProvider, CredentialStore, NoCredentials, StreamAccess};
pub use client::ChatClient;
pub use error::StreamError;
pub use protocol::StreamRequest;
pub use state::StreamState;
pub use stream::{CallbackSink, ChatStream, StreamEvent, StreamHandle, StreamSink};
