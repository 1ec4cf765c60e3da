pub mod event;
pub mod request;

pub use event::{ParsedEvent, StreamAction, WireEvent, DONE_EVENT, TOKEN_EVENT};
pub use request::StreamRequest;
