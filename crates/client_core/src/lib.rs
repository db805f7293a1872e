//! Client side of schedule chat: an optimistic local timeline kept in step
//! with a polled backing store.

pub mod chat_state;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
mod poller;
mod sender;
mod session;

pub use chat_state::{ChatMessage, DeliveryStatus, LocalChatState};
pub use config::ChatConfig;
pub use error::{SendError, UploadError, ValidationError};
pub use http::{HttpBackingStore, HttpMediaUploader};
pub use media::{MediaFile, MediaUploader, PreviewRegistry};
pub use poller::{canonical_messages, PollerHandle};
pub use session::{ChatEvent, ChatIdentity, ChatSession};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
