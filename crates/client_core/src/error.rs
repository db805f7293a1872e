use shared::domain::MessageId;
use thiserror::Error;

/// Input rejected before any network activity. Never produces a failed message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("media file is empty")]
    EmptyMedia,
    #[error("unsupported media type '{0}': only images and videos can be sent")]
    UnsupportedMediaType(String),
    #[error("media file is {size} bytes, the limit is {limit} bytes")]
    MediaTooLarge { size: u64, limit: u64 },
}

/// Rejections of a send request. Store and upload failures are not errors
/// here; they surface as a `failed` message in the timeline.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("another message is still being sent")]
    InFlight,
    #[error("no schedule chat is open")]
    NoActiveSchedule,
    #[error("message {0} is not a failed message of this session")]
    NotRetryable(MessageId),
}

#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload failed: {0}")]
    Transport(String),
}
