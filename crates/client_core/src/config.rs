use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_WRITE_ATTEMPTS: usize = 3;
pub const DEFAULT_PREVIEW_LENGTH: usize = 100;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub poll_interval: Duration,
    pub max_media_bytes: u64,
    /// Read-append-write cycles tried before a send is marked failed on
    /// revision conflicts.
    pub max_write_attempts: usize,
    /// Characters of content kept in the schedule's last-message preview.
    pub preview_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            preview_length: DEFAULT_PREVIEW_LENGTH,
        }
    }
}
