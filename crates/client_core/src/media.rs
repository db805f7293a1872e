use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use shared::{
    domain::{AttachmentKind, MessageId, ScheduleId},
    protocol::Attachment,
};

use crate::error::{UploadError, ValidationError};

const PREVIEW_SCHEME: &str = "local-preview://";

/// A file picked for sending.
#[derive(Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

pub fn validate_media(file: &MediaFile, max_bytes: u64) -> Result<AttachmentKind, ValidationError> {
    let kind = AttachmentKind::from_mime(&file.mime_type)
        .ok_or_else(|| ValidationError::UnsupportedMediaType(file.mime_type.clone()))?;
    if file.bytes.is_empty() {
        return Err(ValidationError::EmptyMedia);
    }
    if file.size() > max_bytes {
        return Err(ValidationError::MediaTooLarge {
            size: file.size(),
            limit: max_bytes,
        });
    }
    Ok(kind)
}

#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(
        &self,
        file: &MediaFile,
        schedule_id: &ScheduleId,
        message_id: &MessageId,
    ) -> Result<Attachment, UploadError>;
}

pub struct MissingMediaUploader;

#[async_trait]
impl MediaUploader for MissingMediaUploader {
    async fn upload(
        &self,
        _file: &MediaFile,
        _schedule_id: &ScheduleId,
        _message_id: &MessageId,
    ) -> Result<Attachment, UploadError> {
        Err(UploadError::Transport("media uploads are unavailable".into()))
    }
}

type PreviewMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// Local-only references to media bytes shown while an upload is pending.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    entries: PreviewMap,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file: &MediaFile) -> PreviewRef {
        let url = format!("{PREVIEW_SCHEME}{}", uuid::Uuid::new_v4());
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), Arc::clone(&file.bytes));
        PreviewRef {
            url,
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle to a registered preview. Dropping it releases the preview.
#[derive(Debug)]
pub struct PreviewRef {
    url: String,
    entries: PreviewMap,
}

impl PreviewRef {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn release(self) {}
}

impl Drop for PreviewRef {
    fn drop(&mut self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.url);
    }
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
