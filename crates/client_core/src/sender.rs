use shared::{
    domain::{AttachmentKind, MessageId, MessageKind, ScheduleId},
    protocol::{now_millis, Attachment, Message, MessagePreview, SchedulePatch},
};
use storage::StoreError;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    chat_state::{DeliveryStatus, SendOrigin},
    error::{SendError, UploadError, ValidationError},
    media::{validate_media, MediaFile, PreviewRef},
    session::{ChatEvent, ChatSession, SendPermit, SessionToken},
};

const PHOTO_PREVIEW: &str = "📷 Photo";
const VIDEO_PREVIEW: &str = "🎬 Video";

#[derive(Debug, Error)]
enum SendFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

fn validate_text(content: &str) -> Result<String, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(trimmed.to_string())
}

fn normalize_caption(caption: Option<&str>) -> Option<String> {
    caption
        .map(str::trim)
        .filter(|caption| !caption.is_empty())
        .map(ToOwned::to_owned)
}

fn message_kind_for(kind: AttachmentKind) -> MessageKind {
    match kind {
        AttachmentKind::Image => MessageKind::Image,
        AttachmentKind::Video => MessageKind::File,
    }
}

impl ChatSession {
    /// Sends a text message. Returns the temporary id of the new timeline
    /// entry; whether the write succeeded is reported through its status.
    pub async fn send_message(&self, content: &str) -> Result<MessageId, SendError> {
        let content = validate_text(content)?;
        let permit = self.try_begin_send()?;
        self.send_text(&permit, content).await
    }

    /// Uploads `file` and sends it with an optional caption.
    pub async fn send_media(
        &self,
        file: MediaFile,
        caption: Option<&str>,
    ) -> Result<MessageId, SendError> {
        let kind = validate_media(&file, self.config.max_media_bytes)?;
        let permit = self.try_begin_send()?;
        self.send_media_file(&permit, file, kind, normalize_caption(caption))
            .await
    }

    /// Replaces a failed entry with a fresh send of the same content.
    /// Failed media sends are uploaded again from the retained file.
    pub async fn retry_failed_message(&self, id: &MessageId) -> Result<MessageId, SendError> {
        let origin = {
            let guard = self.inner.lock().await;
            match guard.chat.tracked(id) {
                Some(entry)
                    if entry.status == DeliveryStatus::Failed && !entry.message.is_system() =>
                {
                    entry.origin.clone()
                }
                _ => return Err(SendError::NotRetryable(id.clone())),
            }
        };
        let permit = self.try_begin_send()?;

        if self.inner.lock().await.chat.remove_failed(id).is_none() {
            return Err(SendError::NotRetryable(id.clone()));
        }
        info!(message_id = %id, "chat: retrying failed message");
        self.emit_timeline().await;

        match origin {
            SendOrigin::Text(content) => self.send_text(&permit, content).await,
            SendOrigin::Media { file, caption } => {
                let kind = validate_media(&file, self.config.max_media_bytes)?;
                self.send_media_file(&permit, file, kind, caption).await
            }
        }
    }

    /// Removes a failed entry without resending it.
    pub async fn dismiss_failed(&self, id: &MessageId) -> bool {
        let removed = self.inner.lock().await.chat.remove_failed(id).is_some();
        if removed {
            self.emit_timeline().await;
        }
        removed
    }

    async fn send_text(
        &self,
        _permit: &SendPermit<'_>,
        content: String,
    ) -> Result<MessageId, SendError> {
        let token = self
            .current_token()
            .await
            .ok_or(SendError::NoActiveSchedule)?;
        let temp_id = MessageId::temporary();
        let final_id = MessageId::generate();
        let message = self.compose(
            &token.schedule_id,
            temp_id.clone(),
            content.clone(),
            MessageKind::Text,
            None,
        );
        self.apply_optimistic(
            &token,
            message.clone(),
            final_id.clone(),
            SendOrigin::Text(content),
        )
        .await?;

        let message = Message {
            id: final_id,
            ..message
        };
        let outcome = self.persist(&token.schedule_id, message).await;
        self.finish_send(&token, &temp_id, outcome.map_err(SendFailure::from), None)
            .await;
        Ok(temp_id)
    }

    async fn send_media_file(
        &self,
        _permit: &SendPermit<'_>,
        file: MediaFile,
        kind: AttachmentKind,
        caption: Option<String>,
    ) -> Result<MessageId, SendError> {
        let token = self
            .current_token()
            .await
            .ok_or(SendError::NoActiveSchedule)?;
        let preview = self.previews.register(&file);
        let temp_id = MessageId::temporary();
        let final_id = MessageId::generate();
        let local_attachment = Attachment {
            kind,
            url: preview.url().to_string(),
            file_name: file.file_name.clone(),
            size: file.size(),
            mime_type: file.mime_type.clone(),
            width: None,
            height: None,
            thumbnail_url: None,
        };
        let message = self.compose(
            &token.schedule_id,
            temp_id.clone(),
            caption.clone().unwrap_or_default(),
            message_kind_for(kind),
            Some(vec![local_attachment]),
        );
        let origin = SendOrigin::Media {
            file: file.clone(),
            caption,
        };
        self.apply_optimistic(&token, message.clone(), final_id.clone(), origin)
            .await?;

        let outcome = match self
            .uploader
            .upload(&file, &token.schedule_id, &final_id)
            .await
        {
            Ok(attachment) => {
                let message = Message {
                    id: final_id,
                    attachments: Some(vec![attachment]),
                    ..message
                };
                self.persist(&token.schedule_id, message)
                    .await
                    .map_err(SendFailure::from)
            }
            Err(err) => Err(SendFailure::from(err)),
        };
        self.finish_send(&token, &temp_id, outcome, Some(preview))
            .await;
        Ok(temp_id)
    }

    fn compose(
        &self,
        schedule_id: &ScheduleId,
        id: MessageId,
        content: String,
        kind: MessageKind,
        attachments: Option<Vec<Attachment>>,
    ) -> Message {
        let now = now_millis();
        Message {
            id,
            schedule_id: schedule_id.clone(),
            sender_id: Some(self.identity.user_id.clone()),
            sender_name: Some(self.identity.display_name.clone()),
            sender_avatar: self.identity.avatar_url.clone(),
            content,
            kind,
            system_type: None,
            attachments,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            read_by: vec![self.identity.user_id.clone()],
        }
    }

    async fn apply_optimistic(
        &self,
        token: &SessionToken,
        message: Message,
        final_id: MessageId,
        origin: SendOrigin,
    ) -> Result<(), SendError> {
        {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(token) {
                return Err(SendError::NoActiveSchedule);
            }
            guard.chat.apply_optimistic(message, final_id, origin);
        }
        self.emit(ChatEvent::TimelineUpdated {
            schedule_id: token.schedule_id.clone(),
        });
        Ok(())
    }

    /// Appends `message` to the stored list with a revision-checked write,
    /// re-reading on conflict. Every attempt writes the same message id.
    async fn persist(
        &self,
        schedule_id: &ScheduleId,
        message: Message,
    ) -> Result<Message, StoreError> {
        let attempts = self.config.max_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            let record = self.store.get(schedule_id).await?;
            let mut messages = record.messages;
            messages.push(message.clone());
            let patch = SchedulePatch::messages(messages).with_expected_revision(record.revision);

            match self.store.update(schedule_id, patch).await {
                Ok(revision) => {
                    debug!(
                        schedule_id = %schedule_id,
                        message_id = %message.id,
                        revision,
                        "chat: message written"
                    );
                    break;
                }
                Err(StoreError::Conflict { actual, .. }) if attempt < attempts => {
                    debug!(
                        schedule_id = %schedule_id,
                        attempt,
                        actual,
                        "chat: concurrent write detected, re-reading messages"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }

        self.update_preview(schedule_id, &message).await;
        Ok(message)
    }

    /// Best effort; a failure here never affects the message itself.
    async fn update_preview(&self, schedule_id: &ScheduleId, message: &Message) {
        let content = match message.kind {
            _ if !message.content.is_empty() => message.content.clone(),
            MessageKind::Image => PHOTO_PREVIEW.to_string(),
            MessageKind::File => VIDEO_PREVIEW.to_string(),
            _ => String::new(),
        };
        let preview = MessagePreview {
            content: content.chars().take(self.config.preview_length).collect(),
            sender_name: message.sender_name.clone(),
            created_at: message.created_at,
            kind: message.kind,
        };
        if let Err(err) = self
            .store
            .update(schedule_id, SchedulePatch::last_message(preview))
            .await
        {
            warn!(
                schedule_id = %schedule_id,
                message_id = %message.id,
                error = %err,
                "chat: failed to update last message preview"
            );
        }
    }

    async fn finish_send(
        &self,
        token: &SessionToken,
        temp_id: &MessageId,
        outcome: Result<Message, SendFailure>,
        preview: Option<PreviewRef>,
    ) {
        {
            let mut guard = self.inner.lock().await;
            if !guard.is_current(token) {
                debug!(
                    schedule_id = %token.schedule_id,
                    temp_id = %temp_id,
                    "chat: discarding send result for a schedule that is no longer open"
                );
                return;
            }
            match &outcome {
                Ok(persisted) => {
                    guard.chat.confirm(temp_id, persisted.clone());
                }
                Err(_) => {
                    guard.chat.mark_failed(temp_id);
                    // The failed row keeps showing the local file.
                    if let Some(preview) = preview {
                        guard.chat.hold_preview(temp_id, preview);
                    }
                }
            }
        }

        if let Err(err) = outcome {
            warn!(
                schedule_id = %token.schedule_id,
                temp_id = %temp_id,
                error = %err,
                "chat: message send failed"
            );
            self.emit(ChatEvent::SendFailed {
                schedule_id: token.schedule_id.clone(),
                message_id: temp_id.clone(),
                error: err.to_string(),
            });
        }
        self.emit(ChatEvent::TimelineUpdated {
            schedule_id: token.schedule_id.clone(),
        });
    }

    async fn emit_timeline(&self) {
        if let Some(token) = self.current_token().await {
            self.emit(ChatEvent::TimelineUpdated {
                schedule_id: token.schedule_id,
            });
        }
    }
}

#[cfg(test)]
#[path = "tests/sender_tests.rs"]
mod tests;
