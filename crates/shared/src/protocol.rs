use serde::{Deserialize, Serialize};

use crate::domain::{
    AttachmentKind, MessageId, MessageKind, ParticipantStatus, ScheduleId, SystemType, UserId,
};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

pub fn now_millis() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Message as persisted in a schedule record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub schedule_id: ScheduleId,
    pub sender_id: Option<UserId>,
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<SystemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    pub created_at: EpochMillis,
    pub updated_at: EpochMillis,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub read_by: Vec<UserId>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub user_name: String,
    pub status: ParticipantStatus,
    pub responded_at: EpochMillis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub content: String,
    pub sender_name: Option<String>,
    pub created_at: EpochMillis,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: ScheduleId,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub has_chat: bool,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub revision: u64,
}

impl ScheduleRecord {
    pub fn new(id: ScheduleId, has_chat: bool) -> Self {
        Self {
            id,
            messages: Vec::new(),
            participants: Vec::new(),
            has_chat,
            last_message: None,
            revision: 0,
        }
    }

    /// Applies the present fields of `patch`. Array fields are replaced whole.
    pub fn apply(&mut self, patch: SchedulePatch) {
        if let Some(messages) = patch.messages {
            self.messages = messages;
        }
        if let Some(participants) = patch.participants {
            self.participants = participants;
        }
        if let Some(has_chat) = patch.has_chat {
            self.has_chat = has_chat;
        }
        if let Some(last_message) = patch.last_message {
            self.last_message = Some(last_message);
        }
    }
}

/// Partial update of a schedule record.
///
/// When `expected_revision` is set the write only succeeds if the stored
/// revision still matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_chat: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

impl SchedulePatch {
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::default()
        }
    }

    pub fn participants(participants: Vec<Participant>) -> Self {
        Self {
            participants: Some(participants),
            ..Self::default()
        }
    }

    pub fn last_message(preview: MessagePreview) -> Self {
        Self {
            last_message: Some(preview),
            ..Self::default()
        }
    }

    pub fn with_expected_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    pub fn with_last_message(mut self, preview: MessagePreview) -> Self {
        self.last_message = Some(preview);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub id: ScheduleId,
    #[serde(default)]
    pub has_chat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleResponse {
    pub revision: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploadQuery {
    pub message_id: MessageId,
    pub file_name: String,
    pub mime_type: String,
}
