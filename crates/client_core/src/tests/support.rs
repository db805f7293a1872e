use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use shared::{
    domain::{AttachmentKind, MessageId, MessageKind, ScheduleId, UserId},
    protocol::{Attachment, Message, ScheduleRecord, SchedulePatch},
};
use storage::{BackingStore, MemoryStore, StoreError};
use tokio::sync::{Mutex, Notify};

use crate::{
    config::ChatConfig,
    error::UploadError,
    media::{MediaFile, MediaUploader},
    session::{ChatIdentity, ChatSession},
};

/// Pauses one store call until released by the test.
#[derive(Default)]
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub(crate) async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn open(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Memory store with switches for failures, pauses and interleaved writers.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub(crate) inner: MemoryStore,
    pub(crate) fail_gets: AtomicBool,
    pub(crate) fail_message_writes: AtomicBool,
    pub(crate) fail_preview_writes: AtomicBool,
    pub(crate) message_writes: AtomicUsize,
    pub(crate) gets: AtomicUsize,
    get_gate: Mutex<Option<Arc<Gate>>>,
    write_gate: Mutex<Option<Arc<Gate>>>,
    ack_gate: Mutex<Option<Arc<Gate>>>,
    foreign_writes: Mutex<Vec<Message>>,
}

impl ScriptedStore {
    pub(crate) async fn with_schedule(schedule_id: &ScheduleId) -> Arc<Self> {
        let store = Arc::new(Self::default());
        store.inner.create_schedule(schedule_id, true).await;
        store
    }

    pub(crate) async fn seed(&self, schedule_id: &ScheduleId, messages: Vec<Message>) {
        let mut record = ScheduleRecord::new(schedule_id.clone(), true);
        record.messages = messages;
        self.inner.insert(record).await;
    }

    pub(crate) async fn hold_next_get(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.get_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) async fn hold_next_message_write(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.write_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    /// Holds the acknowledgement of the next message write after the write
    /// itself has been applied.
    pub(crate) async fn hold_next_ack(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.ack_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    /// Lands `message` just before the next message write, as another
    /// client would.
    pub(crate) async fn interleave_foreign_write(&self, message: Message) {
        self.foreign_writes.lock().await.push(message);
    }

    pub(crate) async fn stored_messages(&self, schedule_id: &ScheduleId) -> Vec<Message> {
        self.inner
            .get(schedule_id)
            .await
            .map(|record| record.messages)
            .unwrap_or_default()
    }
}

#[async_trait]
impl BackingStore for ScriptedStore {
    async fn get(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let gate = self.get_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.get(schedule_id).await
    }

    async fn update(
        &self,
        schedule_id: &ScheduleId,
        patch: SchedulePatch,
    ) -> Result<u64, StoreError> {
        if patch.messages.is_none() {
            if self.fail_preview_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("preview write refused".into()));
            }
            return self.inner.update(schedule_id, patch).await;
        }

        let gate = self.write_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write refused".into()));
        }
        let foreign = std::mem::take(&mut *self.foreign_writes.lock().await);
        for message in foreign {
            let mut messages = self.inner.get(schedule_id).await?.messages;
            messages.push(message);
            self.inner
                .update(schedule_id, SchedulePatch::messages(messages))
                .await?;
        }

        let revision = self.inner.update(schedule_id, patch).await?;
        self.message_writes.fetch_add(1, Ordering::SeqCst);
        let gate = self.ack_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(revision)
    }
}

pub(crate) struct ScriptedUploader {
    pub(crate) fail: AtomicBool,
    pub(crate) uploads: AtomicUsize,
}

impl ScriptedUploader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MediaUploader for ScriptedUploader {
    async fn upload(
        &self,
        file: &MediaFile,
        schedule_id: &ScheduleId,
        message_id: &MessageId,
    ) -> Result<Attachment, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Transport("bucket unavailable".into()));
        }
        Ok(Attachment {
            kind: AttachmentKind::from_mime(&file.mime_type).unwrap_or(AttachmentKind::Image),
            url: format!("https://media.example/{schedule_id}/{message_id}"),
            file_name: file.file_name.clone(),
            size: file.size(),
            mime_type: file.mime_type.clone(),
            width: None,
            height: None,
            thumbnail_url: None,
        })
    }
}

pub(crate) fn identity() -> ChatIdentity {
    ChatIdentity {
        user_id: UserId::new("crew-1"),
        display_name: "Dana".into(),
        avatar_url: None,
    }
}

pub(crate) fn session_over(store: Arc<ScriptedStore>, uploader: Arc<ScriptedUploader>) -> Arc<ChatSession> {
    ChatSession::new_with_uploader(store, uploader, identity(), ChatConfig::default())
}

pub(crate) fn stored_message(schedule_id: &ScheduleId, id: &str, created_at: i64) -> Message {
    Message {
        id: MessageId::new(id),
        schedule_id: schedule_id.clone(),
        sender_id: Some(UserId::new("crew-2")),
        sender_name: Some("Sam".into()),
        sender_avatar: None,
        content: format!("content of {id}"),
        kind: MessageKind::Text,
        system_type: None,
        attachments: None,
        created_at,
        updated_at: created_at,
        is_deleted: false,
        read_by: Vec::new(),
    }
}
