use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use shared::domain::{MessageId, ScheduleId, UserId};
use storage::{BackingStore, StoreError};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::{
    chat_state::{ChatMessage, LocalChatState},
    config::ChatConfig,
    error::SendError,
    media::{MediaUploader, MissingMediaUploader, PreviewRegistry},
    poller::PollerHandle,
};

/// The signed-in user as shown on outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    TimelineUpdated {
        schedule_id: ScheduleId,
    },
    SendFailed {
        schedule_id: ScheduleId,
        message_id: MessageId,
        error: String,
    },
    SyncFailed {
        schedule_id: ScheduleId,
        error: String,
    },
    SyncRecovered {
        schedule_id: ScheduleId,
    },
}

/// Identifies the schedule view an async continuation was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionToken {
    pub(crate) schedule_id: ScheduleId,
    pub(crate) epoch: u64,
}

pub(crate) struct SessionState {
    pub(crate) active: Option<ScheduleId>,
    pub(crate) epoch: u64,
    pub(crate) chat: LocalChatState,
}

impl SessionState {
    pub(crate) fn is_current(&self, token: &SessionToken) -> bool {
        self.epoch == token.epoch && self.active.as_ref() == Some(&token.schedule_id)
    }
}

/// Chat view of one user. At most one schedule is open at a time.
pub struct ChatSession {
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) uploader: Arc<dyn MediaUploader>,
    pub(crate) identity: ChatIdentity,
    pub(crate) config: ChatConfig,
    pub(crate) previews: PreviewRegistry,
    pub(crate) inner: Mutex<SessionState>,
    send_in_flight: AtomicBool,
    poller: Mutex<Option<PollerHandle>>,
    events: broadcast::Sender<ChatEvent>,
}

/// Single-flight permit for sends; released on drop.
pub(crate) struct SendPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SendPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn BackingStore>,
        identity: ChatIdentity,
        config: ChatConfig,
    ) -> Arc<Self> {
        Self::new_with_uploader(store, Arc::new(MissingMediaUploader), identity, config)
    }

    pub fn new_with_uploader(
        store: Arc<dyn BackingStore>,
        uploader: Arc<dyn MediaUploader>,
        identity: ChatIdentity,
        config: ChatConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            uploader,
            identity,
            config,
            previews: PreviewRegistry::new(),
            inner: Mutex::new(SessionState {
                active: None,
                epoch: 0,
                chat: LocalChatState::new(),
            }),
            send_in_flight: AtomicBool::new(false),
            poller: Mutex::new(None),
            events,
        })
    }

    /// Switches the session to `schedule_id`: resets the timeline, loads it
    /// once and starts polling. Results still in flight for a previously
    /// open schedule are discarded when they arrive.
    pub async fn open(self: &Arc<Self>, schedule_id: ScheduleId) -> Result<(), StoreError> {
        let token = {
            let mut guard = self.inner.lock().await;
            guard.epoch += 1;
            guard.active = Some(schedule_id.clone());
            guard.chat = LocalChatState::new();
            SessionToken {
                schedule_id: schedule_id.clone(),
                epoch: guard.epoch,
            }
        };
        info!(schedule_id = %schedule_id, epoch = token.epoch, "chat: opening schedule");

        let initial = self.sync_tick(&token).await;

        // Holding the poller slot orders this check against later opens.
        let mut poller = self.poller.lock().await;
        if !self.is_current(&token).await {
            debug!(
                schedule_id = %schedule_id,
                epoch = token.epoch,
                "chat: schedule was switched during initial load; not starting its poller"
            );
            return initial;
        }
        let handle = PollerHandle::spawn(Arc::downgrade(self), token, self.config.poll_interval);
        if let Some(previous) = poller.replace(handle) {
            debug!(schedule_id = %previous.schedule_id(), "chat: stopping previous poller");
            previous.stop();
        }
        initial
    }

    /// Stops polling and forgets the open schedule.
    pub async fn close(&self) {
        let closed = {
            let mut guard = self.inner.lock().await;
            guard.epoch += 1;
            guard.chat = LocalChatState::new();
            guard.active.take()
        };
        if let Some(handle) = self.poller.lock().await.take() {
            handle.stop();
        }
        if let Some(schedule_id) = closed {
            info!(schedule_id = %schedule_id, "chat: closed schedule");
        }
    }

    pub async fn active_schedule(&self) -> Option<ScheduleId> {
        self.inner.lock().await.active.clone()
    }

    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.chat.snapshot()
    }

    /// Last reconciliation failure, cleared by the next successful poll.
    pub async fn sync_error(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .chat
            .sync_error()
            .map(ToOwned::to_owned)
    }

    pub fn identity(&self) -> &ChatIdentity {
        &self.identity
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    pub fn is_sending(&self) -> bool {
        self.send_in_flight.load(Ordering::Acquire)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(crate) fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) async fn current_token(&self) -> Option<SessionToken> {
        let guard = self.inner.lock().await;
        guard.active.clone().map(|schedule_id| SessionToken {
            schedule_id,
            epoch: guard.epoch,
        })
    }

    pub(crate) async fn is_current(&self, token: &SessionToken) -> bool {
        self.inner.lock().await.is_current(token)
    }

    pub(crate) fn try_begin_send(&self) -> Result<SendPermit<'_>, SendError> {
        if self
            .send_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("chat: rejecting send while another is in flight");
            return Err(SendError::InFlight);
        }
        Ok(SendPermit {
            flag: &self.send_in_flight,
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
