use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use shared::{domain::ScheduleId, protocol::Message};
use storage::StoreError;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    chat_state::canonical_order,
    session::{ChatEvent, ChatSession, SessionToken},
};

/// Background reconciliation loop for one open schedule.
pub struct PollerHandle {
    schedule_id: ScheduleId,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub(crate) fn spawn(
        session: Weak<ChatSession>,
        token: SessionToken,
        period: Duration,
    ) -> Self {
        let schedule_id = token.schedule_id.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the caller has just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = session.upgrade() else {
                    break;
                };
                if !session.is_current(&token).await {
                    break;
                }
                let _ = session.sync_tick(&token).await;
            }
            debug!(schedule_id = %token.schedule_id, "chat: poller exited");
        });
        Self { schedule_id, task }
    }

    pub fn schedule_id(&self) -> &ScheduleId {
        &self.schedule_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {}
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Store messages as they should render: soft-deleted ones removed, ordered
/// by creation time with the id as tie-break.
pub fn canonical_messages(mut messages: Vec<Message>) -> Vec<Message> {
    messages.retain(|message| !message.is_deleted);
    messages.sort_by(canonical_order);
    messages
}

impl ChatSession {
    /// Runs one reconciliation against the store for the open schedule.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let Some(token) = self.current_token().await else {
            return Ok(());
        };
        self.sync_tick(&token).await
    }

    pub(crate) async fn sync_tick(&self, token: &SessionToken) -> Result<(), StoreError> {
        let fetched = self.store.get(&token.schedule_id).await;

        let mut guard = self.inner.lock().await;
        if !guard.is_current(token) {
            debug!(
                schedule_id = %token.schedule_id,
                "chat: discarding poll result for a schedule that is no longer open"
            );
            return Ok(());
        }

        match fetched {
            Ok(record) => {
                guard.chat.merge_canonical(canonical_messages(record.messages));
                let recovered = guard.chat.clear_sync_error().is_some();
                drop(guard);

                if recovered {
                    info!(schedule_id = %token.schedule_id, "chat: sync recovered");
                    self.emit(ChatEvent::SyncRecovered {
                        schedule_id: token.schedule_id.clone(),
                    });
                }
                self.emit(ChatEvent::TimelineUpdated {
                    schedule_id: token.schedule_id.clone(),
                });
                Ok(())
            }
            Err(err) => {
                guard.chat.set_sync_error(err.to_string());
                drop(guard);

                warn!(
                    schedule_id = %token.schedule_id,
                    error = %err,
                    "chat: failed to fetch schedule messages; keeping local timeline"
                );
                self.emit(ChatEvent::SyncFailed {
                    schedule_id: token.schedule_id.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
