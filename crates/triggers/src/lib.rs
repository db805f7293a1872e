//! Derived chat messages for participant (RSVP) changes.
//!
//! The trigger runtime calls [`on_participants_changed`] with the participant
//! list before and after a schedule mutation. Every status change becomes one
//! system message, and the whole batch lands in a single conditional write.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{MessageId, MessageKind, ParticipantStatus, ScheduleId, SystemType, UserId},
    protocol::{now_millis, EpochMillis, Message, MessagePreview, Participant, SchedulePatch},
};
use storage::{BackingStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to read schedule: {0}")]
    Store(#[from] StoreError),
    /// The batch write failed, so none of its messages were stored.
    #[error("dropped {dropped} rsvp notices: {source}")]
    NoticesDropped {
        dropped: usize,
        #[source]
        source: StoreError,
    },
}

impl TriggerError {
    /// Number of derived messages that were lost with this failure.
    pub fn dropped_notices(&self) -> usize {
        match self {
            Self::Store(_) => 0,
            Self::NoticesDropped { dropped, .. } => *dropped,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Also emit a message when a participant disappears from the list.
    pub announce_removals: bool,
}

/// One participant whose RSVP differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub user_id: UserId,
    pub user_name: String,
    /// `None` for a participant that was not in the list before.
    pub previous: Option<ParticipantStatus>,
    /// `None` for a participant that was removed.
    pub current: Option<ParticipantStatus>,
}

impl StatusChange {
    pub fn is_removal(&self) -> bool {
        self.current.is_none()
    }

    pub fn describe(&self) -> String {
        match self.current {
            Some(status) => format!("{} is now {}", self.user_name, status.label()),
            None => format!("{} left the schedule", self.user_name),
        }
    }
}

/// Changes in `after` order, followed by removals in `before` order when
/// `options.announce_removals` is set.
pub fn diff_participants(
    before: &[Participant],
    after: &[Participant],
    options: WatcherOptions,
) -> Vec<StatusChange> {
    let previous: HashMap<&UserId, ParticipantStatus> = before
        .iter()
        .map(|participant| (&participant.user_id, participant.status))
        .collect();

    let mut changes: Vec<StatusChange> = after
        .iter()
        .filter_map(|participant| {
            let old = previous.get(&participant.user_id).copied();
            (old != Some(participant.status)).then(|| StatusChange {
                user_id: participant.user_id.clone(),
                user_name: participant.user_name.clone(),
                previous: old,
                current: Some(participant.status),
            })
        })
        .collect();

    if options.announce_removals {
        let remaining: HashSet<&UserId> = after
            .iter()
            .map(|participant| &participant.user_id)
            .collect();
        changes.extend(
            before
                .iter()
                .filter(|participant| !remaining.contains(&participant.user_id))
                .map(|participant| StatusChange {
                    user_id: participant.user_id.clone(),
                    user_name: participant.user_name.clone(),
                    previous: Some(participant.status),
                    current: None,
                }),
        );
    }
    changes
}

/// One system message per change. Timestamps step by a millisecond so the
/// batch renders in diff order.
pub fn build_system_messages(
    schedule_id: &ScheduleId,
    changes: &[StatusChange],
    now: EpochMillis,
) -> Vec<Message> {
    changes
        .iter()
        .zip(0..)
        .map(|(change, offset)| {
            let created_at = now + offset;
            Message {
                id: MessageId::generate(),
                schedule_id: schedule_id.clone(),
                sender_id: None,
                sender_name: None,
                sender_avatar: None,
                content: change.describe(),
                kind: MessageKind::System,
                system_type: Some(if change.is_removal() {
                    SystemType::ParticipantLeft
                } else {
                    SystemType::RsvpChange
                }),
                attachments: None,
                created_at,
                updated_at: created_at,
                is_deleted: false,
                read_by: Vec::new(),
            }
        })
        .collect()
}

/// Appends one system message per RSVP change to the schedule's chat.
///
/// Returns the number of messages written. Schedules without chat are left
/// untouched. The batch is written with one revision-checked update; any
/// failure fails the whole invocation and nothing is retried.
pub async fn on_participants_changed(
    store: &dyn BackingStore,
    schedule_id: &ScheduleId,
    before: &[Participant],
    after: &[Participant],
    options: WatcherOptions,
) -> Result<usize, TriggerError> {
    let record = store.get(schedule_id).await?;
    if !record.has_chat {
        debug!(schedule_id = %schedule_id, "rsvp watcher: chat disabled; skipping");
        return Ok(0);
    }

    let changes = diff_participants(before, after, options);
    if changes.is_empty() {
        return Ok(0);
    }

    let derived = build_system_messages(schedule_id, &changes, now_millis());
    let preview = derived.last().map(|message| MessagePreview {
        content: message.content.clone(),
        sender_name: None,
        created_at: message.created_at,
        kind: MessageKind::System,
    });
    let count = derived.len();

    let mut messages = record.messages;
    messages.extend(derived);
    let mut patch = SchedulePatch::messages(messages).with_expected_revision(record.revision);
    if let Some(preview) = preview {
        patch = patch.with_last_message(preview);
    }

    if let Err(err) = store.update(schedule_id, patch).await {
        warn!(
            schedule_id = %schedule_id,
            dropped = count,
            error = %err,
            "rsvp watcher: batch write failed; notices dropped"
        );
        return Err(TriggerError::NoticesDropped {
            dropped: count,
            source: err,
        });
    }

    info!(schedule_id = %schedule_id, messages = count, "rsvp watcher: wrote system messages");
    Ok(count)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
