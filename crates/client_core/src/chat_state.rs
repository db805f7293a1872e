use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use shared::{domain::MessageId, protocol::Message};

use crate::media::{MediaFile, PreviewRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

/// One rendered timeline row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message: Message,
    pub status: DeliveryStatus,
}

/// What a send was built from, kept so a failed send can be replayed.
#[derive(Debug, Clone)]
pub enum SendOrigin {
    Text(String),
    Media {
        file: MediaFile,
        caption: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct TrackedMessage {
    pub message: Message,
    pub status: DeliveryStatus,
    pub origin: SendOrigin,
    seq: u64,
}

/// Client-held timeline for one open schedule.
///
/// `canonical` is the last reconciled store view. `tracked` holds this
/// session's own sends keyed by their temporary id until the store view
/// contains them; `final_ids` maps the store id each send is written under
/// back to its temporary id. Failed media sends keep their local preview
/// alive in `held_previews` until they are retried or dismissed.
#[derive(Debug, Default)]
pub struct LocalChatState {
    canonical: Vec<Message>,
    canonical_ids: HashSet<MessageId>,
    tracked: HashMap<MessageId, TrackedMessage>,
    final_ids: HashMap<MessageId, MessageId>,
    held_previews: HashMap<MessageId, PreviewRef>,
    next_seq: u64,
    sync_error: Option<String>,
}

pub(crate) fn canonical_order(a: &Message, b: &Message) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

impl LocalChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed messages ordered by `(created_at, id)`, followed by
    /// unconfirmed ones in send order.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        let mut confirmed: Vec<ChatMessage> = self
            .canonical
            .iter()
            .map(|message| ChatMessage {
                message: message.clone(),
                status: DeliveryStatus::Sent,
            })
            .collect();
        let mut unconfirmed: Vec<&TrackedMessage> = Vec::new();
        for entry in self.tracked.values() {
            if entry.status == DeliveryStatus::Sent {
                confirmed.push(ChatMessage {
                    message: entry.message.clone(),
                    status: DeliveryStatus::Sent,
                });
            } else {
                unconfirmed.push(entry);
            }
        }
        confirmed.sort_by(|a, b| canonical_order(&a.message, &b.message));
        unconfirmed.sort_by_key(|entry| entry.seq);

        confirmed.extend(unconfirmed.into_iter().map(|entry| ChatMessage {
            message: entry.message.clone(),
            status: entry.status,
        }));
        confirmed
    }

    /// Tracks a new local send under its temporary id with status `sending`.
    /// `final_id` is the id the write will use in the store, so a poll that
    /// sees it retires the local entry even before the write is acknowledged.
    pub fn apply_optimistic(&mut self, message: Message, final_id: MessageId, origin: SendOrigin) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let temp_id = message.id.clone();
        self.final_ids.insert(final_id, temp_id.clone());
        self.tracked.insert(
            temp_id,
            TrackedMessage {
                message,
                status: DeliveryStatus::Sending,
                origin,
                seq,
            },
        );
    }

    /// Marks a send as written under `persisted.id`. Returns false when the
    /// temporary id is unknown, which includes sends a poll already retired.
    pub fn confirm(&mut self, temp_id: &MessageId, persisted: Message) -> bool {
        if self.canonical_ids.contains(&persisted.id) {
            return self.forget(temp_id).is_some();
        }
        let Some(entry) = self.tracked.get_mut(temp_id) else {
            return false;
        };
        self.final_ids.insert(persisted.id.clone(), temp_id.clone());
        entry.message = persisted;
        entry.status = DeliveryStatus::Sent;
        true
    }

    pub fn mark_failed(&mut self, temp_id: &MessageId) -> bool {
        match self.tracked.get_mut(temp_id) {
            Some(entry) if entry.status == DeliveryStatus::Sending => {
                entry.status = DeliveryStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Keeps `preview` resolvable for as long as `temp_id` stays tracked.
    pub fn hold_preview(&mut self, temp_id: &MessageId, preview: PreviewRef) {
        if self.tracked.contains_key(temp_id) {
            self.held_previews.insert(temp_id.clone(), preview);
        }
    }

    /// Replaces the store view. Own sends that now appear in it stop being
    /// tracked, whatever their status; everything else tracked is kept.
    pub fn merge_canonical(&mut self, server_messages: Vec<Message>) {
        self.canonical_ids = server_messages
            .iter()
            .map(|message| message.id.clone())
            .collect();
        self.canonical = server_messages;

        let landed: Vec<MessageId> = self
            .final_ids
            .iter()
            .filter(|(final_id, _)| self.canonical_ids.contains(*final_id))
            .map(|(_, temp_id)| temp_id.clone())
            .chain(
                self.tracked
                    .keys()
                    .filter(|temp_id| self.canonical_ids.contains(*temp_id))
                    .cloned(),
            )
            .collect();
        for temp_id in landed {
            self.forget(&temp_id);
        }
    }

    /// Looks up a tracked send by its temporary or final id.
    pub fn tracked(&self, id: &MessageId) -> Option<&TrackedMessage> {
        self.tracked
            .get(id)
            .or_else(|| self.final_ids.get(id).and_then(|temp| self.tracked.get(temp)))
    }

    /// Drops a failed entry. Entries in any other state are left alone.
    pub fn remove_failed(&mut self, id: &MessageId) -> Option<TrackedMessage> {
        let temp_id = if self.tracked.contains_key(id) {
            id.clone()
        } else {
            self.final_ids.get(id)?.clone()
        };
        if self.tracked.get(&temp_id)?.status != DeliveryStatus::Failed {
            return None;
        }
        self.forget(&temp_id)
    }

    fn forget(&mut self, temp_id: &MessageId) -> Option<TrackedMessage> {
        self.final_ids.retain(|_, tracked_as| tracked_as != temp_id);
        self.held_previews.remove(temp_id);
        self.tracked.remove(temp_id)
    }

    pub fn pending_count(&self) -> usize {
        self.tracked
            .values()
            .filter(|entry| entry.status == DeliveryStatus::Sending)
            .count()
    }

    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    pub fn set_sync_error(&mut self, error: impl Into<String>) {
        self.sync_error = Some(error.into());
    }

    /// Clears the transient sync flag, returning the error it held.
    pub fn clear_sync_error(&mut self) -> Option<String> {
        self.sync_error.take()
    }
}

#[cfg(test)]
#[path = "tests/chat_state_tests.rs"]
mod tests;
