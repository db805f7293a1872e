use super::*;
use shared::domain::ScheduleId;

use crate::{media::PreviewRegistry, test_support::stored_message};

fn schedule() -> ScheduleId {
    ScheduleId::new("shift-7")
}

fn local(id: MessageId, created_at: i64) -> Message {
    let mut message = stored_message(&schedule(), "unused", created_at);
    message.id = id;
    message
}

fn text_origin() -> SendOrigin {
    SendOrigin::Text("hello".into())
}

fn ids(state: &LocalChatState) -> Vec<String> {
    state
        .snapshot()
        .into_iter()
        .map(|entry| entry.message.id.0)
        .collect()
}

#[test]
fn optimistic_entry_is_visible_as_sending() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    state.apply_optimistic(local(temp_id.clone(), 10), MessageId::generate(), text_origin());

    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].message.id, temp_id);
    assert_eq!(snapshot[0].status, DeliveryStatus::Sending);
    assert_eq!(state.pending_count(), 1);
}

#[test]
fn confirmed_messages_render_in_created_at_order_with_id_tie_break() {
    let mut state = LocalChatState::new();
    let schedule_id = schedule();
    let mut messages = vec![
        stored_message(&schedule_id, "b", 20),
        stored_message(&schedule_id, "c", 30),
        stored_message(&schedule_id, "a", 20),
        stored_message(&schedule_id, "z", 5),
    ];
    messages.sort_by(canonical_order);
    state.merge_canonical(messages);

    assert_eq!(ids(&state), vec!["z", "a", "b", "c"]);
}

#[test]
fn unconfirmed_entries_follow_confirmed_ones_in_send_order() {
    let mut state = LocalChatState::new();
    let first = MessageId::temporary();
    let second = MessageId::temporary();
    state.apply_optimistic(local(first.clone(), 1), MessageId::generate(), text_origin());
    state.apply_optimistic(local(second.clone(), 2), MessageId::generate(), text_origin());
    state.mark_failed(&first);
    state.merge_canonical(vec![stored_message(&schedule(), "old", 100)]);

    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].message.id.0, "old");
    assert_eq!(snapshot[1].message.id, first);
    assert_eq!(snapshot[1].status, DeliveryStatus::Failed);
    assert_eq!(snapshot[2].message.id, second);
    assert_eq!(snapshot[2].status, DeliveryStatus::Sending);
}

#[test]
fn confirm_aliases_temp_id_and_merge_drops_the_tracked_copy() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    let persisted = local(MessageId::new("m-final"), 10);
    state.apply_optimistic(local(temp_id.clone(), 10), persisted.id.clone(), text_origin());

    assert!(state.confirm(&temp_id, persisted.clone()));
    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].message.id.0, "m-final");
    assert_eq!(snapshot[0].status, DeliveryStatus::Sent);
    assert!(state.tracked(&temp_id).is_some());
    assert!(state.tracked(&persisted.id).is_some());

    state.merge_canonical(vec![persisted]);
    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].message.id.0, "m-final");
    assert!(state.tracked(&temp_id).is_none());
}

#[test]
fn merge_without_the_new_message_keeps_the_sent_entry() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    state.apply_optimistic(local(temp_id.clone(), 50), MessageId::new("m-final"), text_origin());
    state.confirm(&temp_id, local(MessageId::new("m-final"), 50));

    // A poll that read the store before the write landed.
    state.merge_canonical(vec![stored_message(&schedule(), "older", 40)]);

    assert_eq!(ids(&state), vec!["older", "m-final"]);
}

#[test]
fn merge_retires_a_send_whose_final_id_landed_before_the_ack() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    let persisted = local(MessageId::new("m-final"), 10);
    state.apply_optimistic(local(temp_id.clone(), 10), persisted.id.clone(), text_origin());

    state.merge_canonical(vec![persisted.clone()]);
    assert_eq!(ids(&state), vec!["m-final"]);
    assert_eq!(state.pending_count(), 0);
    assert!(state.tracked(&temp_id).is_none());

    // The late ack finds nothing left to confirm.
    assert!(!state.confirm(&temp_id, persisted));
    assert_eq!(ids(&state), vec!["m-final"]);
}

#[test]
fn failed_send_that_actually_landed_is_retired_by_the_next_merge() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    state.apply_optimistic(local(temp_id.clone(), 10), MessageId::new("m-final"), text_origin());
    state.mark_failed(&temp_id);

    state.merge_canonical(vec![local(MessageId::new("m-final"), 10)]);
    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, DeliveryStatus::Sent);
}

#[test]
fn held_preview_lives_until_the_failed_entry_is_removed() {
    let registry = PreviewRegistry::new();
    let file = MediaFile::new("crew.jpg", "image/jpeg", b"jpeg".to_vec());
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    state.apply_optimistic(local(temp_id.clone(), 1), MessageId::generate(), text_origin());
    state.mark_failed(&temp_id);

    state.hold_preview(&temp_id, registry.register(&file));
    assert_eq!(registry.active_count(), 1);

    state.remove_failed(&temp_id).expect("failed entry");
    assert_eq!(registry.active_count(), 0);

    // Nothing tracked under the id, so the preview is released at once.
    state.hold_preview(&temp_id, registry.register(&file));
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn merge_never_removes_sending_or_failed_entries() {
    let mut state = LocalChatState::new();
    let sending = MessageId::temporary();
    let failed = MessageId::temporary();
    state.apply_optimistic(local(sending.clone(), 1), MessageId::generate(), text_origin());
    state.apply_optimistic(local(failed.clone(), 2), MessageId::generate(), text_origin());
    state.mark_failed(&failed);

    state.merge_canonical(Vec::new());
    state.merge_canonical(vec![stored_message(&schedule(), "x", 3)]);

    assert_eq!(state.snapshot().len(), 3);
    assert_eq!(
        state.tracked(&failed).map(|entry| entry.status),
        Some(DeliveryStatus::Failed)
    );
}

#[test]
fn mark_failed_only_applies_to_sending_entries() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    assert!(!state.mark_failed(&temp_id));

    state.apply_optimistic(local(temp_id.clone(), 1), MessageId::generate(), text_origin());
    state.confirm(&temp_id, local(MessageId::new("done"), 1));
    assert!(!state.mark_failed(&temp_id));
}

#[test]
fn remove_failed_ignores_entries_that_did_not_fail() {
    let mut state = LocalChatState::new();
    let temp_id = MessageId::temporary();
    state.apply_optimistic(local(temp_id.clone(), 1), MessageId::generate(), text_origin());
    assert!(state.remove_failed(&temp_id).is_none());

    state.mark_failed(&temp_id);
    let removed = state.remove_failed(&temp_id).expect("failed entry");
    assert!(matches!(removed.origin, SendOrigin::Text(ref text) if text == "hello"));
    assert!(state.snapshot().is_empty());
}

#[test]
fn sync_error_flag_is_transient() {
    let mut state = LocalChatState::new();
    assert!(state.sync_error().is_none());
    state.set_sync_error("timeout");
    assert_eq!(state.sync_error(), Some("timeout"));
    assert_eq!(state.clear_sync_error().as_deref(), Some("timeout"));
    assert!(state.sync_error().is_none());
}
