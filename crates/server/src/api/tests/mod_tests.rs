use shared::{
    domain::{MessageId, MessageKind, ParticipantStatus, UserId},
    protocol::Participant,
};

use super::*;

async fn setup() -> (ApiContext, ScheduleId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = ApiContext::new(storage);
    let schedule_id = ScheduleId::new("shift-1");
    create_schedule(&ctx, &schedule_id, true)
        .await
        .expect("schedule");
    (ctx, schedule_id)
}

fn participant(user_id: &str, name: &str, status: ParticipantStatus) -> Participant {
    Participant {
        user_id: UserId::new(user_id),
        user_name: name.into(),
        status,
        responded_at: 1,
    }
}

fn upload_query(file_name: &str, mime_type: &str) -> MediaUploadQuery {
    MediaUploadQuery {
        message_id: MessageId::new("m-1"),
        file_name: file_name.into(),
        mime_type: mime_type.into(),
    }
}

#[tokio::test]
async fn participant_change_appends_system_messages() {
    let (ctx, schedule_id) = setup().await;
    update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(vec![participant("u1", "Ana", ParticipantStatus::Going)]),
    )
    .await
    .expect("first rsvp");

    update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(vec![
            participant("u1", "Ana", ParticipantStatus::Waiting),
            participant("u2", "Ben", ParticipantStatus::Going),
        ]),
    )
    .await
    .expect("second rsvp");

    let record = get_schedule(&ctx, &schedule_id).await.expect("record");
    let contents: Vec<_> = record.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "Ana is now attending",
            "Ana is now pending",
            "Ben is now attending"
        ]
    );
    assert!(record.messages.iter().all(|m| m.kind == MessageKind::System));
    assert_eq!(record.participants.len(), 2);
}

#[tokio::test]
async fn identical_participant_write_does_not_run_the_watcher() {
    let (ctx, schedule_id) = setup().await;
    let participants = vec![participant("u1", "Ana", ParticipantStatus::Going)];
    update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(participants.clone()),
    )
    .await
    .expect("first");
    update_schedule(&ctx, &schedule_id, SchedulePatch::participants(participants))
        .await
        .expect("repeat");

    let record = get_schedule(&ctx, &schedule_id).await.expect("record");
    assert_eq!(record.messages.len(), 1);
}

#[tokio::test]
async fn message_only_patch_never_triggers_the_watcher() {
    let (ctx, schedule_id) = setup().await;
    let revision = update_schedule(&ctx, &schedule_id, SchedulePatch::messages(Vec::new()))
        .await
        .expect("patch");
    assert_eq!(revision, 1);
    let record = get_schedule(&ctx, &schedule_id).await.expect("record");
    assert!(record.messages.is_empty());
}

#[tokio::test]
async fn chat_disabled_schedule_keeps_participants_without_messages() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = ApiContext::new(storage);
    let schedule_id = ScheduleId::new("quiet");
    create_schedule(&ctx, &schedule_id, false)
        .await
        .expect("schedule");

    update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(vec![participant("u1", "Ana", ParticipantStatus::Going)]),
    )
    .await
    .expect("rsvp");

    let record = get_schedule(&ctx, &schedule_id).await.expect("record");
    assert_eq!(record.participants.len(), 1);
    assert!(record.messages.is_empty());
}

#[tokio::test]
async fn stale_caller_revision_is_a_conflict() {
    let (ctx, schedule_id) = setup().await;
    update_schedule(&ctx, &schedule_id, SchedulePatch::messages(Vec::new()))
        .await
        .expect("bump");

    let err = update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(Vec::new()).with_expected_revision(0),
    )
    .await
    .expect_err("stale");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(err.actual_revision, Some(1));
}

#[tokio::test]
async fn duplicate_participants_are_rejected_before_writing() {
    let (ctx, schedule_id) = setup().await;

    let err = update_schedule(
        &ctx,
        &schedule_id,
        SchedulePatch::participants(vec![
            participant("u1", "Ana", ParticipantStatus::Going),
            participant("u2", "Ben", ParticipantStatus::Waiting),
            participant("u1", "Ana", ParticipantStatus::Declined),
        ]),
    )
    .await
    .expect_err("duplicate user");
    assert_eq!(err.code, ErrorCode::Validation);

    let record = get_schedule(&ctx, &schedule_id).await.expect("record");
    assert!(record.participants.is_empty());
    assert!(record.messages.is_empty());
    assert_eq!(record.revision, 0);
}

#[tokio::test]
async fn missing_schedule_maps_to_not_found() {
    let (ctx, _) = setup().await;
    let err = get_schedule(&ctx, &ScheduleId::new("ghost"))
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn upload_stores_media_and_returns_attachment() {
    let (mut ctx, schedule_id) = setup().await;
    ctx.media_public_base = Some("https://media.example/".into());

    let attachment = upload_media(
        &ctx,
        &schedule_id,
        upload_query(" crew.png ", "image/png"),
        b"png-bytes",
    )
    .await
    .expect("upload");
    assert_eq!(attachment.kind, AttachmentKind::Image);
    assert_eq!(attachment.file_name, "crew.png");
    assert_eq!(attachment.size, 9);

    let media_id = attachment
        .url
        .strip_prefix("https://media.example/media/")
        .expect("public url");
    let stored = load_media(&ctx, &MediaId::new(media_id))
        .await
        .expect("stored");
    assert_eq!(stored.bytes, b"png-bytes");
    assert_eq!(stored.message_id.as_str(), "m-1");
}

#[tokio::test]
async fn upload_rejects_bad_media() {
    let (mut ctx, schedule_id) = setup().await;
    ctx.max_media_bytes = 4;

    let cases = [
        (upload_query("a.png", "image/png"), &b""[..], ErrorCode::Validation),
        (upload_query("a.png", "image/png"), &b"12345"[..], ErrorCode::PayloadTooLarge),
        (upload_query("a.pdf", "application/pdf"), &b"1"[..], ErrorCode::Validation),
        (upload_query("../a.png", "image/png"), &b"1"[..], ErrorCode::Validation),
    ];
    for (query, body, code) in cases {
        let err = upload_media(&ctx, &schedule_id, query, body)
            .await
            .expect_err("rejected");
        assert_eq!(err.code, code);
    }

    let err = upload_media(
        &ctx,
        &ScheduleId::new("ghost"),
        upload_query("a.png", "image/png"),
        b"1",
    )
    .await
    .expect_err("unknown schedule");
    assert_eq!(err.code, ErrorCode::NotFound);
}
