use std::collections::HashSet;

use shared::{
    domain::{AttachmentKind, MediaId, ScheduleId},
    error::{ApiError, ErrorCode},
    protocol::{Attachment, MediaUploadQuery, Participant, ScheduleRecord, SchedulePatch},
};
use storage::{BackingStore, Storage, StoreError, StoredMedia};
use tracing::{error, info, warn};
use triggers::{on_participants_changed, TriggerError, WatcherOptions};

const MAX_FILENAME_BYTES: usize = 180;
const PARTICIPANT_WRITE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub max_media_bytes: u64,
    pub media_public_base: Option<String>,
    pub watcher: WatcherOptions,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            max_media_bytes: crate::config::DEFAULT_MAX_MEDIA_BYTES,
            media_public_base: None,
            watcher: WatcherOptions::default(),
        }
    }

    fn media_url(&self, media_id: &MediaId) -> String {
        let base = self
            .media_public_base
            .as_deref()
            .map(|base| base.trim_end_matches('/'))
            .unwrap_or_default();
        format!("{base}/media/{media_id}")
    }
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(schedule_id) => {
            ApiError::new(ErrorCode::NotFound, format!("schedule {schedule_id} not found"))
        }
        StoreError::Conflict {
            expected, actual, ..
        } => ApiError::conflict(expected, actual),
        other => internal(other),
    }
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

pub async fn get_schedule(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
) -> Result<ScheduleRecord, ApiError> {
    ctx.storage.get(schedule_id).await.map_err(store_error)
}

pub async fn create_schedule(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
    has_chat: bool,
) -> Result<ScheduleRecord, ApiError> {
    if schedule_id.as_str().trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "schedule id cannot be empty",
        ));
    }
    let record = ctx
        .storage
        .create_schedule(schedule_id, has_chat)
        .await
        .map_err(store_error)?;
    info!(schedule_id = %schedule_id, has_chat, "api: schedule created");
    Ok(record)
}

/// Applies `patch` and returns the new revision. Patches that touch the
/// participant list run the RSVP watcher afterwards.
pub async fn update_schedule(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
    patch: SchedulePatch,
) -> Result<u64, ApiError> {
    if patch.participants.is_none() {
        return ctx
            .storage
            .update(schedule_id, patch)
            .await
            .map_err(store_error);
    }
    validate_participants(patch.participants.as_deref().unwrap_or_default())?;
    update_participants(ctx, schedule_id, patch).await
}

/// A participant list holds at most one entry per user.
fn validate_participants(participants: &[Participant]) -> Result<(), ApiError> {
    let mut seen = HashSet::with_capacity(participants.len());
    for participant in participants {
        if !seen.insert(&participant.user_id) {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("participant {} is listed more than once", participant.user_id),
            ));
        }
    }
    Ok(())
}

async fn update_participants(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
    patch: SchedulePatch,
) -> Result<u64, ApiError> {
    let caller_checked = patch.expected_revision.is_some();

    // The before snapshot must be the exact state the write replaced.
    let mut attempt = 0;
    let (before, after, revision) = loop {
        attempt += 1;
        let current = ctx.storage.get(schedule_id).await.map_err(store_error)?;
        let mut conditional = patch.clone();
        conditional.expected_revision = patch.expected_revision.or(Some(current.revision));
        let after = conditional.participants.clone().unwrap_or_default();

        match ctx.storage.update(schedule_id, conditional).await {
            Ok(revision) => break (current.participants, after, revision),
            Err(StoreError::Conflict { .. })
                if !caller_checked && attempt < PARTICIPANT_WRITE_ATTEMPTS =>
            {
                continue
            }
            Err(err) => return Err(store_error(err)),
        }
    };

    if before != after {
        run_watcher(ctx, schedule_id, &before, &after).await;
    }
    Ok(revision)
}

/// Trigger semantics: a watcher failure leaves the participant change in place.
pub(crate) async fn run_watcher(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
    before: &[Participant],
    after: &[Participant],
) {
    match on_participants_changed(&ctx.storage, schedule_id, before, after, ctx.watcher).await {
        Ok(_) => {}
        Err(err @ TriggerError::NoticesDropped { .. }) => {
            error!(
                schedule_id = %schedule_id,
                dropped = err.dropped_notices(),
                error = %err,
                "api: rsvp notices dropped after a concurrent write; participant change kept"
            );
        }
        Err(err) => {
            error!(
                schedule_id = %schedule_id,
                error = %err,
                "api: rsvp watcher could not read the schedule; no notices written, participant change kept"
            );
        }
    }
}

fn validate_upload(
    ctx: &ApiContext,
    query: &MediaUploadQuery,
    body_len: usize,
) -> Result<AttachmentKind, ApiError> {
    if body_len == 0 {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "media body cannot be empty",
        ));
    }
    if body_len as u64 > ctx.max_media_bytes {
        return Err(ApiError::new(
            ErrorCode::PayloadTooLarge,
            format!("media exceeds {} bytes", ctx.max_media_bytes),
        ));
    }

    let name = query.file_name.trim();
    if name.is_empty() || name.len() > MAX_FILENAME_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "file name must be between 1 and 180 bytes",
        ));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "file name must not contain path separators",
        ));
    }

    AttachmentKind::from_mime(&query.mime_type).ok_or_else(|| {
        ApiError::new(
            ErrorCode::Validation,
            format!("unsupported media type: {}", query.mime_type),
        )
    })
}

pub async fn upload_media(
    ctx: &ApiContext,
    schedule_id: &ScheduleId,
    query: MediaUploadQuery,
    body: &[u8],
) -> Result<Attachment, ApiError> {
    let kind = validate_upload(ctx, &query, body.len())?;
    ctx.storage.get(schedule_id).await.map_err(store_error)?;

    let file_name = query.file_name.trim().to_string();
    let media_id = ctx
        .storage
        .store_media(
            schedule_id,
            &query.message_id,
            &file_name,
            &query.mime_type,
            body,
        )
        .await
        .map_err(internal)?;
    info!(
        schedule_id = %schedule_id,
        message_id = %query.message_id,
        media_id = %media_id,
        size = body.len(),
        "api: media stored"
    );

    Ok(Attachment {
        kind,
        url: ctx.media_url(&media_id),
        file_name,
        size: body.len() as u64,
        mime_type: query.mime_type,
        width: None,
        height: None,
        thumbnail_url: None,
    })
}

pub async fn load_media(ctx: &ApiContext, media_id: &MediaId) -> Result<StoredMedia, ApiError> {
    ctx.storage
        .load_media(media_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            warn!(media_id = %media_id, "api: media not found");
            ApiError::new(ErrorCode::NotFound, "media not found")
        })
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
