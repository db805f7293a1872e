use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{MessageId, ScheduleId},
    error::{ApiError, ErrorCode},
    protocol::{Attachment, MediaUploadQuery, ScheduleRecord, SchedulePatch, UpdateScheduleResponse},
};
use storage::{BackingStore, StoreError};
use url::Url;

use crate::{
    error::UploadError,
    media::{MediaFile, MediaUploader},
};

fn endpoint(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

async fn api_error(response: Response) -> ApiError {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(error) => error,
        Err(_) => ApiError::new(ErrorCode::Internal, format!("server responded {status}")),
    }
}

/// Backing store reached through the schedule server's HTTP API.
#[derive(Clone)]
pub struct HttpBackingStore {
    http: Client,
    base: Url,
}

impl HttpBackingStore {
    pub fn new(server_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: Client::new(),
            base: Url::parse(server_url)?,
        })
    }

    fn schedule_url(&self, schedule_id: &ScheduleId) -> Result<Url, StoreError> {
        endpoint(&self.base, &["schedules", schedule_id.as_str()])
            .ok_or_else(|| StoreError::Backend(format!("invalid server url: {}", self.base)))
    }
}

#[async_trait]
impl BackingStore for HttpBackingStore {
    async fn get(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        let response = self
            .http
            .get(self.schedule_url(schedule_id)?)
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|err| StoreError::Backend(err.to_string())),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(schedule_id.clone())),
            _ => Err(StoreError::Backend(api_error(response).await.message)),
        }
    }

    async fn update(
        &self,
        schedule_id: &ScheduleId,
        patch: SchedulePatch,
    ) -> Result<u64, StoreError> {
        let expected = patch.expected_revision;
        let response = self
            .http
            .patch(self.schedule_url(schedule_id)?)
            .json(&patch)
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<UpdateScheduleResponse>()
                .await
                .map(|body| body.revision)
                .map_err(|err| StoreError::Backend(err.to_string())),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(schedule_id.clone())),
            StatusCode::CONFLICT => {
                let error = api_error(response).await;
                Err(StoreError::Conflict {
                    schedule_id: schedule_id.clone(),
                    expected: expected.unwrap_or_default(),
                    actual: error.actual_revision.unwrap_or_default(),
                })
            }
            _ => Err(StoreError::Backend(api_error(response).await.message)),
        }
    }
}

#[derive(Clone)]
pub struct HttpMediaUploader {
    http: Client,
    base: Url,
}

impl HttpMediaUploader {
    pub fn new(server_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: Client::new(),
            base: Url::parse(server_url)?,
        })
    }
}

#[async_trait]
impl MediaUploader for HttpMediaUploader {
    async fn upload(
        &self,
        file: &MediaFile,
        schedule_id: &ScheduleId,
        message_id: &MessageId,
    ) -> Result<Attachment, UploadError> {
        let url = endpoint(&self.base, &["schedules", schedule_id.as_str(), "media"])
            .ok_or_else(|| UploadError::Transport(format!("invalid server url: {}", self.base)))?;
        let response = self
            .http
            .post(url)
            .query(&MediaUploadQuery {
                message_id: message_id.clone(),
                file_name: file.file_name.clone(),
                mime_type: file.mime_type.clone(),
            })
            .body(file.bytes.to_vec())
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::Rejected(api_error(response).await.message));
        }
        response
            .json()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
