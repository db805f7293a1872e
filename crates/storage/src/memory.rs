use std::collections::HashMap;

use async_trait::async_trait;
use shared::{
    domain::ScheduleId,
    protocol::{ScheduleRecord, SchedulePatch},
};
use tokio::sync::Mutex;

use crate::{check_revision, BackingStore, StoreError};

/// Process-local store, used by tests and single-process demos.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ScheduleId, ScheduleRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ScheduleRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    pub async fn create_schedule(&self, schedule_id: &ScheduleId, has_chat: bool) -> ScheduleRecord {
        let mut guard = self.records.lock().await;
        guard
            .entry(schedule_id.clone())
            .or_insert_with(|| ScheduleRecord::new(schedule_id.clone(), has_chat))
            .clone()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, schedule_id: &ScheduleId) -> Result<ScheduleRecord, StoreError> {
        self.records
            .lock()
            .await
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(schedule_id.clone()))
    }

    async fn update(
        &self,
        schedule_id: &ScheduleId,
        patch: SchedulePatch,
    ) -> Result<u64, StoreError> {
        let mut guard = self.records.lock().await;
        let record = guard
            .get_mut(schedule_id)
            .ok_or_else(|| StoreError::NotFound(schedule_id.clone()))?;
        check_revision(schedule_id, record.revision, &patch)?;
        record.apply(patch);
        record.revision += 1;
        Ok(record.revision)
    }
}
