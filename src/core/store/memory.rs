use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use super::{DataId, DetectionRecord, DetectionRepository, NewDetection, StoreError, merge_corrected};
use crate::models::LineSet;

/// In-process store. Records live as long as the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<DataId, DetectionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl DetectionRepository for MemoryStore {
    async fn create(&self, detection: NewDetection) -> Result<DetectionRecord, StoreError> {
        let record = detection.into_record();
        self.records
            .write()
            .await
            .insert(record.data_id, record.clone());
        debug!("Stored detection {}", record.data_id);
        Ok(record)
    }

    async fn get(&self, id: &DataId) -> Result<DetectionRecord, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn update_lines(&self, id: &DataId, lines: LineSet) -> Result<DetectionRecord, StoreError> {
        // The write guard is the store-wide lock; readers see the old or the new mapping
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        record.lines = merge_corrected(&record.lines, lines);
        record.updated_at = OffsetDateTime::now_utc();
        debug!("Corrected lines of detection {}", id);
        Ok(record.clone())
    }
}
