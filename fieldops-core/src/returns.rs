//! Warehouse return confirmation with photo evidence.

use crate::error::{FieldOpsResult, ValidationError};
use crate::identity::Timestamp;
use crate::ports::{Clock, PhotoStore, ReturnStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_RETURN_PHOTOS: usize = 5;
pub const RETURN_PHOTO_BUCKET: &str = "evidencias";
pub const CONFIRMED_STATUS: &str = "confirmada";
pub const CONFIRMED_SOURCE: &str = "mobile";
const RETURNS_RESOURCE: &str = "devoluciones_bodega";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub key: String,
    pub status: Option<String>,
    /// Raw shipment-group field; see [`parse_sg_codes`].
    pub sg: Option<String>,
    pub photo_url: Option<String>,
    pub extra_photo_urls: Vec<String>,
    pub confirmed_at: Option<Timestamp>,
    pub confirmed_source: Option<String>,
}

impl ReturnRecord {
    pub fn sg_codes(&self) -> Vec<String> {
        self.sg.as_deref().map(parse_sg_codes).unwrap_or_default()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.as_deref() == Some(CONFIRMED_STATUS)
    }
}

/// Update written when a return is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnConfirmation {
    pub status: String,
    pub photo_url: String,
    pub extra_photo_urls: Vec<String>,
    pub confirmed_at: Timestamp,
    pub confirmed_source: String,
}

/// A staged photo waiting for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub label: String,
    pub bytes: Vec<u8>,
}

/// Shipment-group codes: a JSON list, or comma-separated text as fallback.
pub fn parse_sg_codes(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Ok(_) => Vec::new(),
        Err(_) => trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// Object name for the `index`-th evidence photo of `key`.
pub fn evidence_file_name(key: &str, unix_millis: i64, index: usize) -> String {
    let compact: String = key.chars().filter(|c| !c.is_whitespace()).collect();
    format!("dev_{}_{}_{}.jpg", unix_millis, index, compact)
}

/// Lookup and confirmation workflow for one return record at a time.
pub struct ReturnDesk {
    store: Arc<dyn ReturnStore>,
    photos: Arc<dyn PhotoStore>,
    clock: Arc<dyn Clock>,
    record: Option<ReturnRecord>,
    staged: Vec<PhotoUpload>,
}

impl ReturnDesk {
    pub fn new(store: Arc<dyn ReturnStore>, photos: Arc<dyn PhotoStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            photos,
            clock,
            record: None,
            staged: Vec::new(),
        }
    }

    pub fn record(&self) -> Option<&ReturnRecord> {
        self.record.as_ref()
    }

    pub fn staged(&self) -> &[PhotoUpload] {
        &self.staged
    }

    pub async fn lookup(&mut self, key: &str) -> FieldOpsResult<&ReturnRecord> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "route_key".to_string(),
            }
            .into());
        }
        match self.store.find_return(key).await? {
            Some(record) => Ok(self.record.insert(record)),
            None => {
                self.record = None;
                Err(ValidationError::RecordNotFound {
                    resource: RETURNS_RESOURCE.to_string(),
                    key: key.to_string(),
                }
                .into())
            }
        }
    }

    pub fn stage_photo(&mut self, photo: PhotoUpload) -> Result<usize, ValidationError> {
        if self.staged.len() >= MAX_RETURN_PHOTOS {
            return Err(ValidationError::PhotoLimit {
                max: MAX_RETURN_PHOTOS,
            });
        }
        self.staged.push(photo);
        Ok(self.staged.len())
    }

    pub fn unstage_photo(&mut self, index: usize) -> Option<PhotoUpload> {
        (index < self.staged.len()).then(|| self.staged.remove(index))
    }

    /// Upload every staged photo, then mark the record confirmed.
    ///
    /// Any upload failure aborts before the record is touched.
    pub async fn confirm(&mut self) -> FieldOpsResult<usize> {
        let key = match &self.record {
            Some(record) => record.key.clone(),
            None => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: "route_key".to_string(),
                }
                .into())
            }
        };
        if self.staged.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "photo".to_string(),
            }
            .into());
        }

        let stamp = self.clock.now().timestamp_millis();
        let mut urls = Vec::with_capacity(self.staged.len());
        for (index, photo) in self.staged.iter().enumerate() {
            let name = evidence_file_name(&key, stamp, index);
            let url = self
                .photos
                .upload(RETURN_PHOTO_BUCKET, &name, crate::chat::PHOTO_CONTENT_TYPE, photo.bytes.clone())
                .await?;
            urls.push(url);
        }

        let mut urls = urls.into_iter();
        let photo_url = urls.next().unwrap_or_default();
        let confirmation = ReturnConfirmation {
            status: CONFIRMED_STATUS.to_string(),
            photo_url,
            extra_photo_urls: urls.collect(),
            confirmed_at: self.clock.now(),
            confirmed_source: CONFIRMED_SOURCE.to_string(),
        };
        self.store.confirm_return(&key, &confirmation).await?;

        let count = self.staged.len();
        self.staged.clear();
        tracing::info!(key = %key, photos = count, "Return confirmed");

        if let Ok(Some(record)) = self.store.find_return(&key).await {
            self.record = Some(record);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldOpsError;
    use crate::memory::{FixedClock, MemoryPhotoStore, MemoryReturnStore};
    use chrono::{TimeZone, Utc};

    fn record(key: &str) -> ReturnRecord {
        ReturnRecord {
            key: key.to_string(),
            status: Some("pendiente".to_string()),
            sg: Some("[\"SG1\",\"SG2\"]".to_string()),
            photo_url: None,
            extra_photo_urls: Vec::new(),
            confirmed_at: None,
            confirmed_source: None,
        }
    }

    fn desk(store: Arc<MemoryReturnStore>, photos: Arc<MemoryPhotoStore>) -> ReturnDesk {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 13, 0, 0).unwrap());
        ReturnDesk::new(store, photos, Arc::new(clock))
    }

    fn photo(n: u8) -> PhotoUpload {
        PhotoUpload {
            label: format!("photo-{}.jpg", n),
            bytes: vec![n; 4],
        }
    }

    #[test]
    fn test_parse_sg_codes_json_and_csv() {
        assert_eq!(parse_sg_codes("[\"A\", 12]"), vec!["A", "12"]);
        assert_eq!(parse_sg_codes("A, B,,C "), vec!["A", "B", "C"]);
        assert!(parse_sg_codes("  ").is_empty());
    }

    #[test]
    fn test_evidence_file_name_strips_whitespace() {
        assert_eq!(evidence_file_name("R 12 A", 99, 2), "dev_99_2_R12A.jpg");
    }

    #[tokio::test]
    async fn test_lookup_missing_record() {
        let mut desk = desk(Arc::new(MemoryReturnStore::new()), Arc::new(MemoryPhotoStore::new("https://x.test")));
        let err = desk.lookup("R-1").await.unwrap_err();
        assert!(matches!(
            err,
            FieldOpsError::Validation(ValidationError::RecordNotFound { .. })
        ));
        assert!(desk.record().is_none());
    }

    #[tokio::test]
    async fn test_photo_limit() {
        let mut desk = desk(Arc::new(MemoryReturnStore::new()), Arc::new(MemoryPhotoStore::new("https://x.test")));
        for n in 0..MAX_RETURN_PHOTOS {
            desk.stage_photo(photo(n as u8)).unwrap();
        }
        assert!(matches!(
            desk.stage_photo(photo(9)),
            Err(ValidationError::PhotoLimit { max: MAX_RETURN_PHOTOS })
        ));
        assert!(desk.unstage_photo(0).is_some());
        assert!(desk.unstage_photo(10).is_none());
    }

    #[tokio::test]
    async fn test_confirm_uploads_then_updates() {
        let store = Arc::new(MemoryReturnStore::new());
        store.insert(record("R-1"));
        let photos = Arc::new(MemoryPhotoStore::new("https://x.test"));
        let mut desk = desk(store.clone(), photos.clone());

        assert_eq!(desk.lookup(" R-1 ").await.unwrap().sg_codes(), vec!["SG1", "SG2"]);
        assert!(desk.confirm().await.is_err());

        desk.stage_photo(photo(1)).unwrap();
        desk.stage_photo(photo(2)).unwrap();
        assert_eq!(desk.confirm().await.unwrap(), 2);

        let saved = store.get("R-1").unwrap();
        assert!(saved.is_confirmed());
        assert_eq!(saved.confirmed_source.as_deref(), Some(CONFIRMED_SOURCE));
        assert!(saved.photo_url.unwrap().ends_with("dev_1792414800000_0_R-1.jpg"));
        assert_eq!(saved.extra_photo_urls.len(), 1);
        assert!(desk.staged().is_empty());
        assert!(desk.record().unwrap().is_confirmed());
        assert_eq!(photos.uploads().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_record_untouched() {
        let store = Arc::new(MemoryReturnStore::new());
        store.insert(record("R-2"));
        let photos = Arc::new(MemoryPhotoStore::new("https://x.test"));
        photos.fail_after(1);
        let mut desk = desk(store.clone(), photos);

        desk.lookup("R-2").await.unwrap();
        desk.stage_photo(photo(1)).unwrap();
        desk.stage_photo(photo(2)).unwrap();
        assert!(desk.confirm().await.is_err());

        assert!(!store.get("R-2").unwrap().is_confirmed());
        assert_eq!(desk.staged().len(), 2);
    }
}
