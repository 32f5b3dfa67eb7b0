use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::services::error::{PipelineError, SkipReason};

/// Identifies a single object inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Same bucket, different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            bucket: self.bucket.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// The newly written object that triggered an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingEvent {
    pub source: ObjectRef,
}

impl ProcessingEvent {
    pub fn new(source: ObjectRef) -> Self {
        Self { source }
    }
}

/// Bucket notification as delivered by S3 and MinIO.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BucketNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,
    pub s3: NotificationEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationEntity {
    pub bucket: NotificationBucket,
    pub object: NotificationObject,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationBucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationObject {
    /// Object key, form-URL-encoded by the notifying service.
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TryFrom<&BucketNotification> for ProcessingEvent {
    type Error = PipelineError;

    /// Only the first record is processed.
    fn try_from(notification: &BucketNotification) -> Result<Self, Self::Error> {
        let record = notification
            .records
            .first()
            .ok_or_else(|| PipelineError::InvalidEvent("notification has no records".into()))?;

        if notification.records.len() > 1 {
            tracing::warn!(
                "Notification carries {} records, processing only the first",
                notification.records.len()
            );
        }

        if record.s3.bucket.name.is_empty() || record.s3.object.key.is_empty() {
            return Err(PipelineError::InvalidEvent(
                "record is missing bucket name or object key".into(),
            ));
        }

        Ok(ProcessingEvent::new(ObjectRef::new(
            record.s3.bucket.name.clone(),
            record.s3.object.key.clone(),
        )))
    }
}

/// Descriptor of a stored derivative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub parts: u32,
    /// Hex encoded SHA-256 of the uploaded bytes.
    pub checksum: String,
    pub e_tag: Option<String>,
}

/// Terminal state of one invocation.
#[derive(Debug)]
pub enum Outcome {
    Uploaded(UploadResult),
    Skipped(SkipReason),
    Failed(PipelineError),
}

impl Outcome {
    /// Uploaded and skipped invocations both count as success for the host.
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Uploaded(_) => "uploaded",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "failed",
        }
    }
}
