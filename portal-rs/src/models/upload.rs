use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Nullable columns come back as `null`, which `#[serde(default)]` alone
/// does not cover.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Processing,
    Completed,
    Failed,
    NeedsReview,
    NeedsProductReview,
    /// A status this service does not know yet.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub filename: String,
    #[serde(default)]
    pub file_size: Option<i64>,
    pub status: UploadStatus,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub distributor_id: Option<Uuid>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_reprocessable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reprocessed_count: i32,
    /// Backend-defined; read through `UploadMetadata::from_value`.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distributor {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Outcome reported by the upload services (reprocess, delete, date
/// assignment, duplicate resolution).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServiceOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignDatesRequest {
    #[serde(rename = "reportDate")]
    pub report_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateDecision {
    Merge,
    KeepSeparate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateResolution {
    #[serde(rename = "productName")]
    pub product_name: String,
    #[serde(rename = "canonicalName")]
    pub canonical_name: Option<String>,
    pub decision: DuplicateDecision,
}

#[derive(Debug, Deserialize)]
pub struct ResolveDuplicatesRequest {
    pub resolutions: Vec<DuplicateResolution>,
}
