//! Typed view over the upload `metadata` blob.
//!
//! The blob is written by the backend parsing pipeline and its shape drifts
//! between pipeline versions. Every field is read on its own, so a missing
//! key or a value of the wrong type leaves that field empty instead of
//! failing the whole upload.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadMetadata {
    pub confidence_score: Option<f64>,
    pub parsing_method: Option<String>,
    pub missing_dates: MissingDates,
    pub duplicate_detection: Option<DuplicateDetection>,
    pub parsing_warnings: Option<ParsingWarnings>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MissingDates {
    pub flagged: bool,
    pub count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateDetection {
    pub duplicates_found: Option<u64>,
    pub products_flagged: Vec<String>,
    pub pending_review: Option<u64>,
    pub auto_merged: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsingWarnings {
    pub skipped_rows: Option<u64>,
    pub row_errors: Vec<RowError>,
    pub ai_repair: AiRepair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AiRepair {
    #[default]
    NotAttempted,
    Succeeded,
    Failed,
}

impl UploadMetadata {
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let confidence_score = obj
            .get("confidence_score")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite());

        let parsing_method = obj
            .get("parsing_method")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        let missing_dates = MissingDates {
            flagged: obj
                .get("_missing_dates")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            count: obj.get("_records_missing_dates").and_then(as_count),
        };

        Self {
            confidence_score,
            parsing_method,
            missing_dates,
            duplicate_detection: obj
                .get("duplicate_detection")
                .and_then(DuplicateDetection::from_value),
            parsing_warnings: obj
                .get("parsing_warnings")
                .and_then(ParsingWarnings::from_value),
        }
    }

    pub fn confidence_level(&self) -> Option<ConfidenceLevel> {
        self.confidence_score.map(|score| {
            if score >= 0.8 {
                ConfidenceLevel::High
            } else if score >= 0.5 {
                ConfidenceLevel::Medium
            } else {
                ConfidenceLevel::Low
            }
        })
    }

    /// True when the pipeline flagged undated rows and at least one remains.
    pub fn has_missing_dates(&self) -> bool {
        self.missing_dates.flagged && self.missing_dates.count != Some(0)
    }
}

impl DuplicateDetection {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            duplicates_found: obj.get("duplicates_found").and_then(as_count),
            products_flagged: obj
                .get("products_flagged")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            pending_review: obj.get("pending_review").and_then(as_count),
            auto_merged: obj.get("auto_merged").and_then(as_count),
        })
    }
}

impl ParsingWarnings {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let row_errors = obj
            .get("row_errors")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(RowError::from_value).collect())
            .unwrap_or_default();

        let attempted = obj
            .get("ai_repair_attempted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let succeeded = obj
            .get("ai_repair_succeeded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let ai_repair = match (attempted, succeeded) {
            (false, _) => AiRepair::NotAttempted,
            (true, true) => AiRepair::Succeeded,
            (true, false) => AiRepair::Failed,
        };

        Some(Self {
            skipped_rows: obj.get("skipped_rows").and_then(as_count),
            row_errors,
            ai_repair,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.skipped_rows.unwrap_or(0) == 0
            && self.row_errors.is_empty()
            && self.ai_repair == AiRepair::NotAttempted
    }
}

impl RowError {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self {
                row: None,
                message: s.clone(),
            }),
            Value::Object(obj) => {
                let message = obj
                    .get("message")
                    .or_else(|| obj.get("error"))
                    .and_then(Value::as_str)?;
                Some(Self {
                    row: obj.get("row").and_then(as_count),
                    message: message.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Counts arrive as integers, floats or numeric strings depending on the
/// pipeline stage that wrote them.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
