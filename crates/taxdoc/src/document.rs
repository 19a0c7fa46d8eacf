//! The `Document` aggregate and its processing status machine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Confidence assigned when the model supplies a value without a score.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Confidence assigned to fields reconstructed line-by-line from an unparseable reply.
pub const DEGRADED_CONFIDENCE: f64 = 0.3;

/// Confidence of a value confirmed by a human editor.
pub const HUMAN_CONFIDENCE: f64 = 1.0;

/// The closed set of supported tax forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "W-2")]
    W2,
    #[serde(rename = "1099")]
    Form1099,
    #[serde(rename = "1040")]
    Form1040,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::W2,
        DocumentType::Form1099,
        DocumentType::Form1040,
        DocumentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::W2 => "W-2",
            DocumentType::Form1099 => "1099",
            DocumentType::Form1040 => "1040",
            DocumentType::Other => "Other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported document type '{0}' (expected one of W-2, 1099, 1040, Other)")]
pub struct UnknownDocumentType(pub String);

impl FromStr for DocumentType {
    type Err = UnknownDocumentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "W-2" | "W2" | "w-2" | "w2" => Ok(DocumentType::W2),
            "1099" => Ok(DocumentType::Form1099),
            "1040" => Ok(DocumentType::Form1040),
            "Other" | "other" => Ok(DocumentType::Other),
            other => Err(UnknownDocumentType(other.to_string())),
        }
    }
}

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }

    /// The complete transition table. `Processing -> Processing` is the
    /// degenerate reprocess case and is only reachable once the previous
    /// pass has released its per-document slot.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Completed, Processing)
                | (Error, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Error)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

/// A single extracted datum with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    pub confidence: f64,
    pub field: String,
}

impl FieldValue {
    /// Builds a field, clamping the confidence into `[0, 1]`.
    /// A non-finite confidence falls back to [`DEFAULT_CONFIDENCE`].
    pub fn new(field: impl Into<String>, value: impl Into<String>, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE
        };
        Self {
            value: value.into(),
            confidence,
            field: field.into(),
        }
    }

    /// A value confirmed by a human editor.
    pub fn human(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, value, HUMAN_CONFIDENCE)
    }
}

/// Dynamic field name -> value map. Ordering carries no meaning; a sorted
/// map keeps serialized output stable.
pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub file_size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Aggregate root of the processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub owner: String,
    pub original_file_name: String,
    pub storage_key: String,
    pub storage_location: String,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub extracted_fields: FieldMap,
    pub ai_feedback: String,
    /// Empty means "use the default instruction for the document type".
    pub custom_instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub metadata: DocumentMetadata,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to create a document in the `uploaded` state.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner: String,
    pub original_file_name: String,
    pub storage_key: String,
    pub storage_location: String,
    pub document_type: DocumentType,
    pub custom_instruction: String,
    pub file_size_bytes: u64,
}

impl Document {
    pub fn create(new: NewDocument, now: DateTime<Utc>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), new, now)
    }

    pub fn with_id(id: String, new: NewDocument, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner: new.owner,
            original_file_name: new.original_file_name,
            storage_key: new.storage_key,
            storage_location: new.storage_location,
            document_type: new.document_type,
            status: DocumentStatus::Uploaded,
            extracted_fields: FieldMap::new(),
            ai_feedback: String::new(),
            custom_instruction: new.custom_instruction,
            processing_time_ms: None,
            error_message: None,
            metadata: DocumentMetadata {
                file_size_bytes: new.file_size_bytes,
                uploaded_at: now,
                last_processed_at: None,
            },
            updated_at: now,
        }
    }

    fn transition(&mut self, to: DocumentStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Enters `processing`. Prior results stay in place until a new pass completes.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Processing, now)
    }

    /// Records a successful pass. `processing_time_ms` measures from upload,
    /// not from the start of this pass.
    pub fn complete(
        &mut self,
        fields: FieldMap,
        ai_feedback: String,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Completed, now)?;
        self.extracted_fields = fields;
        self.ai_feedback = ai_feedback;
        self.processing_time_ms = Some(
            (now - self.metadata.uploaded_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.error_message = None;
        self.metadata.last_processed_at = Some(now);
        Ok(())
    }

    /// Records a failed pass. Previous fields and feedback are retained.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Error, now)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Merges human corrections; every touched field is pinned to confidence 1.0.
    /// Status is left unchanged.
    pub fn apply_edits<I, K, V>(&mut self, edits: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in edits {
            let name = name.into();
            let field = FieldValue::human(name.clone(), value);
            self.extracted_fields.insert(name, field);
        }
        self.updated_at = now;
    }

    /// The instruction override, if one is set.
    pub fn instruction_override(&self) -> Option<&str> {
        let trimmed = self.custom_instruction.trim();
        (!trimmed.is_empty()).then_some(self.custom_instruction.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_doc() -> Document {
        Document::create(
            NewDocument {
                owner: "owner-1".to_string(),
                original_file_name: "w2.pdf".to_string(),
                storage_key: "documents/owner-1/abc.pdf".to_string(),
                storage_location: "/tmp/blobs/documents/owner-1/abc.pdf".to_string(),
                document_type: DocumentType::W2,
                custom_instruction: String::new(),
                file_size_bytes: 1024,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_document_type_parsing() {
        assert_eq!("W-2".parse::<DocumentType>().unwrap(), DocumentType::W2);
        assert_eq!("1099".parse::<DocumentType>().unwrap(), DocumentType::Form1099);
        assert_eq!("1040".parse::<DocumentType>().unwrap(), DocumentType::Form1040);
        assert_eq!("Other".parse::<DocumentType>().unwrap(), DocumentType::Other);
        assert!("W-4".parse::<DocumentType>().is_err());
    }

    #[test]
    fn test_document_type_serde_labels() {
        let json = serde_json::to_string(&DocumentType::W2).unwrap();
        assert_eq!(json, "\"W-2\"");
        let parsed: DocumentType = serde_json::from_str("\"1099\"").unwrap();
        assert_eq!(parsed, DocumentType::Form1099);
    }

    #[test]
    fn test_transition_table() {
        use DocumentStatus::*;
        let all = [Uploaded, Processing, Completed, Error];
        let legal = [
            (Uploaded, Processing),
            (Completed, Processing),
            (Error, Processing),
            (Processing, Processing),
            (Processing, Completed),
            (Processing, Error),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut doc = new_doc();
        let err = doc
            .complete(FieldMap::new(), String::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err.from, DocumentStatus::Uploaded);
        assert_eq!(doc.status, DocumentStatus::Uploaded);
    }

    #[test]
    fn test_complete_measures_from_upload() {
        let mut doc = new_doc();
        let uploaded = doc.metadata.uploaded_at;
        doc.begin_processing(uploaded + Duration::seconds(5)).unwrap();
        doc.complete(
            FieldMap::new(),
            "raw".to_string(),
            uploaded + Duration::seconds(7),
        )
        .unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.processing_time_ms, Some(7000));
        assert_eq!(doc.metadata.last_processed_at, Some(uploaded + Duration::seconds(7)));
    }

    #[test]
    fn test_fail_keeps_previous_results() {
        let mut doc = new_doc();
        let now = Utc::now();
        doc.begin_processing(now).unwrap();
        let mut fields = FieldMap::new();
        fields.insert("wages".into(), FieldValue::new("wages", "50000", 0.9));
        doc.complete(fields, "first".into(), now).unwrap();

        doc.begin_processing(now).unwrap();
        doc.fail("model unreachable", now).unwrap();

        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.error_message.as_deref(), Some("model unreachable"));
        assert_eq!(doc.extracted_fields["wages"].value, "50000");
        assert_eq!(doc.ai_feedback, "first");
    }

    #[test]
    fn test_success_clears_error_message() {
        let mut doc = new_doc();
        let now = Utc::now();
        doc.begin_processing(now).unwrap();
        doc.fail("boom", now).unwrap();
        doc.begin_processing(now).unwrap();
        doc.complete(FieldMap::new(), String::new(), now).unwrap();
        assert!(doc.error_message.is_none());
    }

    #[test]
    fn test_apply_edits_pins_confidence() {
        let mut doc = new_doc();
        doc.extracted_fields
            .insert("wages".into(), FieldValue::new("wages", "50000", 0.5));
        doc.extracted_fields
            .insert("employer".into(), FieldValue::new("employer", "Acme", 0.8));

        doc.apply_edits([("wages", "60000")], Utc::now());

        assert_eq!(doc.extracted_fields["wages"].value, "60000");
        assert_eq!(doc.extracted_fields["wages"].confidence, 1.0);
        assert_eq!(doc.extracted_fields["employer"].confidence, 0.8);
        assert_eq!(doc.status, DocumentStatus::Uploaded);
    }

    #[test]
    fn test_field_value_clamps_confidence() {
        assert_eq!(FieldValue::new("a", "b", 1.7).confidence, 1.0);
        assert_eq!(FieldValue::new("a", "b", -0.2).confidence, 0.0);
        assert_eq!(FieldValue::new("a", "b", f64::NAN).confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_instruction_override() {
        let mut doc = new_doc();
        assert!(doc.instruction_override().is_none());
        doc.custom_instruction = "   ".into();
        assert!(doc.instruction_override().is_none());
        doc.custom_instruction = "Only the EIN".into();
        assert_eq!(doc.instruction_override(), Some("Only the EIN"));
    }
}
