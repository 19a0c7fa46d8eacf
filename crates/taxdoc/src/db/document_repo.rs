//! Document repository: CRUD operations for the `documents` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::document::{
    Document, DocumentMetadata, DocumentStatus, DocumentType, FieldMap,
};

/// A raw document row from the database.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub owner: String,
    pub original_file_name: String,
    pub storage_key: String,
    pub storage_location: String,
    pub document_type: String,
    pub status: String,
    pub extracted_fields: String,
    pub ai_feedback: String,
    pub custom_instruction: String,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub file_size_bytes: i64,
    pub uploaded_at: String,
    pub last_processed_at: Option<String>,
    pub updated_at: String,
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner: row.get("owner")?,
            original_file_name: row.get("original_file_name")?,
            storage_key: row.get("storage_key")?,
            storage_location: row.get("storage_location")?,
            document_type: row.get("document_type")?,
            status: row.get("status")?,
            extracted_fields: row.get("extracted_fields")?,
            ai_feedback: row.get("ai_feedback")?,
            custom_instruction: row.get("custom_instruction")?,
            processing_time_ms: row.get("processing_time_ms")?,
            error_message: row.get("error_message")?,
            file_size_bytes: row.get("file_size_bytes")?,
            uploaded_at: row.get("uploaded_at")?,
            last_processed_at: row.get("last_processed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_document(doc: &Document) -> Result<Self, DatabaseError> {
        Ok(Self {
            id: doc.id.clone(),
            owner: doc.owner.clone(),
            original_file_name: doc.original_file_name.clone(),
            storage_key: doc.storage_key.clone(),
            storage_location: doc.storage_location.clone(),
            document_type: doc.document_type.as_str().to_string(),
            status: doc.status.as_str().to_string(),
            extracted_fields: serde_json::to_string(&doc.extracted_fields)?,
            ai_feedback: doc.ai_feedback.clone(),
            custom_instruction: doc.custom_instruction.clone(),
            processing_time_ms: doc.processing_time_ms.map(|ms| ms as i64),
            error_message: doc.error_message.clone(),
            file_size_bytes: doc.metadata.file_size_bytes as i64,
            uploaded_at: format_timestamp(&doc.metadata.uploaded_at),
            last_processed_at: doc.metadata.last_processed_at.as_ref().map(format_timestamp),
            updated_at: format_timestamp(&doc.updated_at),
        })
    }

    /// Unknown type labels become `Other`. An unknown status is a corrupt row.
    pub fn into_document(self) -> Result<Document, DatabaseError> {
        let id = self.id;
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: id.clone(),
            reason,
        };

        let document_type = self.document_type.parse().unwrap_or_else(|_| {
            log::warn!(
                "Unknown document type '{}' on document {}, treating as Other",
                self.document_type,
                id
            );
            DocumentType::Other
        });
        let status = DocumentStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let extracted_fields: FieldMap = serde_json::from_str(&self.extracted_fields)
            .map_err(|e| corrupt(format!("extracted_fields: {}", e)))?;

        let parse_ts = |value: &str, column: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("{}: {}", column, e)))
        };
        let uploaded_at = parse_ts(&self.uploaded_at, "uploaded_at")?;
        let updated_at = parse_ts(&self.updated_at, "updated_at")?;
        let last_processed_at = match self.last_processed_at.as_deref() {
            Some(value) => Some(parse_ts(value, "last_processed_at")?),
            None => None,
        };

        Ok(Document {
            id: id.clone(),
            owner: self.owner,
            original_file_name: self.original_file_name,
            storage_key: self.storage_key,
            storage_location: self.storage_location,
            document_type,
            status,
            extracted_fields,
            ai_feedback: self.ai_feedback,
            custom_instruction: self.custom_instruction,
            processing_time_ms: self.processing_time_ms.map(|ms| ms.max(0) as u64),
            error_message: self.error_message,
            metadata: DocumentMetadata {
                file_size_bytes: self.file_size_bytes.max(0) as u64,
                uploaded_at,
                last_processed_at,
            },
            updated_at,
        })
    }
}

/// Query filter parameters for document listing.
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub owner: Option<String>,
    pub status: Option<DocumentStatus>,
    pub document_type: Option<DocumentType>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new document row.
pub fn insert(db: &Database, doc: &Document) -> Result<(), DatabaseError> {
    let row = DocumentRow::from_document(doc)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, owner, original_file_name, storage_key, storage_location,
             document_type, status, extracted_fields, ai_feedback, custom_instruction,
             processing_time_ms, error_message, file_size_bytes, uploaded_at, last_processed_at,
             updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                row.id,
                row.owner,
                row.original_file_name,
                row.storage_key,
                row.storage_location,
                row.document_type,
                row.status,
                row.extracted_fields,
                row.ai_feedback,
                row.custom_instruction,
                row.processing_time_ms,
                row.error_message,
                row.file_size_bytes,
                row.uploaded_at,
                row.last_processed_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a document by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Document>, DatabaseError> {
    db.with_conn(|conn| select_by_id(conn, id))
}

/// Loads, mutates and writes back one document in a single transaction.
///
/// `Ok(None)` when the document does not exist. If `mutate` fails nothing is
/// written.
pub fn modify<F, T, E>(db: &Database, id: &str, mutate: F) -> Result<Option<(Document, T)>, E>
where
    F: FnOnce(&mut Document) -> Result<T, E>,
    E: From<DatabaseError>,
{
    db.write_transaction(|tx| {
        let Some(mut doc) = select_by_id(tx, id)? else {
            return Ok(None);
        };
        let value = mutate(&mut doc)?;
        if !write_mutable(tx, &doc)? {
            return Ok(None);
        }
        Ok(Some((doc, value)))
    })
}

fn select_by_id(conn: &Connection, id: &str) -> Result<Option<Document>, DatabaseError> {
    let mut stmt = conn.prepare_cached("SELECT * FROM documents WHERE id = ?1")?;
    let row = stmt
        .query_row(params![id], DocumentRow::from_row)
        .optional()?;
    row.map(DocumentRow::into_document).transpose()
}

/// Identity, owner, blob reference and upload metadata are fixed at insert
/// and never rewritten. Returns false if no row matched.
fn write_mutable(conn: &Connection, doc: &Document) -> Result<bool, DatabaseError> {
    let row = DocumentRow::from_document(doc)?;
    let changed = conn.execute(
        "UPDATE documents SET status=?2, extracted_fields=?3, ai_feedback=?4,
         custom_instruction=?5, processing_time_ms=?6, error_message=?7,
         last_processed_at=?8, updated_at=?9
         WHERE id=?1",
        params![
            row.id,
            row.status,
            row.extracted_fields,
            row.ai_feedback,
            row.custom_instruction,
            row.processing_time_ms,
            row.error_message,
            row.last_processed_at,
            row.updated_at,
        ],
    )?;
    Ok(changed > 0)
}

/// Deletes a document row. Returns false if it did not exist.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Queries documents with filters, newest upload first, returning
/// (documents, total_count).
pub fn query(
    db: &Database,
    filter: &DocumentFilter,
) -> Result<(Vec<Document>, u64), DatabaseError> {
    let (rows, total) = db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref owner) = filter.owner {
            conditions.push(format!("owner = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(document_type) = filter.document_type {
            conditions.push(format!("document_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(document_type.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM documents {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM documents {} ORDER BY uploaded_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<DocumentRow> = stmt
            .query_map(params_ref.as_slice(), DocumentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })?;

    let docs = rows
        .into_iter()
        .map(DocumentRow::into_document)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((docs, total))
}

/// Documents in `processing` whose last write is older than `cutoff`.
pub fn find_stale_processing(
    db: &Database,
    cutoff: &DateTime<Utc>,
) -> Result<Vec<Document>, DatabaseError> {
    let cutoff = format_timestamp(cutoff);
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM documents WHERE status = ?1 AND updated_at < ?2 ORDER BY updated_at",
        )?;
        let rows = stmt
            .query_map(
                params![DocumentStatus::Processing.as_str(), cutoff],
                DocumentRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter().map(DocumentRow::into_document).collect()
}

/// Counts documents with the given status.
pub fn count_by_status(db: &Database, status: DocumentStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
