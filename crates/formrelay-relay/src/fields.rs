//! Field mapping: from a raw submission payload to typed submission fields.

use formrelay_core::{sanitize_email, sanitize_text_field, FieldMappings};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::SubmissionPayload;

/// The files location exists but cannot be read as a list of entries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("Files field '{key}' holds {found}, expected a list of attachments")]
    FilesNotList { key: String, found: &'static str },
}

/// Why one files entry could not be turned into an attachment reference
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Attachment entry is {found}, expected an object")]
    NotAnObject { found: &'static str },

    #[error("No sub-key configured for {0}")]
    UnmappedKey(&'static str),

    #[error("Attachment entry has no '{0}' key")]
    MissingKey(String),

    #[error("Invalid file id: {0}")]
    InvalidFileId(String),

    #[error("Document type is {found}, expected text")]
    InvalidDocumentType { found: &'static str },
}

/// Values extracted for one submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionFields {
    pub name: String,
    pub date_of_birth: String,
    pub email: String,
    /// Raw attachment entries, in submission order
    pub files: Vec<Value>,
}

/// One attachment entry of the files list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReference {
    pub file_id: i64,
    pub document_type: String,
}

/// Extract the mapped fields from a payload.
///
/// Unmapped or absent fields degrade to empty values. The only failure is a
/// files location that is present but neither a list nor a keyed map of rows.
pub fn extract(
    mappings: &FieldMappings,
    payload: &SubmissionPayload,
) -> Result<SubmissionFields, MappingError> {
    let name = scalar_field(payload, &mappings.name, "name")
        .map(|v| sanitize_text_field(&v))
        .unwrap_or_default();
    let date_of_birth = scalar_field(payload, &mappings.date_of_birth, "date_of_birth")
        .map(|v| sanitize_text_field(&v))
        .unwrap_or_default();
    let email = scalar_field(payload, &mappings.email, "email")
        .map(|v| sanitize_email(&v))
        .unwrap_or_default();

    let files = files_field(payload, &mappings.files)?;

    debug!(
        "Extracted fields: name='{}', date_of_birth='{}', email='{}', {} file entries",
        name,
        date_of_birth,
        email,
        files.len()
    );

    Ok(SubmissionFields {
        name,
        date_of_birth,
        email,
        files,
    })
}

/// Read one files entry through the configured id / type sub-keys
pub fn parse_reference(
    entry: &Value,
    id_key: &str,
    type_key: &str,
) -> Result<AttachmentReference, ReferenceError> {
    let Value::Object(entry) = entry else {
        return Err(ReferenceError::NotAnObject {
            found: json_type_name(entry),
        });
    };

    if id_key.is_empty() {
        return Err(ReferenceError::UnmappedKey("doc_id_key"));
    }
    if type_key.is_empty() {
        return Err(ReferenceError::UnmappedKey("doc_type_key"));
    }

    let raw_id = entry
        .get(id_key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ReferenceError::MissingKey(id_key.to_string()))?;
    let raw_type = entry
        .get(type_key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ReferenceError::MissingKey(type_key.to_string()))?;

    let file_id = parse_file_id(raw_id)?;
    let document_type = scalar_text(raw_type)
        .map(|t| sanitize_text_field(&t))
        .ok_or(ReferenceError::InvalidDocumentType {
            found: json_type_name(raw_type),
        })?;

    Ok(AttachmentReference {
        file_id,
        document_type,
    })
}

fn scalar_field(payload: &SubmissionPayload, key: &str, field: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let value = payload.get(key)?;
    let text = scalar_text(value);
    if text.is_none() && !value.is_null() {
        warn!(
            "Field '{}' (key '{}') holds {}, using an empty value",
            field,
            key,
            json_type_name(value)
        );
    }
    text
}

fn files_field(payload: &SubmissionPayload, key: &str) -> Result<Vec<Value>, MappingError> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    match payload.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries.clone()),
        Some(Value::Object(rows)) => Ok(rows.values().cloned().collect()),
        Some(other) => Err(MappingError::FilesNotList {
            key: key.to_string(),
            found: json_type_name(other),
        }),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_file_id(value: &Value) -> Result<i64, ReferenceError> {
    let id = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(ReferenceError::InvalidFileId(value.to_string())),
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
