//! Relay request construction.
//!
//! A [`MultipartRequest`] is a plain value: the parts are fully materialized
//! (file bytes included) so the same request can be inspected in tests and
//! turned into a fresh `reqwest` form for every send attempt.

use reqwest::multipart::{Form, Part};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::attachments::ResolvedAttachment;
use crate::fields::SubmissionFields;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("No attachment could be read, nothing to send")]
    NoAttachments,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartBody {
    Text(String),
    File {
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPart {
    pub name: String,
    pub body: PartBody,
}

impl RequestPart {
    fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: PartBody::Text(value.into()),
        }
    }
}

/// Options taken from the relay configuration
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Also send the configured sub-key names as `doc_id_key` / `doc_type_key`
    pub send_key_names: bool,
    pub doc_id_key: String,
    pub doc_type_key: String,
}

/// Ordered multipart body for one relay call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartRequest {
    parts: Vec<RequestPart>,
    attachments: Vec<ResolvedAttachment>,
}

impl MultipartRequest {
    pub fn parts(&self) -> &[RequestPart] {
        &self.parts
    }

    pub fn part_names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    /// Value of a text part
    pub fn text(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|p| match &p.body {
            PartBody::Text(value) if p.name == name => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn file_count(&self) -> usize {
        self.attachments.len()
    }

    /// Attachments that made it into the body, in part order
    pub fn attachments(&self) -> &[ResolvedAttachment] {
        &self.attachments
    }

    /// Fresh multipart form with the parts in order
    pub fn to_form(&self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for part in &self.parts {
            form = match &part.body {
                PartBody::Text(value) => form.text(part.name.clone(), value.clone()),
                PartBody::File {
                    file_name,
                    mime,
                    bytes,
                } => {
                    let file_part = Part::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime)?;
                    form.part(part.name.clone(), file_part)
                }
            };
        }
        Ok(form)
    }
}

/// Build the relay request for one submission.
///
/// File parts are numbered from 0 in attachment order. An attachment that can
/// no longer be read is skipped without leaving a gap in the numbering.
pub async fn build(
    fields: &SubmissionFields,
    attachments: &[ResolvedAttachment],
    options: &RequestOptions,
) -> Result<MultipartRequest, BuildError> {
    let mut parts = vec![
        RequestPart::text("name", fields.name.as_str()),
        RequestPart::text("date_of_birth", fields.date_of_birth.as_str()),
        RequestPart::text("email", fields.email.as_str()),
    ];

    if options.send_key_names {
        if !options.doc_id_key.is_empty() {
            parts.push(RequestPart::text("doc_id_key", options.doc_id_key.as_str()));
        }
        if !options.doc_type_key.is_empty() {
            parts.push(RequestPart::text("doc_type_key", options.doc_type_key.as_str()));
        }
    }

    let mut included = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let bytes = match tokio::fs::read(&attachment.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "Skipping attachment {}: {}",
                    attachment.path.display(),
                    e
                );
                continue;
            }
        };

        let index = included.len();
        parts.push(RequestPart {
            name: format!("file_{}", index),
            body: PartBody::File {
                file_name: file_name_of(&attachment.path),
                mime: mime_guess::from_path(&attachment.path)
                    .first_or_octet_stream()
                    .to_string(),
                bytes,
            },
        });
        parts.push(RequestPart::text(
            format!("description_{}", index),
            attachment.document_type.as_str(),
        ));
        included.push(attachment.clone());
    }

    if included.is_empty() {
        return Err(BuildError::NoAttachments);
    }

    debug!("Built relay request with {} file parts", included.len());
    Ok(MultipartRequest {
        parts,
        attachments: included,
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
