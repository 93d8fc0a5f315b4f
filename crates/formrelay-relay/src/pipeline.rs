//! The submission pipeline: one "entry created" event in, at most one relay
//! call out.
//!
//! Stages run strictly in order: form identity check, field extraction,
//! files presence, per-item resolution, resolved presence, request build,
//! send. Every stage failure ends the run with a [`PipelineOutcome`]; nothing
//! is ever propagated back to the event source.

use chrono::Utc;
use formrelay_core::RelayConfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::attachments::{
    AttachmentIndex, AttachmentResolver, FixedModePermissions, ManifestAttachmentIndex,
    ManifestError, NoopPermissions, PermissionNormalizer, ResolvedAttachment,
};
use crate::client::{RelayClient, RelayClientError, RelayOutcome, RetryPolicy};
use crate::events::EntryCreated;
use crate::failures::{
    FailedRelay, FailedRelayStore, FailureReason, FailureStoreError, JsonlFailureStore,
};
use crate::fields::{self, MappingError, SubmissionFields};
use crate::request::{self, BuildError, RequestOptions};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Client(#[from] RelayClientError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Why a submission produced no relay call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    FormMismatch { expected: i64, actual: i64 },
    PayloadShape(MappingError),
    NoFiles,
    NoAttachmentsResolved { attempted: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FormMismatch { expected, actual } => {
                write!(f, "form {} is not the configured form {}", actual, expected)
            }
            SkipReason::PayloadShape(e) => write!(f, "unexpected payload shape: {}", e),
            SkipReason::NoFiles => write!(f, "submission has no files"),
            SkipReason::NoAttachmentsResolved { attempted } => {
                write!(f, "none of {} attachments could be resolved", attempted)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Skipped(SkipReason),
    Relayed {
        outcome: RelayOutcome,
        attempts: u32,
        attachments: usize,
    },
}

impl PipelineOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PipelineOutcome::Relayed { outcome, .. } if outcome.is_success())
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            PipelineOutcome::Relayed {
                outcome,
                attempts,
                attachments,
            } => match outcome {
                RelayOutcome::Completed { status, .. } => write!(
                    f,
                    "relayed {} attachments, HTTP {} after {} attempt(s)",
                    attachments, status, attempts
                ),
                RelayOutcome::TransportError(message) => write!(
                    f,
                    "relay of {} attachments failed after {} attempt(s): {}",
                    attachments, attempts, message
                ),
            },
        }
    }
}

/// Counters of one replay pass over the failure store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub delivered: usize,
    pub still_failing: usize,
}

pub struct SubmissionPipeline {
    config: Arc<RelayConfig>,
    resolver: AttachmentResolver,
    client: RelayClient,
    retry: RetryPolicy,
    failure_store: Option<Arc<dyn FailedRelayStore>>,
}

impl SubmissionPipeline {
    pub fn new(
        config: Arc<RelayConfig>,
        index: Arc<dyn AttachmentIndex>,
        permissions: Arc<dyn PermissionNormalizer>,
    ) -> Result<Self, PipelineError> {
        let client = RelayClient::new(
            config.relay_url.clone(),
            config.api_token.clone(),
            config.timeout,
        )?;
        let resolver = AttachmentResolver::new(config.attachment_dir(), index, permissions);
        let retry = RetryPolicy::from(&config.retry);

        Ok(Self {
            config,
            resolver,
            client,
            retry,
            failure_store: None,
        })
    }

    /// Pipeline wired from the configuration alone: manifest index,
    /// permission mode and failure log
    pub fn from_config(config: Arc<RelayConfig>) -> Result<Self, PipelineError> {
        let index: Arc<dyn AttachmentIndex> = match &config.attachment_manifest {
            Some(path) => Arc::new(ManifestAttachmentIndex::from_file(path)?),
            None => {
                warn!("No attachment manifest configured, no attachment will resolve");
                Arc::new(ManifestAttachmentIndex::default())
            }
        };
        let permissions: Arc<dyn PermissionNormalizer> = if config.normalize_permissions {
            Arc::new(FixedModePermissions::default())
        } else {
            Arc::new(NoopPermissions)
        };

        let failure_log = config.failed_relay_log.clone();
        let pipeline = Self::new(config, index, permissions)?;
        Ok(match failure_log {
            Some(path) => pipeline.with_failure_store(Arc::new(JsonlFailureStore::new(path))),
            None => pipeline,
        })
    }

    pub fn with_failure_store(mut self, store: Arc<dyn FailedRelayStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn failure_store(&self) -> Option<&Arc<dyn FailedRelayStore>> {
        self.failure_store.as_ref()
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            send_key_names: self.config.send_key_names,
            doc_id_key: self.config.doc_id_key.clone(),
            doc_type_key: self.config.doc_type_key.clone(),
        }
    }

    /// Run the pipeline for one submission
    pub async fn handle(&self, event: &EntryCreated) -> PipelineOutcome {
        if event.form_id != self.config.form_id {
            debug!(
                "Ignoring entry {} of form {} (configured form {})",
                event.entry_id, event.form_id, self.config.form_id
            );
            return PipelineOutcome::Skipped(SkipReason::FormMismatch {
                expected: self.config.form_id,
                actual: event.form_id,
            });
        }

        let fields = match fields::extract(&self.config.field_mappings, &event.payload) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Entry {}: {}", event.entry_id, e);
                return PipelineOutcome::Skipped(SkipReason::PayloadShape(e));
            }
        };

        if fields.files.is_empty() {
            info!("Entry {} has no files, nothing to relay", event.entry_id);
            return PipelineOutcome::Skipped(SkipReason::NoFiles);
        }

        let attachments = self.resolve_all(event.entry_id, &fields).await;
        if attachments.is_empty() {
            warn!(
                "Entry {}: none of {} attachments resolved, relay skipped",
                event.entry_id,
                fields.files.len()
            );
            return PipelineOutcome::Skipped(SkipReason::NoAttachmentsResolved {
                attempted: fields.files.len(),
            });
        }

        let request = match request::build(&fields, &attachments, &self.request_options()).await {
            Ok(request) => request,
            Err(BuildError::NoAttachments) => {
                warn!(
                    "Entry {}: resolved attachments could not be read, relay skipped",
                    event.entry_id
                );
                return PipelineOutcome::Skipped(SkipReason::NoAttachmentsResolved {
                    attempted: fields.files.len(),
                });
            }
        };

        let delivery = self.client.send_with_retry(&request, &self.retry).await;
        log_outcome(event.entry_id, &delivery.outcome);

        if let Some(reason) = FailureReason::from_outcome(&delivery.outcome) {
            self.record_failure(
                event,
                &fields,
                request.attachments(),
                delivery.attempts,
                reason,
            )
            .await;
        }

        PipelineOutcome::Relayed {
            outcome: delivery.outcome,
            attempts: delivery.attempts,
            attachments: request.file_count(),
        }
    }

    async fn resolve_all(
        &self,
        entry_id: i64,
        fields: &SubmissionFields,
    ) -> Vec<ResolvedAttachment> {
        let mut resolved = Vec::with_capacity(fields.files.len());

        for (position, entry) in fields.files.iter().enumerate() {
            let reference = match fields::parse_reference(
                entry,
                &self.config.doc_id_key,
                &self.config.doc_type_key,
            ) {
                Ok(reference) => reference,
                Err(e) => {
                    warn!("Entry {}: skipping file #{}: {}", entry_id, position, e);
                    continue;
                }
            };

            match self.resolver.resolve(reference.file_id).await {
                Ok(path) => {
                    debug!(
                        "Entry {}: attachment {} resolved to {}",
                        entry_id,
                        reference.file_id,
                        path.display()
                    );
                    resolved.push(ResolvedAttachment {
                        path,
                        document_type: reference.document_type,
                    });
                }
                Err(e) => warn!("Entry {}: skipping file #{}: {}", entry_id, position, e),
            }
        }

        resolved
    }

    async fn record_failure(
        &self,
        event: &EntryCreated,
        fields: &SubmissionFields,
        attachments: &[ResolvedAttachment],
        attempts: u32,
        reason: FailureReason,
    ) {
        let Some(store) = &self.failure_store else {
            return;
        };

        let failure = FailedRelay {
            id: Uuid::new_v4(),
            entry_id: event.entry_id,
            form_id: event.form_id,
            failed_at: Utc::now(),
            attempts,
            reason,
            name: fields.name.clone(),
            date_of_birth: fields.date_of_birth.clone(),
            email: fields.email.clone(),
            attachments: attachments.to_vec(),
        };

        if let Err(e) = store.record(&failure).await {
            error!(
                "Failed to record failed relay for entry {}: {}",
                event.entry_id, e
            );
        }
    }

    /// Resend every stored failure; delivered records are removed
    pub async fn replay_failed(
        &self,
        store: &dyn FailedRelayStore,
    ) -> Result<ReplaySummary, FailureStoreError> {
        let mut summary = ReplaySummary::default();

        for failure in store.list().await? {
            summary.replayed += 1;

            let fields = SubmissionFields {
                name: failure.name.clone(),
                date_of_birth: failure.date_of_birth.clone(),
                email: failure.email.clone(),
                files: Vec::new(),
            };

            let request =
                match request::build(&fields, &failure.attachments, &self.request_options()).await
                {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(
                            "Cannot replay relay {} of entry {}: {}",
                            failure.id, failure.entry_id, e
                        );
                        summary.still_failing += 1;
                        continue;
                    }
                };

            let delivery = self.client.send_with_retry(&request, &self.retry).await;
            log_outcome(failure.entry_id, &delivery.outcome);

            if delivery.outcome.is_success() {
                store.remove(failure.id).await?;
                summary.delivered += 1;
            } else {
                summary.still_failing += 1;
            }
        }

        info!(
            "Replay finished: {} replayed, {} delivered, {} still failing",
            summary.replayed, summary.delivered, summary.still_failing
        );
        Ok(summary)
    }
}

fn log_outcome(entry_id: i64, outcome: &RelayOutcome) {
    match outcome {
        RelayOutcome::Completed { status, body } if outcome.is_success() => {
            info!(
                "Entry {} relayed, status {}, response: {}",
                entry_id, status, body
            );
        }
        RelayOutcome::Completed { status, body } => {
            error!(
                "Entry {} rejected by relay endpoint, status {}: {}",
                entry_id, status, body
            );
        }
        RelayOutcome::TransportError(message) => {
            error!("Entry {} could not be relayed: {}", entry_id, message);
        }
    }
}
