//! Relays form submissions with attachments to an HTTP endpoint as
//! multipart requests.

pub mod attachments;
pub mod client;
pub mod events;
pub mod failures;
pub mod fields;
pub mod handlers;
pub mod listener;
pub mod pipeline;
pub mod request;

pub use attachments::{
    AttachmentIndex, AttachmentResolver, FixedModePermissions, ManifestAttachmentIndex,
    NoopPermissions, PermissionNormalizer, ResolveError, ResolvedAttachment,
};
pub use client::{RelayClient, RelayDelivery, RelayOutcome, RetryPolicy};
pub use events::{EntryCreated, SubmissionPayload};
pub use failures::{FailedRelay, FailedRelayStore, FailureReason, JsonlFailureStore};
pub use fields::{AttachmentReference, MappingError, ReferenceError, SubmissionFields};
pub use handlers::{configure_routes, IntakeState};
pub use listener::{QueueError, RelayQueue, RelayWorker};
pub use pipeline::{PipelineError, PipelineOutcome, ReplaySummary, SkipReason, SubmissionPipeline};
pub use request::{BuildError, MultipartRequest, RequestOptions};
