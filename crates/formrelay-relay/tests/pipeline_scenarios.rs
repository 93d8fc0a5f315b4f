use async_trait::async_trait;
use formrelay_core::{FieldMappings, RelayConfig, RelaySettings, RetrySettings};
use formrelay_relay::{
    AttachmentIndex, EntryCreated, FailedRelayStore, FailureReason, JsonlFailureStore,
    NoopPermissions, PipelineOutcome, RelayOutcome, SkipReason, SubmissionPipeline,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORM_ID: i64 = 4;

/// Index that counts lookups
#[derive(Default)]
struct CountingIndex {
    entries: HashMap<i64, PathBuf>,
    lookups: AtomicUsize,
}

impl CountingIndex {
    fn with(entries: &[(i64, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(id, p)| (*id, PathBuf::from(p)))
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttachmentIndex for CountingIndex {
    async fn stored_path(&self, file_id: i64) -> Option<PathBuf> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries.get(&file_id).cloned()
    }
}

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("private")).unwrap();
        Self { root }
    }

    fn add_file(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.root.path().join("private").join(name), contents).unwrap();
    }

    fn config(&self, relay_url: &str) -> Arc<RelayConfig> {
        let settings = RelaySettings {
            form_id: FORM_ID,
            relay_url: relay_url.to_string(),
            api_token: "relay-token".to_string(),
            field_mappings: FieldMappings {
                name: "12".to_string(),
                date_of_birth: "13".to_string(),
                email: "14".to_string(),
                files: "15".to_string(),
            },
            doc_id_key: "16".to_string(),
            doc_type_key: "17".to_string(),
            relative_file_path: "private".to_string(),
            document_root: self.root.path().to_path_buf(),
            retry: RetrySettings {
                max_attempts: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                multiplier: 1.0,
            },
            ..RelaySettings::default()
        };
        Arc::new(settings.sanitize().unwrap())
    }

    fn pipeline(&self, relay_url: &str, index: Arc<CountingIndex>) -> SubmissionPipeline {
        SubmissionPipeline::new(self.config(relay_url), index, Arc::new(NoopPermissions)).unwrap()
    }

    fn failure_log(&self) -> PathBuf {
        self.root.path().join("failed.jsonl")
    }
}

fn event(form_id: i64, files: serde_json::Value) -> EntryCreated {
    serde_json::from_value(json!({
        "entry_id": 77,
        "form_id": form_id,
        "item_meta": {
            "12": "Jane Doe",
            "13": "1990-04-12",
            "14": "jane@example.com",
            "15": files
        }
    }))
    .unwrap()
}

fn two_files() -> serde_json::Value {
    json!([
        {"16": 101, "17": "passport"},
        {"16": "102", "17": "id_card"}
    ])
}

fn standard_index() -> Arc<CountingIndex> {
    Arc::new(CountingIndex::with(&[
        (101, "/var/www/wp-content/uploads/2024/05/passport.pdf"),
        (102, "/var/www/wp-content/uploads/2024/05/id.png"),
        (103, "/var/www/wp-content/uploads/2024/05/proof.jpg"),
    ]))
}

async fn received_body(server: &MockServer) -> String {
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "expected exactly one relay request");
    String::from_utf8_lossy(&requests[0].body).into_owned()
}

fn text_part(name: &str, value: &str) -> String {
    format!("name=\"{}\"\r\n\r\n{}\r\n", name, value)
}

fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/upload", port)
}

fn position(body: &str, needle: &str) -> usize {
    body.find(needle)
        .unwrap_or_else(|| panic!("{} not found in body", needle))
}

#[tokio::test]
async fn test_two_attachments_produce_one_request() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"%PDF-passport");
    fixture.add_file("id.png", b"PNG-id");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("X-API-Token", "relay-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = fixture.pipeline(&format!("{}/upload", server.uri()), standard_index());
    let outcome = pipeline.handle(&event(FORM_ID, two_files())).await;

    assert_eq!(
        outcome,
        PipelineOutcome::Relayed {
            outcome: RelayOutcome::Completed {
                status: 200,
                body: "stored".to_string()
            },
            attempts: 1,
            attachments: 2,
        }
    );

    let body = received_body(&server).await;
    assert!(body.contains(&text_part("name", "Jane Doe")));
    assert!(body.contains(&text_part("date_of_birth", "1990-04-12")));
    assert!(body.contains(&text_part("email", "jane@example.com")));
    assert!(body.contains(&text_part("doc_id_key", "16")));
    assert!(body.contains(&text_part("doc_type_key", "17")));
    assert!(body.contains(&text_part("description_0", "passport")));
    assert!(body.contains(&text_part("description_1", "id_card")));
    assert!(body.contains("filename=\"passport.pdf\""));
    assert!(body.contains("%PDF-passport"));
    assert!(!body.contains("name=\"file_2\""));

    assert!(position(&body, "name=\"email\"") < position(&body, "name=\"file_0\""));
    assert!(position(&body, "name=\"file_0\"") < position(&body, "name=\"file_1\""));
}

#[tokio::test]
async fn test_absent_files_field_skips_relay() {
    let fixture = Fixture::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = standard_index();
    let pipeline = fixture.pipeline(&server.uri(), index.clone());

    let mut event = event(FORM_ID, json!(null));
    event.payload = serde_json::from_value(json!({"12": "Jane Doe"})).unwrap();

    assert_eq!(
        pipeline.handle(&event).await,
        PipelineOutcome::Skipped(SkipReason::NoFiles)
    );
    assert_eq!(index.lookups(), 0);
}

#[tokio::test]
async fn test_server_error_is_reported_and_recorded() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"a");
    fixture.add_file("id.png", b"b");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(JsonlFailureStore::new(fixture.failure_log()));
    let pipeline = fixture
        .pipeline(&server.uri(), standard_index())
        .with_failure_store(store.clone());

    let outcome = pipeline.handle(&event(FORM_ID, two_files())).await;
    assert_eq!(
        outcome,
        PipelineOutcome::Relayed {
            outcome: RelayOutcome::Completed {
                status: 500,
                body: "internal error".to_string()
            },
            attempts: 1,
            attachments: 2,
        }
    );
    assert!(!outcome.is_delivered());

    let failures = store.list().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entry_id, 77);
    assert_eq!(
        failures[0].reason,
        FailureReason::Rejected {
            status: 500,
            body: "internal error".to_string()
        }
    );
    assert_eq!(failures[0].attachments.len(), 2);
}

#[tokio::test]
async fn test_connection_refused_then_replayed() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"a");
    fixture.add_file("id.png", b"b");

    let store = Arc::new(JsonlFailureStore::new(fixture.failure_log()));
    let pipeline = fixture
        .pipeline(&closed_port_url(), standard_index())
        .with_failure_store(store.clone());

    let outcome = pipeline.handle(&event(FORM_ID, two_files())).await;
    match &outcome {
        PipelineOutcome::Relayed {
            outcome: RelayOutcome::TransportError(_),
            attempts,
            attachments,
        } => {
            assert_eq!(*attempts, 2);
            assert_eq!(*attachments, 2);
        }
        other => panic!("expected a transport error, got {:?}", other),
    }

    let failures = store.list().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].reason, FailureReason::Transport { .. }));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("X-API-Token", "relay-token"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let replayer = fixture.pipeline(&server.uri(), standard_index());
    let summary = replayer.replay_failed(store.as_ref()).await.unwrap();

    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.still_failing, 0);
    assert!(store.list().await.unwrap().is_empty());

    let body = received_body(&server).await;
    assert!(body.contains(&text_part("name", "Jane Doe")));
    assert!(body.contains(&text_part("description_1", "id_card")));
}

#[tokio::test]
async fn test_other_form_touches_nothing() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"a");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = standard_index();
    let pipeline = fixture.pipeline(&server.uri(), index.clone());

    let outcome = pipeline.handle(&event(FORM_ID + 1, two_files())).await;
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped(SkipReason::FormMismatch {
            expected: FORM_ID,
            actual: FORM_ID + 1
        })
    );
    assert_eq!(index.lookups(), 0);
}

#[tokio::test]
async fn test_failed_attachment_is_excluded_from_batch() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"a");
    fixture.add_file("proof.jpg", b"c");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = fixture.pipeline(&server.uri(), standard_index());
    let files = json!([
        {"16": 101, "17": "passport"},
        {"16": 999, "17": "unknown"},
        {"16": 102, "17": "missing_on_disk"},
        {"17": "no_id"},
        {"16": 103, "17": "proof_of_address"}
    ]);

    let outcome = pipeline.handle(&event(FORM_ID, files)).await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Relayed { attachments: 2, .. }
    ));

    let body = received_body(&server).await;
    assert!(body.contains(&text_part("description_0", "passport")));
    assert!(body.contains(&text_part("description_1", "proof_of_address")));
    assert!(!body.contains("name=\"file_2\""));
    assert!(!body.contains("unknown"));
    assert!(!body.contains("missing_on_disk"));
}

#[tokio::test]
async fn test_indices_follow_submission_order_of_keyed_rows() {
    let fixture = Fixture::new();
    fixture.add_file("passport.pdf", b"a");
    fixture.add_file("id.png", b"b");
    fixture.add_file("proof.jpg", b"c");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let pipeline = fixture.pipeline(&server.uri(), standard_index());
    let files: serde_json::Value = serde_json::from_str(
        r#"{
            "9": {"16": 103, "17": "third_id"},
            "2": {"16": 101, "17": "first_id"},
            "5": {"16": 102, "17": "second_id"}
        }"#,
    )
    .unwrap();

    pipeline.handle(&event(FORM_ID, files)).await;

    let body = received_body(&server).await;
    assert!(body.contains(&text_part("description_0", "third_id")));
    assert!(body.contains(&text_part("description_1", "first_id")));
    assert!(body.contains(&text_part("description_2", "second_id")));
}

#[tokio::test]
async fn test_nothing_resolved_sends_nothing() {
    let fixture = Fixture::new();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let index = standard_index();
    let pipeline = fixture.pipeline(&server.uri(), index.clone());

    let outcome = pipeline.handle(&event(FORM_ID, two_files())).await;
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped(SkipReason::NoAttachmentsResolved { attempted: 2 })
    );
    assert_eq!(index.lookups(), 2);
}

#[tokio::test]
async fn test_malformed_files_field_is_skipped() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline("http://127.0.0.1:9/upload", standard_index());

    let outcome = pipeline.handle(&event(FORM_ID, json!("101,102"))).await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Skipped(SkipReason::PayloadShape(_))
    ));
}

#[tokio::test]
async fn test_empty_files_mapping_means_no_files() {
    let fixture = Fixture::new();
    let mut config = (*fixture.config("http://127.0.0.1:9/upload")).clone();
    config.field_mappings.files = String::new();

    let index = standard_index();
    let pipeline =
        SubmissionPipeline::new(Arc::new(config), index.clone(), Arc::new(NoopPermissions))
            .unwrap();

    assert_eq!(
        pipeline.handle(&event(FORM_ID, two_files())).await,
        PipelineOutcome::Skipped(SkipReason::NoFiles)
    );
    assert_eq!(index.lookups(), 0);
}
