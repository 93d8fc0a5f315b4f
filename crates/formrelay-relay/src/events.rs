//! Submission events delivered by the form host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw submission data keyed by form field id.
///
/// Key order is the order in which the form sent its fields; repeater rows
/// nested inside keep their order too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionPayload(Map<String, Value>);

impl SubmissionPayload {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for SubmissionPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// "Entry created" notification for one form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryCreated {
    pub entry_id: i64,
    pub form_id: i64,
    #[serde(default, alias = "item_meta")]
    pub payload: SubmissionPayload,
}

impl EntryCreated {
    pub fn new(entry_id: i64, form_id: i64, payload: SubmissionPayload) -> Self {
        Self {
            entry_id,
            form_id,
            payload,
        }
    }
}
