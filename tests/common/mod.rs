use async_trait::async_trait;
use palaver::client::{Candidate, Part, ResponseMetadata};
use palaver::storage::ConversationStore;
use palaver::{ApiClient, ApiRequest, ApiResponse, EventStream, Result, StreamEvent};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_store() -> (ConversationStore, PathBuf, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("conversations.db");
    let store =
        ConversationStore::new_with_path(&db_path).expect("failed to create store with path");
    (store, db_path, tmp)
}

/// API client that replays a script of canned outcomes, one per call.
///
/// Streaming requests replay the same script: a successful response is
/// flattened into content/tool-call delta events.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<ApiResponse>>>,
    calls: Mutex<usize>,
}

#[allow(dead_code)]
impl ScriptedClient {
    pub fn new(script: Vec<Result<ApiResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().expect("lock poisoned")
    }

    fn next_outcome(&self) -> Result<ApiResponse> {
        *self.calls.lock().expect("lock poisoned") += 1;
        self.script
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| panic!("scripted client ran out of responses"))
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn generate(&self, _request: ApiRequest) -> Result<ApiResponse> {
        self.next_outcome()
    }

    async fn generate_stream(&self, _request: ApiRequest) -> Result<EventStream> {
        let response = self.next_outcome()?;
        let mut events: Vec<Result<StreamEvent>> = Vec::new();
        if let Some(candidate) = response.candidates.first() {
            for chunk in candidate.text().as_bytes().chunks(3) {
                let text = String::from_utf8_lossy(chunk).to_string();
                events.push(Ok(StreamEvent::ContentDelta(text)));
            }
            if let Some(thought) = candidate.thought() {
                events.push(Ok(StreamEvent::ThoughtDelta(thought)));
            }
            let calls = candidate.tool_calls();
            if !calls.is_empty() {
                events.push(Ok(StreamEvent::ToolCallDelta(calls)));
            }
        }
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

#[allow(dead_code)]
pub fn text_response(text: &str) -> ApiResponse {
    ApiResponse {
        candidates: vec![Candidate {
            parts: vec![Part::Text {
                text: text.to_string(),
            }],
            metadata: ResponseMetadata::default(),
        }],
        block_reason: None,
    }
}

#[allow(dead_code)]
pub fn tool_call_response(name: &str, args: serde_json::Value) -> ApiResponse {
    ApiResponse {
        candidates: vec![Candidate {
            parts: vec![Part::FunctionCall {
                name: name.to_string(),
                args,
            }],
            metadata: ResponseMetadata::default(),
        }],
        block_reason: None,
    }
}
