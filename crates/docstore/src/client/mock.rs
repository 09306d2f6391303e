//! In-memory transport used by unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageResult;

use super::transport::{HttpRequest, RawResponse, Transport};

/// Records every request and answers with queued responses.
///
/// Once the queue is empty every request is answered with `200 {}`.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, status: u16, body: Value) {
        self.respond_text(status, &body.to_string());
    }

    pub(crate) fn respond_text(&self, status: u16, body: &str) {
        self.responses.lock().push_back(RawResponse {
            status,
            body: Some(body.to_string()),
        });
    }

    pub(crate) fn respond_empty(&self, status: u16) {
        self.responses
            .lock()
            .push_back(RawResponse { status, body: None });
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn host(&self) -> &str {
        "mock:9200"
    }

    async fn perform(&self, request: &HttpRequest) -> StorageResult<RawResponse> {
        self.requests.lock().push(request.clone());
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| RawResponse {
                status: 200,
                body: Some("{}".to_string()),
            }))
    }
}
