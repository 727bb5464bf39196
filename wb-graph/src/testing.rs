use crate::error::{GraphError, Result};
use crate::transport::{ApiRequest, Transport};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub request: ApiRequest,
}

/// Records every request and answers from a queue of canned responses.
/// An exhausted queue answers `null`.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<VecDeque<Result<serde_json::Value>>>,
}

impl RecordingTransport {
    pub fn respond(&self, response: Result<serde_json::Value>) {
        self.responses.lock().expect("responses").push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn last(&self) -> RecordedCall {
        self.calls().pop().expect("at least one request")
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        request: ApiRequest,
    ) -> Result<serde_json::Value> {
        self.calls.lock().expect("calls").push(RecordedCall {
            method,
            path: path.to_string(),
            request,
        });
        self.responses
            .lock()
            .expect("responses")
            .pop_front()
            .unwrap_or(Ok(serde_json::Value::Null))
    }
}

pub fn api_error(status: u16, body: serde_json::Value) -> GraphError {
    GraphError::Api {
        status,
        body: body.to_string(),
    }
}
