//! Scripted transport for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{HttpRequest, RawResponse, Transport};

pub(crate) enum Scripted {
    Json(u16, Value),
    Fail(TransportError),
    Hang,
}

/// Replays canned responses in order and records every request
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn json(responses: Vec<(u16, Value)>) -> Arc<Self> {
        Self::new(
            responses
                .into_iter()
                .map(|(status, body)| Scripted::Json(status, body))
                .collect(),
        )
    }

    pub(crate) fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        self.seen.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Json(status, body)) => Ok(RawResponse {
                status,
                headers: vec![("content-type".into(), "application/json".into())],
                body: Bytes::from(body.to_string()),
                elapsed: Duration::from_millis(1),
            }),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Request("woke up".into()))
            }
            None => Err(TransportError::Request("script exhausted".into())),
        }
    }
}
