//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::capability::{BackendFailure, Operation, OperationResult};
use crate::observe::{CallEvent, CallSink};

/// Operation that counts its invocations and returns a canned result.
#[derive(Clone)]
pub struct CountingOp {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<Map<String, Value>>>>,
    result: OperationResult,
    delay: Option<Duration>,
}

impl CountingOp {
    pub fn ok(data: Value) -> Self {
        CountingOp {
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            result: Ok(data),
            delay: None,
        }
    }

    pub fn fail(code: &str, message: &str) -> Self {
        CountingOp {
            result: Err(BackendFailure::with_code(code, message)),
            ..CountingOp::ok(Value::Null)
        }
    }

    pub fn slow(data: Value, delay: Duration) -> Self {
        CountingOp {
            delay: Some(delay),
            ..CountingOp::ok(data)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters of every invocation, in order.
    pub fn seen(&self) -> Vec<Map<String, Value>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Operation for CountingOp {
    async fn call(&self, params: &Map<String, Value>) -> OperationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(params.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CallEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl CallSink for RecordingSink {
    fn record(&self, event: &CallEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
