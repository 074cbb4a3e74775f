/*!
Stub port sources and instrumentation

Lets a test script what `ibstat`/`ibstatus` return without the tools being
installed, and records every invocation for later assertions.
*/

use async_trait::async_trait;
use ibwatch_check::{IbPort, Instrumentation, PortSource, SourceError, SourceOutput, SourceResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A recorded call to [`StubSource::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubCall {
    pub timeout: Duration,
    pub command_override: String,
}

/// Returns queued results first, then the default result.
#[derive(Clone)]
pub struct StubSource {
    name: &'static str,
    queued: Arc<Mutex<VecDeque<SourceResult>>>,
    default: Arc<Mutex<SourceResult>>,
    calls: Arc<Mutex<Vec<StubCall>>>,
}

impl StubSource {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            queued: Arc::new(Mutex::new(VecDeque::new())),
            default: Arc::new(Mutex::new(SourceResult::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn ibstat() -> Self {
        Self::new("ibstat")
    }

    pub fn ibstatus() -> Self {
        Self::new("ibstatus")
    }

    /// Result returned whenever nothing is queued.
    pub fn set_default(&self, result: SourceResult) {
        *self.default.lock() = result;
    }

    pub fn set_ports(&self, ports: Vec<IbPort>) {
        self.set_default(SourceResult::ok(SourceOutput::new(ports)));
    }

    /// Result for the next call only.
    pub fn push(&self, result: SourceResult) {
        self.queued.lock().push_back(result);
    }

    pub fn fail_with(&self, error: SourceError) {
        self.set_default(SourceResult::err(error));
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PortSource for StubSource {
    fn command_name(&self) -> &str {
        self.name
    }

    async fn query(&self, timeout: Duration, command_override: &str) -> SourceResult {
        self.calls.lock().push(StubCall {
            timeout,
            command_override: command_override.to_string(),
        });
        if let Some(result) = self.queued.lock().pop_front() {
            return result;
        }
        self.default.lock().clone()
    }
}

/// Instrumentation whose presence is toggled by the test.
#[derive(Clone, Default)]
pub struct StubInstrumentation {
    missing: Arc<Mutex<Option<String>>>,
}

impl StubInstrumentation {
    pub fn present() -> Self {
        Self::default()
    }

    pub fn absent(reason: &str) -> Self {
        let stub = Self::default();
        stub.set_missing(Some(reason));
        stub
    }

    pub fn set_missing(&self, reason: Option<&str>) {
        *self.missing.lock() = reason.map(String::from);
    }
}

impl Instrumentation for StubInstrumentation {
    fn missing_reason(&self) -> Option<String> {
        self.missing.lock().clone()
    }
}
