//! In-memory runtime for exercising the lifecycle state machine without a
//! Docker daemon. Records the operation sequence and serves scripted
//! inspect states and canned output lines.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;

use super::{ContainerInstance, ContainerRuntime, ContainerState, OutputStream};
use crate::config::RunConfig;
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Inner>,
}

struct Inner {
    ops: Mutex<Vec<String>>,
    queued_states: Mutex<VecDeque<ContainerState>>,
    steady_state: Mutex<ContainerState>,
    output_lines: Mutex<Vec<String>>,
    start_failure: Mutex<Option<String>>,
    stop_failure: Mutex<Option<String>>,
    ping_failure: Mutex<Option<String>>,
    next_id: AtomicUsize,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            queued_states: Mutex::new(VecDeque::new()),
            steady_state: Mutex::new(ContainerState::Running),
            output_lines: Mutex::new(vec![
                "INFO vllm engine initializing".to_string(),
                "INFO loading model weights".to_string(),
            ]),
            start_failure: Mutex::new(None),
            stop_failure: Mutex::new(None),
            ping_failure: Mutex::new(None),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded operations, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.inner.ops.lock().expect("ops lock").clone()
    }

    pub fn set_output_lines(&self, lines: Vec<String>) {
        *self.inner.output_lines.lock().expect("output lock") = lines;
    }

    /// States returned by successive `inspect_state` calls; once drained the
    /// steady state repeats.
    pub fn queue_states(&self, states: impl IntoIterator<Item = ContainerState>) {
        self.inner
            .queued_states
            .lock()
            .expect("states lock")
            .extend(states);
    }

    pub fn set_steady_state(&self, state: ContainerState) {
        *self.inner.steady_state.lock().expect("steady lock") = state;
    }

    pub fn fail_start(&self, message: impl Into<String>) {
        *self.inner.start_failure.lock().expect("start lock") = Some(message.into());
    }

    pub fn fail_stop(&self, message: impl Into<String>) {
        *self.inner.stop_failure.lock().expect("stop lock") = Some(message.into());
    }

    pub fn fail_ping(&self, message: impl Into<String>) {
        *self.inner.ping_failure.lock().expect("ping lock") = Some(message.into());
    }

    fn record(&self, entry: impl Into<String>) {
        self.inner.ops.lock().expect("ops lock").push(entry.into());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, _config: &RunConfig) -> Result<ContainerInstance> {
        if let Some(message) = self.inner.start_failure.lock().expect("start lock").clone() {
            self.record("start-failed");
            return Err(Error::Launch(message));
        }
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{n:08x}");
        self.record(format!("start:{id}"));
        Ok(ContainerInstance {
            name: id.clone(),
            id,
            started_at: Utc::now(),
        })
    }

    async fn stream_output(&self, instance: &ContainerInstance) -> Result<OutputStream> {
        self.record(format!("stream:{}", instance.id));
        let lines = self.inner.output_lines.lock().expect("output lock").clone();
        let chunks: Vec<Result<Vec<u8>>> = lines
            .into_iter()
            .map(|line| Ok(format!("{line}\n").into_bytes()))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }

    async fn stop(&self, instance: &ContainerInstance) -> Result<()> {
        if let Some(message) = self.inner.stop_failure.lock().expect("stop lock").clone() {
            self.record(format!("stop-failed:{}", instance.id));
            return Err(Error::Teardown(message));
        }
        self.record(format!("stop:{}", instance.id));
        self.record(format!("remove:{}", instance.id));
        Ok(())
    }

    async fn inspect_state(&self, _instance: &ContainerInstance) -> Result<ContainerState> {
        if let Some(state) = self
            .inner
            .queued_states
            .lock()
            .expect("states lock")
            .pop_front()
        {
            return Ok(state);
        }
        Ok(*self.inner.steady_state.lock().expect("steady lock"))
    }

    async fn ping(&self) -> Result<()> {
        match self.inner.ping_failure.lock().expect("ping lock").clone() {
            Some(message) => Err(Error::Launch(message)),
            None => Ok(()),
        }
    }
}
