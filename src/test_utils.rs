//! Mocks shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::lu::LogicalUnit;
use crate::scsi::{Cdb, Command, Nexus, OpCode, SenseError, Status, TaskAttribute, TaskServiceResponse};
use crate::task::{Task, TaskFactory};
use crate::transport::{TargetTransportPort, TransportError};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls `done` until it holds, panicking once `timeout` has passed.
async fn wait_until(timeout: Duration, what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(POLL_INTERVAL).await;
    }
}

/// A TEST UNIT READY command from initiator `init` to target `tgt`.
pub fn command(lun: Option<u64>, tag: Option<u32>, attribute: TaskAttribute, crn: u32) -> Command {
    let nexus = Nexus::new_it("init", "tgt")
        .with_lun(lun)
        .with_task_tag(tag);
    Command::new(nexus, Cdb::from_op(OpCode::TestUnitReady), attribute, crn)
}

#[derive(Debug, Clone)]
pub struct Response {
    pub nexus: Nexus,
    pub crn: u32,
    pub status: Status,
    pub sense_data: Option<Vec<u8>>,
}

impl Response {
    pub fn sense(&self) -> Option<SenseError> {
        self.sense_data.as_deref().and_then(SenseError::decode)
    }
}

/// A transport port that records everything written to it.
#[derive(Default)]
pub struct RecordingPort {
    responses: Mutex<Vec<Response>>,
    data: Mutex<Vec<(u32, Vec<u8>)>>,
    terminated: Mutex<Vec<u32>>,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().clone()
    }

    /// Data-In transfers as `(command reference number, bytes)`.
    pub fn data(&self) -> Vec<(u32, Vec<u8>)> {
        self.data.lock().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().clone()
    }

    pub async fn wait_for_responses(&self, count: usize, timeout: Duration) -> Vec<Response> {
        wait_until(timeout, "responses", || self.responses.lock().len() >= count).await;
        self.responses()
    }

    fn check_terminated(&self, crn: u32) -> Result<(), TransportError> {
        if self.terminated.lock().contains(&crn) {
            return Err(TransportError::Terminated);
        }
        Ok(())
    }
}

#[async_trait]
impl TargetTransportPort for RecordingPort {
    async fn read_data(
        &self,
        _nexus: &Nexus,
        command_reference_number: u32,
        output: &mut [u8],
    ) -> Result<(), TransportError> {
        self.check_terminated(command_reference_number)?;
        output.fill(0);
        Ok(())
    }

    async fn write_data(
        &self,
        _nexus: &Nexus,
        command_reference_number: u32,
        input: &[u8],
    ) -> Result<(), TransportError> {
        self.check_terminated(command_reference_number)?;
        self.data
            .lock()
            .push((command_reference_number, input.to_vec()));
        Ok(())
    }

    fn terminate_data_transfer(&self, _nexus: &Nexus, command_reference_number: u32) {
        self.terminated.lock().push(command_reference_number);
    }

    async fn write_response(
        &self,
        nexus: &Nexus,
        command_reference_number: u32,
        status: Status,
        sense_data: Option<Vec<u8>>,
    ) {
        self.responses.lock().push(Response {
            nexus: nexus.clone(),
            crn: command_reference_number,
            status,
            sense_data,
        });
    }
}

/// Task lifecycle events, keyed by command reference number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Started(u32),
    Finished(u32),
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub async fn wait_for(&self, event: Event, timeout: Duration) {
        wait_until(timeout, "task event", || self.0.lock().contains(&event)).await;
    }
}

/// A task that logs when it starts and finishes, optionally sleeping in
/// between, and answers GOOD unless aborted.
pub struct TestTask {
    command: Command,
    port: Arc<dyn TargetTransportPort>,
    log: EventLog,
    delay: Duration,
    aborted: CancellationToken,
    abort_calls: AtomicUsize,
}

impl TestTask {
    pub fn new(port: Arc<dyn TargetTransportPort>, command: Command, log: EventLog) -> Self {
        Self {
            command,
            port,
            log,
            delay: Duration::ZERO,
            aborted: CancellationToken::new(),
            abort_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for TestTask {
    async fn run(&self) {
        let crn = self.command.command_reference_number;
        self.log.push(Event::Started(crn));
        if !self.delay.is_zero() {
            tokio::select! {
                _ = sleep(self.delay) => {}
                _ = self.aborted.cancelled() => {}
            }
        }
        // Logged before responding so waiting on responses implies the event.
        self.log.push(Event::Finished(crn));
        if !self.aborted.is_cancelled() {
            self.port
                .write_response(&self.command.nexus, crn, Status::Good, None)
                .await;
        }
    }

    fn abort(&self) -> bool {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        if self.aborted.is_cancelled() {
            return false;
        }
        self.aborted.cancel();
        true
    }

    fn command(&self) -> &Command {
        &self.command
    }

    fn port(&self) -> &Arc<dyn TargetTransportPort> {
        &self.port
    }
}

/// Builds a [`TestTask`] for every command and keeps a handle on each.
pub struct TestTaskFactory {
    log: EventLog,
    created: Mutex<Vec<Arc<TestTask>>>,
}

impl TestTaskFactory {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<Arc<TestTask>> {
        self.created.lock().clone()
    }
}

impl TaskFactory for TestTaskFactory {
    fn create(
        &self,
        port: Arc<dyn TargetTransportPort>,
        command: Command,
    ) -> Result<Arc<dyn Task>, SenseError> {
        let task = Arc::new(TestTask::new(port, command, self.log.clone()));
        self.created.lock().push(task.clone());
        Ok(task as Arc<dyn Task>)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LuCall {
    Start,
    Stop,
    AbortTask(u32),
    AbortTaskSet,
    ClearTaskSet,
    Reset,
    NexusLost,
}

/// A logical unit that records what the router asks of it.
#[derive(Default)]
pub struct MockLogicalUnit {
    calls: Mutex<Vec<LuCall>>,
    enqueued: Mutex<Vec<u32>>,
    running: AtomicBool,
}

impl MockLogicalUnit {
    pub fn calls(&self) -> Vec<LuCall> {
        self.calls.lock().clone()
    }

    /// Command reference numbers of enqueued commands.
    pub fn enqueued(&self) -> Vec<u32> {
        self.enqueued.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn record(&self, call: LuCall) -> TaskServiceResponse {
        self.calls.lock().push(call);
        TaskServiceResponse::FunctionComplete
    }
}

#[async_trait]
impl LogicalUnit for MockLogicalUnit {
    async fn enqueue(&self, _port: Arc<dyn TargetTransportPort>, command: Command) {
        self.enqueued.lock().push(command.command_reference_number);
    }

    fn abort_task(&self, nexus: &Nexus) -> TaskServiceResponse {
        self.record(LuCall::AbortTask(nexus.task_tag.unwrap_or(u32::MAX)))
    }

    fn abort_task_set(&self, _nexus: &Nexus) -> TaskServiceResponse {
        self.record(LuCall::AbortTaskSet)
    }

    fn clear_task_set(&self, _nexus: &Nexus) -> TaskServiceResponse {
        self.record(LuCall::ClearTaskSet)
    }

    fn reset(&self) -> TaskServiceResponse {
        self.record(LuCall::Reset)
    }

    fn nexus_lost(&self) {
        self.record(LuCall::NexusLost);
    }

    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.record(LuCall::Start);
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.record(LuCall::Stop);
    }
}
