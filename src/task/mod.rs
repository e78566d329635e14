//! Tasks: one SCSI command bound to the port it must answer on.
//!
//! A [`Task`] is produced by a [`TaskFactory`], admitted into a [`TaskSet`],
//! and run exactly once by a worker of the owning [`TaskManager`]. Most
//! implementations are written against [`ScsiTask`], which turns sense
//! conditions into `CHECK CONDITION` responses and takes care of abort
//! bookkeeping through [`TaskBase`].

mod basic;
mod factory;
mod manager;
mod set;
pub mod target;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::scsi::{Command, SenseError, Status};
use crate::transport::TargetTransportPort;

pub use basic::TestUnitReadyTask;
pub use factory::{TaskConstructor, TaskFactory, TaskRegistry};
pub(crate) use factory::submit;
pub use manager::TaskManager;
pub use set::{ReadyTask, TaskSet, TaskSetError};

#[async_trait]
pub trait Task: Send + Sync {
    /// Executes the command and writes its response. Called at most once.
    async fn run(&self);

    /// Best-effort abort; may be called before or during [`run`](Task::run).
    ///
    /// Returns `false` if the task was already aborted or has already begun
    /// writing its response.
    fn abort(&self) -> bool;

    fn command(&self) -> &Command;

    fn port(&self) -> &Arc<dyn TargetTransportPort>;
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(self.command()).finish()
    }
}

/// State shared by every concrete task.
///
/// `complete` is set by whichever of abort or the response phase happens
/// first; the loser backs off. Aborting also cancels any data transfer in
/// flight.
pub struct TaskBase {
    port: Arc<dyn TargetTransportPort>,
    command: Command,
    complete: AtomicBool,
    cancel: CancellationToken,
}

impl TaskBase {
    pub fn new(port: Arc<dyn TargetTransportPort>, command: Command) -> Self {
        Self {
            port,
            command,
            complete: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn port(&self) -> &Arc<dyn TargetTransportPort> {
        &self.port
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn abort(&self) -> bool {
        if self
            .complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!(command = ?self.command, "aborting task");
        self.cancel.cancel();
        self.port.terminate_data_transfer(
            &self.command.nexus,
            self.command.command_reference_number,
        );
        true
    }

    /// Reads Data-Out from the initiator into `output`.
    pub async fn read_data(&self, output: &mut [u8]) -> Result<(), SenseError> {
        if self.is_aborted() {
            return Err(SenseError::SynchronousDataTransferError);
        }
        let nexus = &self.command.nexus;
        let crn = self.command.command_reference_number;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SenseError::SynchronousDataTransferError),
            res = self.port.read_data(nexus, crn, output) => {
                res.map_err(|_| SenseError::SynchronousDataTransferError)
            }
        }
    }

    /// Sends `input` to the initiator as Data-In.
    pub async fn write_data(&self, input: &[u8]) -> Result<(), SenseError> {
        if self.is_aborted() {
            return Err(SenseError::SynchronousDataTransferError);
        }
        let nexus = &self.command.nexus;
        let crn = self.command.command_reference_number;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SenseError::SynchronousDataTransferError),
            res = self.port.write_data(nexus, crn, input) => {
                res.map_err(|_| SenseError::SynchronousDataTransferError)
            }
        }
    }

    /// Sends at most `allocation_length` bytes of `input`.
    ///
    /// SPC-2 4.3.4.6: truncation to the `ALLOCATION LENGTH` is not an error.
    pub async fn write_data_truncated(
        &self,
        input: &[u8],
        allocation_length: usize,
    ) -> Result<(), SenseError> {
        let len = input.len().min(allocation_length);
        if len == 0 {
            return Ok(());
        }
        self.write_data(&input[..len]).await
    }

    /// Writes the response, unless the task has been aborted.
    pub async fn write_response(&self, status: Status, sense_data: Option<Vec<u8>>) {
        if self
            .complete
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(command = ?self.command, "task aborted, suppressing response");
            return;
        }
        self.port
            .write_response(
                &self.command.nexus,
                self.command.command_reference_number,
                status,
                sense_data,
            )
            .await;
    }
}

/// A task whose body may fail with a sense condition.
#[async_trait]
pub trait ScsiTask: Send + Sync {
    fn base(&self) -> &TaskBase;

    /// Runs the command. On success the implementation writes its own
    /// response; an error becomes `CHECK CONDITION` with the matching sense data.
    async fn execute(&self) -> Result<(), SenseError>;
}

#[async_trait]
impl<T: ScsiTask> Task for T {
    async fn run(&self) {
        if let Err(sense) = self.execute().await {
            let base = self.base();
            if base.is_aborted() {
                debug!(command = ?base.command(), "task ended after abort");
                return;
            }
            debug!(command = ?base.command(), %sense, "task failed");
            base.write_response(Status::CheckCondition, Some(sense.encode()))
                .await;
        }
    }

    fn abort(&self) -> bool {
        self.base().abort()
    }

    fn command(&self) -> &Command {
        self.base().command()
    }

    fn port(&self) -> &Arc<dyn TargetTransportPort> {
        self.base().port()
    }
}
