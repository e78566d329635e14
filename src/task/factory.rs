//! Turning commands into tasks.
//!
//! Each task implementation registers a constructor under the operation code it
//! serves; [`TaskRegistry`] looks the code up at admission time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{Task, TaskBase, TaskSet, TaskSetError};
use crate::scsi::{Command, OpCode, SenseError};
use crate::transport::TargetTransportPort;

pub trait TaskFactory: Send + Sync {
    /// Builds the task that will execute `command`.
    ///
    /// Fails with [`SenseError::InvalidCommandOperationCode`] when no task
    /// implementation serves the CDB's operation code.
    fn create(
        &self,
        port: Arc<dyn TargetTransportPort>,
        command: Command,
    ) -> Result<Arc<dyn Task>, SenseError>;
}

/// Builds a task from the factory environment `E` and the task's shared state.
pub type TaskConstructor<E> = fn(Arc<E>, TaskBase) -> Arc<dyn Task>;

/// A [`TaskFactory`] backed by an explicit operation code table.
pub struct TaskRegistry<E> {
    env: Arc<E>,
    constructors: HashMap<OpCode, TaskConstructor<E>>,
}

impl<E> TaskRegistry<E> {
    pub fn new(env: Arc<E>) -> Self {
        Self {
            env,
            constructors: HashMap::new(),
        }
    }

    /// Serves `op` with `constructor`, replacing any earlier registration.
    pub fn register(mut self, op: OpCode, constructor: TaskConstructor<E>) -> Self {
        self.constructors.insert(op, constructor);
        self
    }

    pub fn responds_to(&self, op: OpCode) -> bool {
        self.constructors.contains_key(&op)
    }
}

impl<E: Send + Sync> TaskFactory for TaskRegistry<E> {
    fn create(
        &self,
        port: Arc<dyn TargetTransportPort>,
        command: Command,
    ) -> Result<Arc<dyn Task>, SenseError> {
        let constructor = command
            .cdb
            .operation_code()
            .and_then(|op| self.constructors.get(&op))
            .ok_or_else(|| {
                debug!(cdb = ?command.cdb, "no task registered for operation code");
                SenseError::InvalidCommandOperationCode
            })?;
        Ok(constructor(self.env.clone(), TaskBase::new(port, command)))
    }
}

/// Builds the task for `command` and offers it to `task_set` without waiting
/// for capacity.
///
/// Every failure is reported to the initiator through `port`. Returns whether
/// the task was admitted.
pub(crate) async fn submit(
    factory: &dyn TaskFactory,
    task_set: &TaskSet,
    port: Arc<dyn TargetTransportPort>,
    command: Command,
) -> bool {
    let nexus = command.nexus.clone();
    let crn = command.command_reference_number;
    let task = match factory.create(port.clone(), command) {
        Ok(task) => task,
        Err(sense) => {
            warn!(%nexus, crn, %sense, "error when parsing command");
            port.check_condition(&nexus, crn, sense).await;
            return false;
        }
    };
    match task_set.offer(task, Duration::ZERO).await {
        Ok(admitted) => admitted,
        Err(TaskSetError::UnsupportedAttribute(attribute)) => {
            warn!(%nexus, crn, ?attribute, "rejecting command with unsupported task attribute");
            port.check_condition(&nexus, crn, SenseError::InvalidFieldInCdb)
                .await;
            false
        }
        Err(e) => {
            warn!(%nexus, crn, error = %e, "task set refused command");
            port.check_condition(&nexus, crn, SenseError::InternalTargetFailure)
                .await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::{Cdb, Nexus, TaskAttribute};
    use crate::task::TestUnitReadyTask;
    use crate::test_utils::RecordingPort;

    fn command(cdb: Cdb) -> Command {
        Command::new(Nexus::new_itl("i", "t", 0), cdb, TaskAttribute::Simple, 1)
    }

    #[test]
    fn registered_operation_code_builds_task() {
        let registry =
            TaskRegistry::new(Arc::new(())).register(OpCode::TestUnitReady, TestUnitReadyTask::create);
        assert!(registry.responds_to(OpCode::TestUnitReady));

        let port = Arc::new(RecordingPort::new());
        let task = registry
            .create(port, command(Cdb::from_op(OpCode::TestUnitReady)))
            .expect("task");
        assert_eq!(task.command().command_reference_number, 1);
    }

    #[test]
    fn unknown_operation_code_is_rejected() {
        let registry =
            TaskRegistry::new(Arc::new(())).register(OpCode::TestUnitReady, TestUnitReadyTask::create);
        let port = Arc::new(RecordingPort::new());

        for cdb in [Cdb::from_op(OpCode::Read10), Cdb::new([0xC7]), Cdb::new(Vec::new())] {
            let err = registry.create(port.clone(), command(cdb)).err();
            assert_eq!(err, Some(SenseError::InvalidCommandOperationCode));
        }
    }
}
