//! Top-level dispatch of commands and task management functions.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::lu::{LogicalUnit, LogicalUnitRegistry};
use crate::scsi::{Command, Nexus, SenseError, TaskManagementFunction, TaskServiceResponse};
use crate::task::{self, TaskFactory, TaskManager, TaskSet, target};
use crate::transport::TargetTransportPort;

/// Routes commands either to a registered logical unit or, for commands
/// addressed to the target itself, to the target-level task set.
pub struct TaskRouter {
    logical_units: LogicalUnitRegistry,
    target_factory: Arc<dyn TaskFactory>,
    target_manager: TaskManager,
    /// Serializes start, stop, and logical unit (de)registration.
    running: Mutex<bool>,
}

impl TaskRouter {
    /// A router whose target-level task set answers REPORT LUNS and
    /// TEST UNIT READY.
    pub fn new(config: &TargetConfig) -> Self {
        let logical_units = LogicalUnitRegistry::new();
        let factory = Arc::new(target::target_task_factory(logical_units.clone()));
        Self::with_parts(
            logical_units,
            factory,
            config.target_queue_length,
            config.target_workers,
        )
    }

    /// A router with a caller-supplied target-level task factory.
    pub fn with_target_factory(config: &TargetConfig, target_factory: Arc<dyn TaskFactory>) -> Self {
        Self::with_parts(
            LogicalUnitRegistry::new(),
            target_factory,
            config.target_queue_length,
            config.target_workers,
        )
    }

    fn with_parts(
        logical_units: LogicalUnitRegistry,
        target_factory: Arc<dyn TaskFactory>,
        queue_length: usize,
        workers: usize,
    ) -> Self {
        Self {
            logical_units,
            target_factory,
            target_manager: TaskManager::new(workers, TaskSet::new("target", queue_length)),
            running: Mutex::new(false),
        }
    }

    pub fn target_task_set(&self) -> &TaskSet {
        self.target_manager.task_set()
    }

    /// Registered LUNs in ascending order.
    pub fn logical_units(&self) -> Vec<u64> {
        self.logical_units.luns()
    }

    pub fn logical_unit(&self, lun: u64) -> Option<Arc<dyn LogicalUnit>> {
        self.logical_units.get(lun)
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Queues `command`. Every failure is reported to the initiator through `port`.
    pub async fn enqueue(&self, port: Arc<dyn TargetTransportPort>, command: Command) {
        match command.nexus.lun {
            None => {
                if task::submit(
                    self.target_factory.as_ref(),
                    self.target_task_set(),
                    port,
                    command,
                )
                .await
                {
                    debug!("enqueued target command");
                }
            }
            Some(lun) => match self.logical_units.get(lun) {
                Some(unit) => {
                    unit.enqueue(port, command).await;
                    debug!(lun, "enqueued command to logical unit");
                }
                None => {
                    warn!(lun, ?command, "command addressed to unknown logical unit");
                    port.check_condition(
                        &command.nexus,
                        command.command_reference_number,
                        SenseError::LogicalUnitNotSupported,
                    )
                    .await;
                }
            },
        }
    }

    /// Executes a task management function.
    ///
    /// Functions addressed at a logical unit that is not registered, and
    /// ABORT TASK without a task tag, are rejected.
    #[tracing::instrument(skip(self))]
    pub fn execute(&self, nexus: &Nexus, function: TaskManagementFunction) -> TaskServiceResponse {
        let unit = match nexus.lun.and_then(|lun| self.logical_units.get(lun)) {
            None if function.requires_lun() => {
                warn!("task management function addressed to unknown logical unit");
                return TaskServiceResponse::FunctionRejected;
            }
            unit => unit,
        };
        let response = match (function, unit) {
            (TaskManagementFunction::AbortTask, Some(unit)) if nexus.is_tagged() => {
                unit.abort_task(nexus)
            }
            (TaskManagementFunction::AbortTaskSet, Some(unit)) => unit.abort_task_set(nexus),
            (TaskManagementFunction::ClearTaskSet, Some(unit)) => unit.clear_task_set(nexus),
            (TaskManagementFunction::LogicalUnitReset, Some(unit)) => unit.reset(),
            (TaskManagementFunction::TargetReset, _) => {
                self.reset_all();
                TaskServiceResponse::FunctionComplete
            }
            _ => TaskServiceResponse::FunctionRejected,
        };
        debug!(?response, "task management function executed");
        response
    }

    /// Discards every task of every logical unit and of the target itself.
    pub fn nexus_lost(&self) {
        for (_, unit) in self.logical_units.units() {
            unit.nexus_lost();
        }
        self.target_task_set().clear();
    }

    fn reset_all(&self) {
        for (_, unit) in self.logical_units.units() {
            unit.reset();
        }
        self.target_task_set().clear();
    }

    /// Registers `unit` under `lun`, starting it if the router is running.
    ///
    /// A unit already registered under `lun` is replaced, stopped, and returned.
    #[tracing::instrument(skip(self, unit))]
    pub async fn register_logical_unit(
        &self,
        lun: u64,
        unit: Arc<dyn LogicalUnit>,
    ) -> Option<Arc<dyn LogicalUnit>> {
        let running = self.running.lock().await;
        if *running {
            unit.start();
        }
        let replaced = self.logical_units.insert(lun, unit);
        info!("registered logical unit");
        if let Some(old) = &replaced {
            warn!("replaced previously registered logical unit");
            if *running {
                old.stop().await;
            }
        }
        replaced
    }

    /// Unregisters the unit under `lun` and stops it. Returns `None` if no
    /// unit was registered.
    #[tracing::instrument(skip(self))]
    pub async fn remove_logical_unit(&self, lun: u64) -> Option<Arc<dyn LogicalUnit>> {
        let running = self.running.lock().await;
        let removed = self.logical_units.remove(lun)?;
        if *running {
            removed.stop().await;
        }
        info!("removed logical unit");
        Some(removed)
    }

    /// Starts every registered logical unit and the target-level task manager.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if *running {
            return;
        }
        for (lun, unit) in self.logical_units.units() {
            debug!(lun, "starting logical unit");
            unit.start();
        }
        self.target_manager.start();
        *running = true;
        info!(logical_units = self.logical_units.len(), "task router started");
    }

    /// Stops every logical unit, then the target-level task manager, waiting
    /// for running tasks to finish.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if !*running {
            return;
        }
        for (lun, unit) in self.logical_units.units() {
            debug!(lun, "stopping logical unit");
            unit.stop().await;
            debug!(lun, "logical unit finished");
        }
        debug!("signalling target task manager to stop");
        self.target_manager.shutdown().await;
        *running = false;
        info!("task router stopped");
    }
}
