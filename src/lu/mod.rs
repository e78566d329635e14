//! Logical units: each owns a task set and the manager that drains it.

mod device;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::scsi::{Command, Nexus, TaskServiceResponse};
use crate::task::{self, TaskFactory, TaskManager, TaskSet, TaskSetError};
use crate::transport::TargetTransportPort;

pub use device::{DeviceIdentity, InquiryTask, StandardInquiryData, device_task_factory};

#[async_trait]
pub trait LogicalUnit: Send + Sync {
    /// Turns `command` into a task and queues it. Failures are reported to the
    /// initiator through `port`.
    async fn enqueue(&self, port: Arc<dyn TargetTransportPort>, command: Command);

    /// ABORT TASK for the task addressed by an I_T_L_Q nexus.
    fn abort_task(&self, nexus: &Nexus) -> TaskServiceResponse;

    fn abort_task_set(&self, nexus: &Nexus) -> TaskServiceResponse;

    fn clear_task_set(&self, nexus: &Nexus) -> TaskServiceResponse;

    /// LOGICAL UNIT RESET.
    fn reset(&self) -> TaskServiceResponse;

    /// Called when an I_T nexus is lost; discards every task.
    fn nexus_lost(&self);

    fn start(&self);

    async fn stop(&self);
}

/// Logical units keyed by LUN, shared between the router and the target-level
/// tasks that report on them.
#[derive(Clone, Default)]
pub struct LogicalUnitRegistry(Arc<DashMap<u64, Arc<dyn LogicalUnit>>>);

impl LogicalUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, lun: u64) -> Option<Arc<dyn LogicalUnit>> {
        self.0.get(&lun).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, lun: u64) -> bool {
        self.0.contains_key(&lun)
    }

    /// Returns the unit previously registered under `lun`, if any.
    pub fn insert(&self, lun: u64, unit: Arc<dyn LogicalUnit>) -> Option<Arc<dyn LogicalUnit>> {
        self.0.insert(lun, unit)
    }

    pub fn remove(&self, lun: u64) -> Option<Arc<dyn LogicalUnit>> {
        self.0.remove(&lun).map(|(_, unit)| unit)
    }

    /// Registered LUNs in ascending order.
    pub fn luns(&self) -> Vec<u64> {
        let mut luns: Vec<u64> = self.0.iter().map(|entry| *entry.key()).collect();
        luns.sort_unstable();
        luns
    }

    /// A snapshot of the registered units, so no map shard stays locked
    /// while the caller awaits.
    pub fn units(&self) -> Vec<(u64, Arc<dyn LogicalUnit>)> {
        self.0
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for LogicalUnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogicalUnitRegistry").field(&self.luns()).finish()
    }
}

/// A logical unit backed by one [`TaskSet`] and one [`TaskManager`].
pub struct DefaultLogicalUnit {
    lun: u64,
    manager: TaskManager,
    factory: Arc<dyn TaskFactory>,
}

impl DefaultLogicalUnit {
    pub fn new(lun: u64, queue_length: usize, workers: usize, factory: Arc<dyn TaskFactory>) -> Self {
        let task_set = TaskSet::new(format!("lun {lun}"), queue_length);
        Self {
            lun,
            manager: TaskManager::new(workers, task_set),
            factory,
        }
    }

    pub fn lun(&self) -> u64 {
        self.lun
    }

    pub fn task_set(&self) -> &TaskSet {
        self.manager.task_set()
    }

    pub fn is_running(&self) -> bool {
        self.manager.is_running()
    }
}

impl fmt::Debug for DefaultLogicalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLogicalUnit")
            .field("lun", &self.lun)
            .field("task_set", self.task_set())
            .finish()
    }
}

#[async_trait]
impl LogicalUnit for DefaultLogicalUnit {
    async fn enqueue(&self, port: Arc<dyn TargetTransportPort>, command: Command) {
        debug!(lun = self.lun, ?command, "enqueuing command");
        task::submit(self.factory.as_ref(), self.task_set(), port, command).await;
    }

    fn abort_task(&self, nexus: &Nexus) -> TaskServiceResponse {
        match self.task_set().remove(nexus) {
            Ok(_) => TaskServiceResponse::FunctionComplete,
            // Already finished; there is nothing left to abort.
            Err(TaskSetError::NoSuchTask(_)) => TaskServiceResponse::FunctionComplete,
            Err(_) => TaskServiceResponse::FunctionRejected,
        }
    }

    fn abort_task_set(&self, nexus: &Nexus) -> TaskServiceResponse {
        self.task_set().abort_all(nexus);
        TaskServiceResponse::FunctionComplete
    }

    fn clear_task_set(&self, nexus: &Nexus) -> TaskServiceResponse {
        debug!(lun = self.lun, %nexus, "clearing task set");
        self.task_set().clear();
        TaskServiceResponse::FunctionComplete
    }

    #[tracing::instrument(skip(self), fields(lun = self.lun))]
    fn reset(&self) -> TaskServiceResponse {
        let discarded = self.task_set().clear();
        info!(discarded, "logical unit reset");
        TaskServiceResponse::FunctionComplete
    }

    fn nexus_lost(&self) {
        self.task_set().clear();
    }

    #[tracing::instrument(skip(self), fields(lun = self.lun))]
    fn start(&self) {
        self.manager.start();
    }

    #[tracing::instrument(skip(self), fields(lun = self.lun))]
    async fn stop(&self) {
        debug!("signalling logical unit task manager to stop");
        self.manager.shutdown().await;
        debug!("logical unit task manager finished");
    }
}
