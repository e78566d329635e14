//! Tasks addressed to the target itself rather than to a logical unit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ScsiTask, Task, TaskBase, TaskRegistry, TestUnitReadyTask};
use crate::lu::LogicalUnitRegistry;
use crate::scsi::{OpCode, SenseError, Status};

/// Task factory for the target-level task set.
pub type TargetTaskFactory = TaskRegistry<LogicalUnitRegistry>;

/// Builds the task factory for the target-level task set.
///
/// The factory keeps a handle on `logical_units`, so REPORT LUNS always
/// reflects the current registrations.
pub fn target_task_factory(logical_units: LogicalUnitRegistry) -> TargetTaskFactory {
    TaskRegistry::new(Arc::new(logical_units))
        .register(OpCode::TestUnitReady, TestUnitReadyTask::create)
        .register(OpCode::ReportLuns, ReportLunsTask::create)
}

/// "The REPORT LUNS command requests that the peripheral device logical unit
/// inventory be sent to the application client."
///
/// Defined in SPC-2 7.19
pub struct ReportLunsTask {
    base: TaskBase,
    logical_units: Arc<LogicalUnitRegistry>,
}

impl ReportLunsTask {
    /// Byte length of the parameter data header and of each LUN entry.
    const ENTRY_LENGTH: usize = 8;

    /// "SELECT REPORT 01h: only well known logical units". None exist here.
    const SELECT_WELL_KNOWN: u32 = 0x01;

    pub fn create(logical_units: Arc<LogicalUnitRegistry>, base: TaskBase) -> Arc<dyn Task> {
        Arc::new(Self {
            base,
            logical_units,
        })
    }

    /// The LUN inventory as sent to the initiator, SPC-2 table 85.
    fn parameter_data(luns: &[u64]) -> Vec<u8> {
        let list_length = (luns.len() * Self::ENTRY_LENGTH) as u32;
        let mut data = Vec::with_capacity(Self::ENTRY_LENGTH + luns.len() * Self::ENTRY_LENGTH);
        data.extend_from_slice(&list_length.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        for lun in luns {
            data.extend_from_slice(&encode_lun(*lun));
        }
        data
    }
}

/// Single level LUN structure, SAM-2 4.9.6.
///
/// LUNs below 256 use the peripheral device addressing method and LUNs below
/// 16384 the flat space addressing method. Anything larger is assumed to
/// already be an eight byte LUN structure.
fn encode_lun(lun: u64) -> [u8; 8] {
    let mut entry = [0u8; 8];
    match lun {
        0..=0xFF => entry[1] = lun as u8,
        0x100..=0x3FFF => {
            entry[0] = 0x40 | (lun >> 8) as u8;
            entry[1] = lun as u8;
        }
        _ => entry = lun.to_be_bytes(),
    }
    entry
}

#[async_trait]
impl ScsiTask for ReportLunsTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    async fn execute(&self) -> Result<(), SenseError> {
        let cdb = &self.base.command().cdb;
        let select_report = cdb.be_field(2, 1).ok_or(SenseError::InvalidFieldInCdb)?;
        let allocation_length = cdb.be_field(6, 4).ok_or(SenseError::InvalidFieldInCdb)?;

        let luns = if select_report == Self::SELECT_WELL_KNOWN {
            warn!("unsupported request to report well known logical units");
            Vec::new()
        } else {
            self.logical_units.luns()
        };
        debug!(?luns, allocation_length, "reporting logical units");

        // Running out of allocation length is not reported to the initiator.
        let data = Self::parameter_data(&luns);
        self.base
            .write_data_truncated(&data, allocation_length as usize)
            .await?;
        self.base.write_response(Status::Good, None).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::{Cdb, Command, Nexus, TaskAttribute};
    use crate::task::TaskFactory;
    use crate::test_utils::{MockLogicalUnit, RecordingPort};

    fn report_luns(select_report: u8, allocation_length: u32) -> Command {
        let mut cdb = [0u8; 12];
        cdb[0] = OpCode::ReportLuns as u8;
        cdb[2] = select_report;
        cdb[6..10].copy_from_slice(&allocation_length.to_be_bytes());
        Command::new(
            Nexus::new_it("init", "tgt").with_task_tag(Some(1)),
            Cdb::new(cdb),
            TaskAttribute::Simple,
            8,
        )
    }

    fn registry(luns: &[u64]) -> LogicalUnitRegistry {
        let registry = LogicalUnitRegistry::new();
        for lun in luns {
            registry.insert(*lun, Arc::new(MockLogicalUnit::default()));
        }
        registry
    }

    async fn run(registry: LogicalUnitRegistry, command: Command) -> Arc<RecordingPort> {
        let port = Arc::new(RecordingPort::new());
        target_task_factory(registry)
            .create(port.clone(), command)
            .expect("report luns task")
            .run()
            .await;
        port
    }

    #[test]
    fn lun_addressing_methods() {
        assert_eq!(encode_lun(0), [0; 8]);
        assert_eq!(encode_lun(5), [0, 5, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode_lun(0x1234), [0x52, 0x34, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn reports_registered_luns_in_order() {
        let port = run(registry(&[3, 0, 1]), report_luns(0, 256)).await;

        let data = port.data();
        assert_eq!(data.len(), 1);
        let (crn, bytes) = &data[0];
        assert_eq!(*crn, 8);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &24u32.to_be_bytes());
        assert_eq!(bytes[9], 0);
        assert_eq!(bytes[17], 1);
        assert_eq!(bytes[25], 3);
        assert_eq!(port.responses()[0].status, Status::Good);
    }

    #[tokio::test]
    async fn registry_changes_are_visible() {
        let luns = registry(&[0]);
        let factory = target_task_factory(luns.clone());
        luns.insert(4, Arc::new(MockLogicalUnit::default()));

        let port = Arc::new(RecordingPort::new());
        factory
            .create(port.clone(), report_luns(0, 256))
            .expect("task")
            .run()
            .await;
        assert_eq!(&port.data()[0].1[0..4], &16u32.to_be_bytes());
    }

    #[tokio::test]
    async fn well_known_selection_is_empty() {
        let port = run(registry(&[0, 1]), report_luns(0x01, 256)).await;
        assert_eq!(port.data()[0].1, vec![0; 8]);
    }

    #[tokio::test]
    async fn short_allocation_length_truncates_silently() {
        let port = run(registry(&[0, 1]), report_luns(0, 12)).await;
        assert_eq!(port.data()[0].1.len(), 12);
        assert_eq!(port.responses()[0].status, Status::Good);
    }

    #[tokio::test]
    async fn truncated_cdb_is_invalid() {
        let command = Command::new(
            Nexus::new_it("init", "tgt"),
            Cdb::new([OpCode::ReportLuns as u8, 0, 0]),
            TaskAttribute::Simple,
            1,
        );
        let port = run(registry(&[]), command).await;
        assert_eq!(
            port.responses()[0].sense(),
            Some(SenseError::InvalidFieldInCdb)
        );
    }
}
