use std::sync::Arc;

use async_trait::async_trait;

use super::{ScsiTask, Task, TaskBase};
use crate::scsi::{SenseError, Status};

/// "The TEST UNIT READY command provides a means to check if the logical unit is ready."
///
/// There is no medium to spin up, so the answer is always GOOD.
///
/// Defined in SPC2 7.25
pub struct TestUnitReadyTask {
    base: TaskBase,
}

impl TestUnitReadyTask {
    /// Registry constructor; usable with any factory environment.
    pub fn create<E>(_env: Arc<E>, base: TaskBase) -> Arc<dyn Task> {
        Arc::new(Self { base })
    }
}

#[async_trait]
impl ScsiTask for TestUnitReadyTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    async fn execute(&self) -> Result<(), SenseError> {
        self.base.write_response(Status::Good, None).await;
        Ok(())
    }
}
