//! The port through which tasks talk back to the initiator.
//!
//! The iSCSI connection layer implements [`TargetTransportPort`]; the scheduler
//! only ever calls [`write_response`](TargetTransportPort::write_response) to
//! report admission failures, everything else is driven by the tasks themselves.

use async_trait::async_trait;

use crate::scsi::{Nexus, SenseError, Status};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transfer was terminated, usually because the task was aborted.
    #[error("data transfer terminated")]
    Terminated,
}

#[async_trait]
pub trait TargetTransportPort: Send + Sync {
    /// Reads data sent by the initiator (Data-Out) into `output`.
    async fn read_data(
        &self,
        nexus: &Nexus,
        command_reference_number: u32,
        output: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Sends `input` to the initiator (Data-In).
    async fn write_data(
        &self,
        nexus: &Nexus,
        command_reference_number: u32,
        input: &[u8],
    ) -> Result<(), TransportError>;

    /// Cancels any outstanding transfer for the command. Transfers issued for
    /// it afterwards must fail with [`TransportError::Terminated`].
    fn terminate_data_transfer(&self, nexus: &Nexus, command_reference_number: u32);

    /// Completes the command with `status` and optional sense data.
    async fn write_response(
        &self,
        nexus: &Nexus,
        command_reference_number: u32,
        status: Status,
        sense_data: Option<Vec<u8>>,
    );

    /// Completes the command with `CHECK CONDITION` carrying `sense`.
    async fn check_condition(&self, nexus: &Nexus, command_reference_number: u32, sense: SenseError) {
        self.write_response(
            nexus,
            command_reference_number,
            Status::CheckCondition,
            Some(sense.encode()),
        )
        .await;
    }
}
