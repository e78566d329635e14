//! Device server tasks every logical unit answers, enough for an initiator's
//! discovery sequence. There is no backing store behind them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::scsi::{OpCode, SenseError, Status};
use crate::task::{ScsiTask, Task, TaskBase, TaskRegistry, TestUnitReadyTask};

/// How a logical unit identifies itself in INQUIRY data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// T10 vendor identification, at most 8 ASCII characters.
    pub vendor: String,
    /// At most 16 ASCII characters.
    pub product: String,
    /// At most 4 ASCII characters.
    pub revision: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            vendor: "SCSITGT".to_owned(),
            product: "VIRTUAL DISK".to_owned(),
            revision: "0001".to_owned(),
        }
    }
}

/// Standard INQUIRY data as described in SPC-2 7.3.2, table 46.
///
/// Only the fields this target sets are modelled; everything else is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardInquiryData {
    /// Contains both the PERIPHERAL QUALIFIER (bits 7:5) and
    /// PERIPHERAL DEVICE TYPE (bits 4:0) fields.
    ///
    /// Zero: a direct access device is currently connected to this logical unit
    /// (see SPC-2 tables 47 and 48).
    pub peripheral_info: u8,
    /// "The VERSION field indicates the implemented version of this standard";
    /// 0x04 claims SPC-2.
    pub version: u8,
    /// "A COMMAND QUEUING (CMDQUE) bit of one indicates that the device supports
    /// tagged tasks (command queuing) for this logical unit."
    pub command_queuing: bool,
    pub vendor: [u8; 8],
    pub product: [u8; 16],
    pub revision: [u8; 4],
}

impl StandardInquiryData {
    pub const LENGTH: usize = 36;

    /// The 2h RESPONSE DATA FORMAT required by SPC-2.
    const RESPONSE_DATA_FORMAT: u8 = 0x02;
    const CMDQUE: u8 = 0x02;

    pub fn new(identity: &DeviceIdentity) -> Self {
        Self {
            peripheral_info: 0,
            version: 0x04,
            command_queuing: true,
            vendor: ascii_field(&identity.vendor),
            product: ascii_field(&identity.product),
            revision: ascii_field(&identity.revision),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let mut buf = [0u8; Self::LENGTH];
        buf[0] = self.peripheral_info;
        buf[2] = self.version;
        buf[3] = Self::RESPONSE_DATA_FORMAT;
        // ADDITIONAL LENGTH counts the bytes following byte 4.
        buf[4] = (Self::LENGTH - 5) as u8;
        if self.command_queuing {
            buf[7] = Self::CMDQUE;
        }
        buf[8..16].copy_from_slice(&self.vendor);
        buf[16..32].copy_from_slice(&self.product);
        buf[32..36].copy_from_slice(&self.revision);
        buf
    }
}

/// Left-aligned and padded with spaces, as SPC-2 requires for ASCII fields.
/// Non-printable characters become spaces and excess characters are dropped.
fn ascii_field<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [b' '; N];
    for (dst, src) in field.iter_mut().zip(value.bytes()) {
        if src.is_ascii_graphic() || src == b' ' {
            *dst = src;
        }
    }
    field
}

/// "The INQUIRY command requests that information regarding parameters of the
/// target and a component logical unit be sent to the application client."
///
/// Only standard INQUIRY data is supported; a request for vital product data
/// fails with INVALID FIELD IN CDB.
///
/// Defined in SPC-2 7.3
pub struct InquiryTask {
    base: TaskBase,
    identity: Arc<DeviceIdentity>,
}

impl InquiryTask {
    /// "ENABLE VITAL PRODUCT DATA", bit 0 of byte 1.
    const EVPD: u8 = 0x01;

    pub fn create(identity: Arc<DeviceIdentity>, base: TaskBase) -> Arc<dyn Task> {
        Arc::new(Self { base, identity })
    }
}

#[async_trait]
impl ScsiTask for InquiryTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    async fn execute(&self) -> Result<(), SenseError> {
        let cdb = &self.base.command().cdb;
        let flags = cdb.be_field(1, 1).ok_or(SenseError::InvalidFieldInCdb)?;
        let page_code = cdb.be_field(2, 1).ok_or(SenseError::InvalidFieldInCdb)?;
        if flags & u32::from(Self::EVPD) != 0 || page_code != 0 {
            debug!(flags, page_code, "vital product data not supported");
            return Err(SenseError::InvalidFieldInCdb);
        }
        // Byte 3 is reserved in SPC-2 and the high byte of the allocation
        // length from SPC-3 on; reading both covers either.
        let allocation_length = cdb.be_field(3, 2).ok_or(SenseError::InvalidFieldInCdb)?;

        let data = StandardInquiryData::new(&self.identity).to_bytes();
        self.base
            .write_data_truncated(&data, allocation_length as usize)
            .await?;
        self.base.write_response(Status::Good, None).await;
        Ok(())
    }
}

/// The task factory for a logical unit: TEST UNIT READY and INQUIRY.
pub fn device_task_factory(identity: DeviceIdentity) -> TaskRegistry<DeviceIdentity> {
    TaskRegistry::new(Arc::new(identity))
        .register(OpCode::TestUnitReady, TestUnitReadyTask::create)
        .register(OpCode::Inquiry, InquiryTask::create)
}
