//! Sense data returned alongside a `CHECK CONDITION` status.
//!
//! Only fixed format sense data is produced (SPC-2 7.23.2, table 102).

/// Sense keys, SPC-2 table 107.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SenseKey {
    NoSense = 0x0,
    RecoveredError = 0x1,
    NotReady = 0x2,
    MediumError = 0x3,
    HardwareError = 0x4,
    IllegalRequest = 0x5,
    UnitAttention = 0x6,
    DataProtect = 0x7,
    AbortedCommand = 0xB,
}

/// A sense key together with its additional sense code and qualifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Kcq {
    pub key: SenseKey,
    pub code: u8,
    pub qualifier: u8,
}

impl Kcq {
    pub const fn new(key: SenseKey, code: u8, qualifier: u8) -> Self {
        Self {
            key,
            code,
            qualifier,
        }
    }
}

/// Length of fixed format sense data without additional sense bytes.
pub const FIXED_SENSE_DATA_LENGTH: usize = 18;

/// "Current error" response code for fixed format sense data.
const RESPONSE_CODE_CURRENT: u8 = 0x70;

/// Conditions this target reports to initiators through sense data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SenseError {
    #[error("overlapped commands attempted")]
    OverlappedCommandsAttempted,
    #[error("logical unit not supported")]
    LogicalUnitNotSupported,
    #[error("invalid command operation code")]
    InvalidCommandOperationCode,
    #[error("invalid field in cdb")]
    InvalidFieldInCdb,
    #[error("synchronous data transfer error")]
    SynchronousDataTransferError,
    #[error("internal target failure")]
    InternalTargetFailure,
}

impl SenseError {
    pub fn kcq(self) -> Kcq {
        use SenseKey::*;
        match self {
            SenseError::OverlappedCommandsAttempted => Kcq::new(AbortedCommand, 0x4E, 0x00),
            SenseError::LogicalUnitNotSupported => Kcq::new(IllegalRequest, 0x25, 0x00),
            SenseError::InvalidCommandOperationCode => Kcq::new(IllegalRequest, 0x20, 0x00),
            SenseError::InvalidFieldInCdb => Kcq::new(IllegalRequest, 0x24, 0x00),
            SenseError::SynchronousDataTransferError => Kcq::new(AbortedCommand, 0x1B, 0x00),
            SenseError::InternalTargetFailure => Kcq::new(AbortedCommand, 0x44, 0x00),
        }
    }

    /// Encodes the condition as current, fixed format sense data.
    ///
    /// The `INFORMATION` and `COMMAND-SPECIFIC INFORMATION` fields are left
    /// zeroed and the `VALID` bit clear.
    pub fn encode(self) -> Vec<u8> {
        let kcq = self.kcq();
        let mut buf = vec![0u8; FIXED_SENSE_DATA_LENGTH];
        buf[0] = RESPONSE_CODE_CURRENT;
        buf[2] = kcq.key as u8;
        // ADDITIONAL SENSE LENGTH: bytes 8..=17
        buf[7] = (FIXED_SENSE_DATA_LENGTH - 8) as u8;
        buf[12] = kcq.code;
        buf[13] = kcq.qualifier;
        buf
    }

    /// Recovers the condition from fixed format sense data produced by [`encode`](Self::encode).
    pub fn decode(buf: &[u8]) -> Option<SenseError> {
        if buf.len() < FIXED_SENSE_DATA_LENGTH || buf[0] & 0x7F != RESPONSE_CODE_CURRENT {
            return None;
        }
        let (key, code, qualifier) = (buf[2] & 0x0F, buf[12], buf[13]);
        [
            SenseError::OverlappedCommandsAttempted,
            SenseError::LogicalUnitNotSupported,
            SenseError::InvalidCommandOperationCode,
            SenseError::InvalidFieldInCdb,
            SenseError::SynchronousDataTransferError,
            SenseError::InternalTargetFailure,
        ]
        .into_iter()
        .find(|e| {
            let kcq = e.kcq();
            kcq.key as u8 == key && kcq.code == code && kcq.qualifier == qualifier
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapped_commands_layout() {
        let buf = SenseError::OverlappedCommandsAttempted.encode();
        assert_eq!(buf.len(), FIXED_SENSE_DATA_LENGTH);
        assert_eq!(buf[0], 0x70);
        assert_eq!(buf[2], 0x0B);
        assert_eq!(buf[7], 10);
        assert_eq!((buf[12], buf[13]), (0x4E, 0x00));
    }

    #[test]
    fn decode_recognizes_logical_unit_not_supported() {
        let buf = SenseError::LogicalUnitNotSupported.encode();
        assert_eq!(
            SenseError::decode(&buf),
            Some(SenseError::LogicalUnitNotSupported)
        );
        assert_eq!(SenseError::decode(&buf[..10]), None);
    }
}
