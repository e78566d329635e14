//! Command descriptor blocks as received from the transport layer.
//!
//! The scheduler treats a CDB as an opaque blob. Only the operation code is
//! interpreted here, because it selects the task implementation; the few field
//! accessors below exist for the bundled tasks.

use std::fmt;

/// The largest CDB we accept, see SPC-2 4.3.2 table 4 (16 byte commands).
pub const MAX_CDB_SIZE: usize = 16;

/// Operation codes for a Command Descriptor Block, specifying what operation
/// the initiator wants performed, as described in 7.1 of SPC-2.
///
/// This enum is not complete, and is intended to grow
/// as needed
#[repr(u8)]
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// SPC-2 7.25
    TestUnitReady = 0x00,
    /// SBC-2 5.1.6
    Read6 = 0x08,
    /// SBC-2 5.1.17
    Write6 = 0x0A,
    /// SPC-2 7.3
    Inquiry = 0x12,
    /// SPC-2 7.8
    ModeSense6 = 0x1A,
    /// SPC-2 7.12
    PreventAllowMediumRemoval = 0x1E,
    /// SBC-2 5.1.10, table 27
    ReadCapacity10 = 0x25,
    /// SBC-2 5.1.7
    Read10 = 0x28,
    /// SBC-2 5.1.18
    Write10 = 0x2A,
    /// SPC-2 7.9
    ModeSense10 = 0x5A,
    /// SPC-2 7.19
    ReportLuns = 0xA0,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0x00 => OpCode::TestUnitReady,
            0x08 => OpCode::Read6,
            0x0A => OpCode::Write6,
            0x12 => OpCode::Inquiry,
            0x1A => OpCode::ModeSense6,
            0x1E => OpCode::PreventAllowMediumRemoval,
            0x25 => OpCode::ReadCapacity10,
            0x28 => OpCode::Read10,
            0x2A => OpCode::Write10,
            0x5A => OpCode::ModeSense10,
            0xA0 => OpCode::ReportLuns,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// "A command is communicated by sending a command descriptor block
/// to the device server ...."
///
/// The bytes are kept exactly as the initiator sent them.
#[derive(Clone, PartialEq, Eq)]
pub struct Cdb {
    bytes: Vec<u8>,
}

impl Cdb {
    /// Wraps the raw CDB bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// A CDB made of `op` followed by zeroes, sized like the command group
    /// the operation code belongs to.
    pub fn from_op(op: OpCode) -> Self {
        let raw = op as u8;
        let len = match raw >> 5 {
            0 => 6,
            1 | 2 => 10,
            4 => 16,
            5 => 12,
            _ => MAX_CDB_SIZE,
        };
        let mut bytes = vec![0; len];
        bytes[0] = raw;
        Self { bytes }
    }

    /// The raw `OPERATION CODE` byte, or `None` for an empty CDB.
    pub fn operation_code_byte(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// "The `OPERATION CODE` field contains the code value identifying the operation
    /// being requested by the CDB."
    ///
    /// Returns `None` when the CDB is empty or the code is not one we know.
    pub fn operation_code(&self) -> Option<OpCode> {
        self.operation_code_byte()
            .and_then(|b| OpCode::try_from(b).ok())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads a big-endian field of `width` bytes (at most 4) starting at `offset`.
    ///
    /// Returns `None` if the CDB is too short to contain it.
    pub fn be_field(&self, offset: usize, width: usize) -> Option<u32> {
        debug_assert!(width <= 4);
        let field = self.bytes.get(offset..offset + width)?;
        Some(field.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }
}

impl fmt::Debug for Cdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation_code() {
            Some(op) => write!(f, "Cdb({op:?}, {} bytes)", self.bytes.len()),
            None => write!(f, "Cdb({:02x?})", self.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdb_length_follows_group_code() {
        assert_eq!(Cdb::from_op(OpCode::TestUnitReady).len(), 6);
        assert_eq!(Cdb::from_op(OpCode::ReadCapacity10).len(), 10);
        assert_eq!(Cdb::from_op(OpCode::ReportLuns).len(), 12);
    }

    #[test]
    fn unknown_operation_code() {
        let cdb = Cdb::new([0xC7, 0, 0, 0, 0, 0]);
        assert_eq!(cdb.operation_code(), None);
        assert_eq!(cdb.operation_code_byte(), Some(0xC7));
        assert!(Cdb::new(Vec::new()).operation_code().is_none());
    }

    #[test]
    fn big_endian_fields() {
        let cdb = Cdb::new([0x12, 0, 0, 0x01, 0x02, 0]);
        assert_eq!(cdb.be_field(3, 2), Some(0x0102));
        assert_eq!(cdb.be_field(5, 4), None);
    }
}
