//! Representations for SCSI commands as they arrive at the target.
//!
//! A [`Command`] is what the transport layer hands to the task router once a
//! PDU has been decoded: the nexus it was received on, the CDB, the task
//! attribute and the reference number used to correlate data transfers.

use std::fmt;

use super::command_descriptor::Cdb;
use super::nexus::Nexus;

/// SAM-2 task attributes, 8.6.
///
/// "The task attribute specifies how the task is to be processed relative to
/// other tasks in the task set."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskAttribute {
    /// "A task having the SIMPLE task attribute shall be accepted into the task
    /// set in the dormant task state. The task shall not enter the enabled task
    /// state until all older HEAD OF QUEUE and older ORDERED tasks in the task
    /// set have ended."
    Simple,
    /// "A task having the ORDERED task attribute shall be accepted into the task
    /// set in the dormant task state. The task shall not enter the enabled task
    /// state until all older tasks in the task set have ended."
    Ordered,
    /// "A task having the HEAD OF QUEUE task attribute shall be accepted into the
    /// task set in the enabled task state."
    HeadOfQueue,
    /// Auto contingent allegiance. Recognized, but not supported by this target.
    Aca,
}

/// Error returned when an iSCSI `ATTR` field holds a reserved value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("reserved task attribute value {0}")]
pub struct InvalidTaskAttribute(pub u8);

impl TryFrom<u8> for TaskAttribute {
    type Error = InvalidTaskAttribute;

    /// Decodes the 3 bit `ATTR` field of an iSCSI SCSI Command PDU (RFC 3720 10.3.1).
    ///
    /// Untagged (0) maps to SIMPLE.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 | 1 => Ok(TaskAttribute::Simple),
            2 => Ok(TaskAttribute::Ordered),
            3 => Ok(TaskAttribute::HeadOfQueue),
            4 => Ok(TaskAttribute::Aca),
            other => Err(InvalidTaskAttribute(other)),
        }
    }
}

/// An immutable SCSI command.
#[derive(Clone)]
pub struct Command {
    pub nexus: Nexus,
    pub cdb: Cdb,
    pub task_attribute: TaskAttribute,
    /// Correlates asynchronous data transfers with this command.
    pub command_reference_number: u32,
    /// Reference number of the read half of a bidirectional transfer.
    pub bidi_reference_number: Option<u32>,
}

impl Command {
    pub fn new(
        nexus: Nexus,
        cdb: Cdb,
        task_attribute: TaskAttribute,
        command_reference_number: u32,
    ) -> Self {
        Self {
            nexus,
            cdb,
            task_attribute,
            command_reference_number,
            bidi_reference_number: None,
        }
    }

    pub fn with_bidi_reference_number(mut self, reference: u32) -> Self {
        self.bidi_reference_number = Some(reference);
        self
    }

    /// The attribute used for ordering. Untagged commands are always SIMPLE.
    pub fn effective_attribute(&self) -> TaskAttribute {
        if self.nexus.is_tagged() {
            self.task_attribute
        } else {
            TaskAttribute::Simple
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("nexus", &self.nexus)
            .field("cdb", &self.cdb)
            .field("attr", &self.task_attribute)
            .field("crn", &self.command_reference_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::OpCode;

    #[test]
    fn untagged_commands_are_simple() {
        let nexus = Nexus::new_itl("iqn.init", "iqn.tgt", 0);
        let cmd = Command::new(
            nexus.clone(),
            Cdb::from_op(OpCode::TestUnitReady),
            TaskAttribute::Ordered,
            1,
        );
        assert_eq!(cmd.effective_attribute(), TaskAttribute::Simple);

        let tagged = Command {
            nexus: nexus.with_task_tag(Some(9)),
            ..cmd
        };
        assert_eq!(tagged.effective_attribute(), TaskAttribute::Ordered);
    }

    #[test]
    fn attribute_field_decoding() {
        assert_eq!(TaskAttribute::try_from(0), Ok(TaskAttribute::Simple));
        assert_eq!(TaskAttribute::try_from(3), Ok(TaskAttribute::HeadOfQueue));
        assert_eq!(TaskAttribute::try_from(4), Ok(TaskAttribute::Aca));
        assert_eq!(TaskAttribute::try_from(7), Err(InvalidTaskAttribute(7)));
    }
}
