//! SCSI protocol vocabulary shared by the scheduler, as described in:
//! - SCSI Architecture Model – 2 (SAM-2):
//!   <https://www.t10.org/ftp/t10/document.02/02-148r0.pdf>
//!   Defines nexus scopes, task attributes, task sets, and task management functions.
//!   Everything the task set does about ordering comes from chapter 8 of this document.
//! - SCSI Primary Commands – 2 (SPC-2):
//!   <https://www.rockbox.org/wiki/pub/Main/DataSheets/spc2r20.pdf>
//!   Operation codes, status values and the fixed format sense data layout.
//!
//! Parsing of PDUs and CDB fields happens upstream in the transport layer; the
//! types here are what it hands over.

pub mod command;
mod command_descriptor;
pub mod management;
pub mod nexus;
pub mod sense;
pub mod status;

pub use command::{Command, TaskAttribute};
pub use command_descriptor::{Cdb, MAX_CDB_SIZE, OpCode};
pub use management::{TaskManagementFunction, TaskServiceResponse};
pub use nexus::Nexus;
pub use sense::{Kcq, SenseError, SenseKey};
pub use status::Status;
