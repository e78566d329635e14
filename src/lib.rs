//! Command admission and scheduling for a SCSI target.
//!
//! Commands decoded by the transport layer enter through [`TaskRouter`], which
//! hands them to the addressed logical unit or to the target's own task set.
//! Each task set admits tasks subject to SAM-2 task attribute ordering and is
//! drained by a [`TaskManager`](task::TaskManager) onto a bounded pool of workers.

pub mod config;
pub mod lu;
pub mod router;
pub mod scsi;
pub mod task;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use config::TargetConfig;
pub use router::TaskRouter;
