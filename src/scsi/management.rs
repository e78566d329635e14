//! Task management functions, SAM-2 chapter 6.

use std::fmt;

/// A task management function requested by an initiator, decoded upstream from
/// the transport's task management request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskManagementFunction {
    AbortTask,
    AbortTaskSet,
    ClearAca,
    ClearTaskSet,
    LogicalUnitReset,
    TargetReset,
    Wakeup,
}

impl TaskManagementFunction {
    /// Whether the function must be addressed at a logical unit (I_T_L or I_T_L_Q nexus).
    pub fn requires_lun(self) -> bool {
        !matches!(self, Self::TargetReset | Self::Wakeup)
    }
}

impl fmt::Display for TaskManagementFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AbortTask => "ABORT TASK",
            Self::AbortTaskSet => "ABORT TASK SET",
            Self::ClearAca => "CLEAR ACA",
            Self::ClearTaskSet => "CLEAR TASK SET",
            Self::LogicalUnitReset => "LOGICAL UNIT RESET",
            Self::TargetReset => "TARGET RESET",
            Self::Wakeup => "WAKEUP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskServiceResponse {
    FunctionComplete,
    FunctionRejected,
}
