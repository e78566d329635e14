//! Nexus identification, SAM-2 4.12.

use std::fmt;

/// Identifies the scope of a command: an I_T, I_T_L, or I_T_L_Q nexus.
///
/// An I_T nexus has neither a logical unit number nor a task tag. An I_T_L
/// nexus has no task tag; commands on it are "untagged" and always treated
/// as SIMPLE.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Nexus {
    pub initiator: String,
    pub target: String,
    /// `None` addresses the target itself rather than one of its logical units.
    pub lun: Option<u64>,
    /// `None` marks an untagged command.
    pub task_tag: Option<u32>,
}

impl Nexus {
    /// Constructs an I_T nexus.
    pub fn new_it(initiator: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            initiator: initiator.into(),
            target: target.into(),
            lun: None,
            task_tag: None,
        }
    }

    /// Constructs an I_T_L nexus.
    pub fn new_itl(initiator: impl Into<String>, target: impl Into<String>, lun: u64) -> Self {
        Self {
            lun: Some(lun),
            ..Self::new_it(initiator, target)
        }
    }

    /// Constructs an I_T_L_Q nexus.
    pub fn new_itlq(
        initiator: impl Into<String>,
        target: impl Into<String>,
        lun: u64,
        task_tag: u32,
    ) -> Self {
        Self {
            lun: Some(lun),
            task_tag: Some(task_tag),
            ..Self::new_it(initiator, target)
        }
    }

    /// Same nexus with the given task tag, or untagged for `None`.
    pub fn with_task_tag(mut self, task_tag: Option<u32>) -> Self {
        self.task_tag = task_tag;
        self
    }

    /// Same nexus addressed at the given logical unit, or the target for `None`.
    pub fn with_lun(mut self, lun: Option<u64>) -> Self {
        self.lun = lun;
        self
    }

    pub fn is_tagged(&self) -> bool {
        self.task_tag.is_some()
    }
}

impl fmt::Debug for Nexus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.initiator, self.target)?;
        if let Some(lun) = self.lun {
            write!(f, ":L{lun}")?;
        }
        if let Some(tag) = self.task_tag {
            write!(f, ":Q{tag}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Nexus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
