//! Target configuration, parsed from the command line.

use clap::Parser;

use crate::lu::DeviceIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "scsi-target", version)]
#[command(about = "SCSI target command scheduler")]
pub struct TargetConfig {
    /// Capacity of the task set for commands addressed to the target itself
    #[arg(long, default_value_t = 32)]
    pub target_queue_length: usize,
    /// Workers executing target-level tasks
    #[arg(long, default_value_t = 1)]
    pub target_workers: usize,
    /// Capacity of each logical unit's task set
    #[arg(long, default_value_t = 64)]
    pub lu_queue_length: usize,
    /// Workers executing each logical unit's tasks
    #[arg(long, default_value_t = 4)]
    pub lu_workers: usize,
    /// Number of logical units to register, numbered from zero
    #[arg(long, default_value_t = 1)]
    pub logical_units: u64,
    /// T10 vendor identification reported by INQUIRY
    #[arg(long, default_value = "SCSITGT")]
    pub vendor: String,
    /// Product identification reported by INQUIRY
    #[arg(long, default_value = "VIRTUAL DISK")]
    pub product: String,
    /// Product revision level reported by INQUIRY
    #[arg(long, default_value = "0001")]
    pub revision: String,
}

impl TargetConfig {
    pub fn device_identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor: self.vendor.clone(),
            product: self.product.clone(),
            revision: self.revision.clone(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        let identity = DeviceIdentity::default();
        Self {
            target_queue_length: 32,
            target_workers: 1,
            lu_queue_length: 64,
            lu_workers: 4,
            logical_units: 1,
            vendor: identity.vendor,
            product: identity.product,
            revision: identity.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_defaults_match_default() {
        let parsed = TargetConfig::try_parse_from(["scsi-target"]).expect("parse");
        assert_eq!(parsed, TargetConfig::default());
        assert_eq!(parsed.device_identity(), DeviceIdentity::default());
    }

    #[test]
    fn overrides() {
        let parsed = TargetConfig::try_parse_from([
            "scsi-target",
            "--lu-workers",
            "8",
            "--logical-units",
            "3",
            "--vendor",
            "ACME",
        ])
        .expect("parse");
        assert_eq!(parsed.lu_workers, 8);
        assert_eq!(parsed.logical_units, 3);
        assert_eq!(parsed.device_identity().vendor, "ACME");
    }
}
