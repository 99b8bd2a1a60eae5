// Quotactl Configuration - dispatcher limits and tunables

use crate::cmd::{QuotaOpcode, QuotaType};
use crate::record::FS_QSTATV_VERSION1;
use crate::{QuotaError, QuotaResult};
use std::time::Duration;

/// Default number of classes accepted by basic opcodes (user, group)
pub const DEFAULT_BASIC_MAX_CLASSES: u32 = 2;
/// Default number of classes accepted by extended opcodes (user, group, project)
pub const DEFAULT_EXTENDED_MAX_CLASSES: u32 = 3;
/// How often a freeze wait checks the caller's interrupt flag
pub const DEFAULT_FREEZE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCtlConfig {
    /// Class count for basic opcodes, capped at [`QuotaType::COUNT`]
    pub basic_max_classes: u32,
    /// Class count for extended opcodes, capped at [`QuotaType::COUNT`]
    pub extended_max_classes: u32,
    pub freeze_poll_interval: Duration,
    /// Accept legacy command words (needs the `compat` feature)
    pub compat: bool,
    /// Versions accepted by the versioned extended state query
    pub qstatv_versions: Vec<u8>,
}

impl Default for QuotaCtlConfig {
    fn default() -> Self {
        Self {
            basic_max_classes: DEFAULT_BASIC_MAX_CLASSES,
            extended_max_classes: DEFAULT_EXTENDED_MAX_CLASSES,
            freeze_poll_interval: DEFAULT_FREEZE_POLL_INTERVAL,
            compat: cfg!(feature = "compat"),
            qstatv_versions: vec![FS_QSTATV_VERSION1],
        }
    }
}

impl QuotaCtlConfig {
    /// Number of classes the opcode's family accepts
    pub fn max_classes(&self, opcode: QuotaOpcode) -> u32 {
        let max = if opcode.is_extended() {
            self.extended_max_classes
        } else {
            self.basic_max_classes
        };
        max.min(QuotaType::COUNT)
    }

    /// Check `class` against the opcode's family and decode it
    pub fn validate_class(&self, opcode: QuotaOpcode, class: u32) -> QuotaResult<QuotaType> {
        if class >= self.max_classes(opcode) {
            return Err(QuotaError::InvalidArgument);
        }
        QuotaType::from_index(class).ok_or(QuotaError::InvalidArgument)
    }

    pub fn supports_qstatv(&self, version: u8) -> bool {
        self.qstatv_versions.contains(&version)
    }
}
