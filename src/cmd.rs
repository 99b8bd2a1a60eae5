// Quotactl Commands - opcode space, command word packing and access classes

use crate::{QuotaError, QuotaResult};

/// Shift separating the opcode from the class index in a command word
pub const SUBCMDSHIFT: u32 = 8;
/// Mask selecting the class index from a command word
pub const SUBCMDMASK: u32 = 0x00ff;

/// Prefix byte shared by all extended ("XQM") opcodes
const XQM_PREFIX: u32 = (b'X' as u32) << 8;

const fn xqm_cmd(n: u32) -> u32 {
    XQM_PREFIX + n
}

/// Build a command word from an opcode and class index.
pub const fn qcmd(opcode: u32, class: u32) -> u32 {
    (opcode << SUBCMDSHIFT) | (class & SUBCMDMASK)
}

/// Quota type: the identity dimension a limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaType {
    User = 0,
    Group = 1,
    Project = 2,
}

impl QuotaType {
    /// Number of quota types this crate knows about
    pub const COUNT: u32 = 3;

    pub const ALL: [QuotaType; 3] = [QuotaType::User, QuotaType::Group, QuotaType::Project];

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(QuotaType::User),
            1 => Some(QuotaType::Group),
            2 => Some(QuotaType::Project),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            QuotaType::User => "user",
            QuotaType::Group => "group",
            QuotaType::Project => "project",
        }
    }
}

/// Quota control opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaOpcode {
    /// Write dirty quota state to storage
    Sync,
    /// Turn quotas on; the id carries the format identifier
    QuotaOn,
    QuotaOff,
    GetFormat,
    GetInfo,
    SetInfo,
    /// Read a basic record
    GetQuota,
    /// Write a basic record
    SetQuota,
    /// Set extended state: enable accounting/enforcement flags
    XQuotaOn,
    /// Set extended state: disable accounting/enforcement flags
    XQuotaOff,
    /// Read an extended record
    XGetQuota,
    /// Write an extended record
    XSetQLim,
    XGetQStat,
    /// Free storage used by extended quota metadata
    XQuotaRm,
    XQuotaSync,
    XGetQStatV,
}

impl QuotaOpcode {
    pub const ALL: [QuotaOpcode; 16] = [
        QuotaOpcode::Sync,
        QuotaOpcode::QuotaOn,
        QuotaOpcode::QuotaOff,
        QuotaOpcode::GetFormat,
        QuotaOpcode::GetInfo,
        QuotaOpcode::SetInfo,
        QuotaOpcode::GetQuota,
        QuotaOpcode::SetQuota,
        QuotaOpcode::XQuotaOn,
        QuotaOpcode::XQuotaOff,
        QuotaOpcode::XGetQuota,
        QuotaOpcode::XSetQLim,
        QuotaOpcode::XGetQStat,
        QuotaOpcode::XQuotaRm,
        QuotaOpcode::XQuotaSync,
        QuotaOpcode::XGetQStatV,
    ];

    pub const fn raw(self) -> u32 {
        match self {
            QuotaOpcode::Sync => 0x80_0001,
            QuotaOpcode::QuotaOn => 0x80_0002,
            QuotaOpcode::QuotaOff => 0x80_0003,
            QuotaOpcode::GetFormat => 0x80_0004,
            QuotaOpcode::GetInfo => 0x80_0005,
            QuotaOpcode::SetInfo => 0x80_0006,
            QuotaOpcode::GetQuota => 0x80_0007,
            QuotaOpcode::SetQuota => 0x80_0008,
            QuotaOpcode::XQuotaOn => xqm_cmd(1),
            QuotaOpcode::XQuotaOff => xqm_cmd(2),
            QuotaOpcode::XGetQuota => xqm_cmd(3),
            QuotaOpcode::XSetQLim => xqm_cmd(4),
            QuotaOpcode::XGetQStat => xqm_cmd(5),
            QuotaOpcode::XQuotaRm => xqm_cmd(6),
            QuotaOpcode::XQuotaSync => xqm_cmd(7),
            QuotaOpcode::XGetQStatV => xqm_cmd(8),
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.raw() == raw)
    }

    /// Extended opcodes are validated against the extended class count
    pub const fn is_extended(self) -> bool {
        (self.raw() & 0xff00) == XQM_PREFIX
    }

    /// Whether the command may mutate persistent quota state.
    ///
    /// Write-class commands must not run against a frozen filesystem.
    pub const fn is_write(self) -> bool {
        !matches!(
            self,
            QuotaOpcode::GetFormat
                | QuotaOpcode::GetInfo
                | QuotaOpcode::Sync
                | QuotaOpcode::XGetQStat
                | QuotaOpcode::XGetQStatV
                | QuotaOpcode::XGetQuota
                | QuotaOpcode::XQuotaSync
        )
    }

    /// Commands any caller may invoke without administration privilege
    pub const fn is_unprivileged(self) -> bool {
        matches!(
            self,
            QuotaOpcode::GetFormat
                | QuotaOpcode::Sync
                | QuotaOpcode::GetInfo
                | QuotaOpcode::XGetQStat
                | QuotaOpcode::XGetQStatV
                | QuotaOpcode::XQuotaSync
        )
    }

    /// Reads of a single record, allowed for the caller's own identity
    pub const fn is_self_service(self) -> bool {
        matches!(self, QuotaOpcode::GetQuota | QuotaOpcode::XGetQuota)
    }

    pub fn name(self) -> &'static str {
        match self {
            QuotaOpcode::Sync => "Q_SYNC",
            QuotaOpcode::QuotaOn => "Q_QUOTAON",
            QuotaOpcode::QuotaOff => "Q_QUOTAOFF",
            QuotaOpcode::GetFormat => "Q_GETFMT",
            QuotaOpcode::GetInfo => "Q_GETINFO",
            QuotaOpcode::SetInfo => "Q_SETINFO",
            QuotaOpcode::GetQuota => "Q_GETQUOTA",
            QuotaOpcode::SetQuota => "Q_SETQUOTA",
            QuotaOpcode::XQuotaOn => "Q_XQUOTAON",
            QuotaOpcode::XQuotaOff => "Q_XQUOTAOFF",
            QuotaOpcode::XGetQuota => "Q_XGETQUOTA",
            QuotaOpcode::XSetQLim => "Q_XSETQLIM",
            QuotaOpcode::XGetQStat => "Q_XGETQSTAT",
            QuotaOpcode::XQuotaRm => "Q_XQUOTARM",
            QuotaOpcode::XQuotaSync => "Q_XQUOTASYNC",
            QuotaOpcode::XGetQStatV => "Q_XGETQSTATV",
        }
    }
}

impl core::fmt::Display for QuotaOpcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A command word split into its opcode bits and class index.
///
/// The opcode bits are kept raw: legacy words and unknown opcodes are
/// classified later by whoever consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCommand {
    pub cmds: u32,
    pub class: u32,
}

impl QuotaCommand {
    pub const fn unpack(cmd: u32) -> Self {
        Self {
            cmds: cmd >> SUBCMDSHIFT,
            class: cmd & SUBCMDMASK,
        }
    }

    pub const fn new(opcode: QuotaOpcode, class: u32) -> Self {
        Self {
            cmds: opcode.raw(),
            class,
        }
    }

    pub const fn pack(&self) -> u32 {
        qcmd(self.cmds, self.class)
    }

    /// Decode the opcode bits; unknown opcodes are an invalid argument
    pub fn opcode(&self) -> QuotaResult<QuotaOpcode> {
        QuotaOpcode::from_raw(self.cmds).ok_or(QuotaError::InvalidArgument)
    }

    /// Legacy command words occupy `0x0100..0x3000`
    pub const fn is_legacy(&self) -> bool {
        self.cmds >= 0x0100 && self.cmds < 0x3000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let word = qcmd(QuotaOpcode::GetQuota.raw(), QuotaType::Group.index());
        assert_eq!(word, 0x8000_0701);
        let cmd = QuotaCommand::unpack(word);
        assert_eq!(cmd.class, 1);
        assert_eq!(cmd.opcode(), Ok(QuotaOpcode::GetQuota));
        assert_eq!(cmd.pack(), word);
    }

    #[test]
    fn test_extended_family() {
        assert_eq!(QuotaOpcode::XGetQuota.raw(), 0x5803);
        for op in QuotaOpcode::ALL {
            let expected = op.name().starts_with("Q_X");
            assert_eq!(op.is_extended(), expected, "{op}");
        }
    }

    #[test]
    fn test_read_class_table() {
        let reads: Vec<_> = QuotaOpcode::ALL
            .iter()
            .copied()
            .filter(|op| !op.is_write())
            .collect();
        assert_eq!(
            reads,
            vec![
                QuotaOpcode::Sync,
                QuotaOpcode::GetFormat,
                QuotaOpcode::GetInfo,
                QuotaOpcode::XGetQuota,
                QuotaOpcode::XGetQStat,
                QuotaOpcode::XQuotaSync,
                QuotaOpcode::XGetQStatV,
            ]
        );
        // record reads through the basic path still wait for thaw
        assert!(QuotaOpcode::GetQuota.is_write());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let cmd = QuotaCommand { cmds: 0x80_0042, class: 0 };
        assert_eq!(cmd.opcode(), Err(QuotaError::InvalidArgument));
        assert!(!cmd.is_legacy());
        assert!(QuotaCommand { cmds: 0x0300, class: 0 }.is_legacy());
    }
}
