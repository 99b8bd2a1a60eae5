// Quotactl Operations - per-filesystem quota capability set

use crate::cmd::{QuotaOpcode, QuotaType};
use crate::ident::KernelQid;
use crate::record::{ExtendedQuotaRecord, ExtendedQuotaState, ExtendedQuotaStateV, QuotaInfo};
use crate::superblock::{QuotaPath, SuperBlock};
use crate::{QuotaError, QuotaResult};

bitflags::bitflags! {
    /// Operations a filesystem's quota implementation provides.
    ///
    /// The dispatcher consults these before calling into [`QuotaOps`]; an
    /// operation whose bit is clear is never called.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct QuotaCaps: u32 {
        /// Enable using a quota file named by path
        const ON          = 1 << 0;
        /// Enable using quota metadata stored inside the filesystem
        const ON_META     = 1 << 1;
        const OFF         = 1 << 2;
        const GET_FORMAT  = 1 << 3;
        const GET_INFO    = 1 << 4;
        const SET_INFO    = 1 << 5;
        const GET_DQBLK   = 1 << 6;
        const SET_DQBLK   = 1 << 7;
        const SYNC        = 1 << 8;
        const GET_XSTATE  = 1 << 9;
        const GET_XSTATEV = 1 << 10;
        const SET_XSTATE  = 1 << 11;
        const RM_XQUOTA   = 1 << 12;
        const XSYNC       = 1 << 13;
        /// In-core quota state is always coherent with storage; an
        /// extended sync has nothing to do
        const COHERENT    = 1 << 14;
    }
}

/// Quota operations of one filesystem type.
///
/// Every operation defaults to [`QuotaError::NotSupported`], so an
/// implementation only overrides what it advertises in
/// [`capabilities`](QuotaOps::capabilities). Implementations synchronize
/// their own state.
pub trait QuotaOps: Send + Sync {
    fn capabilities(&self) -> QuotaCaps;

    /// Turn on quotas of `qtype` in format `format_id`, reading `path`
    fn quota_on(
        &self,
        _sb: &SuperBlock,
        _qtype: QuotaType,
        _format_id: u32,
        _path: &QuotaPath,
    ) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    /// Turn on quotas of `qtype` kept in filesystem metadata
    fn quota_on_meta(&self, _sb: &SuperBlock, _qtype: QuotaType, _format_id: u32) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    fn quota_off(&self, _sb: &SuperBlock, _qtype: QuotaType) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    fn get_format(&self, _sb: &SuperBlock, _qtype: QuotaType) -> QuotaResult<u32> {
        Err(QuotaError::NotSupported)
    }

    fn get_info(&self, _sb: &SuperBlock, _qtype: QuotaType) -> QuotaResult<QuotaInfo> {
        Err(QuotaError::NotSupported)
    }

    /// Apply the fields selected by `info.valid`
    fn set_info(&self, _sb: &SuperBlock, _qtype: QuotaType, _info: &QuotaInfo) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    fn get_dqblk(&self, _sb: &SuperBlock, _qid: KernelQid) -> QuotaResult<ExtendedQuotaRecord> {
        Err(QuotaError::NotSupported)
    }

    /// Apply the fields selected by `rec.fieldmask`
    fn set_dqblk(
        &self,
        _sb: &SuperBlock,
        _qid: KernelQid,
        _rec: &ExtendedQuotaRecord,
    ) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    fn quota_sync(&self, _sb: &SuperBlock, _qtype: QuotaType) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    fn get_xstate(&self, _sb: &SuperBlock) -> QuotaResult<ExtendedQuotaState> {
        Err(QuotaError::NotSupported)
    }

    fn get_xstatev(&self, _sb: &SuperBlock, _version: u8) -> QuotaResult<ExtendedQuotaStateV> {
        Err(QuotaError::NotSupported)
    }

    /// Enable (`XQuotaOn`) or disable (`XQuotaOff`) accounting/enforcement flags
    fn set_xstate(&self, _sb: &SuperBlock, _flags: u32, _opcode: QuotaOpcode) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    /// Release storage held by quota metadata of the types in `flags`
    fn rm_xquota(&self, _sb: &SuperBlock, _flags: u32) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }

    /// Flush extended quota state on a filesystem that is not coherent
    fn extended_sync(&self, _sb: &SuperBlock) -> QuotaResult<()> {
        Err(QuotaError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superblock::DeviceId;

    struct SyncOnly;

    impl QuotaOps for SyncOnly {
        fn capabilities(&self) -> QuotaCaps {
            QuotaCaps::SYNC
        }

        fn quota_sync(&self, _sb: &SuperBlock, _qtype: QuotaType) -> QuotaResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unimplemented_ops_are_not_supported() {
        let sb = SuperBlock::new(DeviceId::new(8, 1), "ext4", None);
        let ops = SyncOnly;
        assert_eq!(ops.quota_sync(&sb, QuotaType::User), Ok(()));
        assert_eq!(ops.quota_off(&sb, QuotaType::User), Err(QuotaError::NotSupported));
        assert_eq!(ops.get_xstate(&sb), Err(QuotaError::NotSupported));
        assert_eq!(ops.extended_sync(&sb), Err(QuotaError::NotSupported));
    }
}
