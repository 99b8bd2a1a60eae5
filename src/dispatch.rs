// Quotactl Dispatcher - command validation, permission and routing

use crate::cmd::{QuotaCommand, QuotaOpcode, QuotaType};
use crate::config::QuotaCtlConfig;
use crate::ident::Caller;
use crate::ops::{QuotaCaps, QuotaOps};
use crate::perm::{check_quotactl_permission, PermitAll, SecurityPolicy};
use crate::record::{
    basic_from_extended, extended_from_basic, quota_type_flag, BasicQuotaRecord,
    ExtendedQuotaRecord, ExtendedQuotaState, ExtendedQuotaStateV, QuotaInfo, FS_DQUOT_VERSION,
};
use crate::resolve::resolve_target;
use crate::superblock::{MountTable, QuotaPath, SuperBlock};
use crate::uaccess::{read_u32, write_u32, UserMemory};
use crate::{QuotaError, QuotaResult};
use std::time::Duration;
use tracing::{debug, trace};

/// The quota control entry point.
///
/// Holds no mutable state of its own; share it behind an `Arc`.
pub struct QuotaCtl<M: MountTable, S: SecurityPolicy = PermitAll> {
    mounts: M,
    policy: S,
    config: QuotaCtlConfig,
}

impl<M: MountTable> QuotaCtl<M, PermitAll> {
    /// Dispatcher with the default configuration and no policy veto
    pub fn new(mounts: M) -> Self {
        QuotaCtlBuilder::new(mounts).build()
    }
}

impl<M: MountTable, S: SecurityPolicy> QuotaCtl<M, S> {
    pub fn mounts(&self) -> &M {
        &self.mounts
    }

    pub fn policy(&self) -> &S {
        &self.policy
    }

    pub fn config(&self) -> &QuotaCtlConfig {
        &self.config
    }

    /// Run one packed command word.
    ///
    /// `special` names the block device of the target filesystem; `None`
    /// is accepted only for a sync, which then covers every filesystem.
    /// Returns the number of bytes written to `addr`.
    pub fn quotactl(
        &self,
        caller: &Caller,
        cmd: u32,
        special: Option<&str>,
        id: u32,
        addr: &mut dyn UserMemory,
    ) -> QuotaResult<usize> {
        let command = QuotaCommand::unpack(cmd);

        #[cfg(feature = "compat")]
        if self.config.compat && command.is_legacy() {
            return crate::compat::compat_quotactl(self, caller, command, special, id, addr);
        }

        self.run(caller, command, special, id, addr)
    }

    /// [`quotactl`](Self::quotactl) with the result folded into a
    /// system-call shaped return: bytes written, or `-errno`
    pub fn sys_quotactl(
        &self,
        caller: &Caller,
        cmd: u32,
        special: Option<&str>,
        id: u32,
        addr: &mut dyn UserMemory,
    ) -> i64 {
        match self.quotactl(caller, cmd, special, id, addr) {
            Ok(written) => written as i64,
            Err(err) => -i64::from(err.errno()),
        }
    }

    /// Primary command path, shared with the legacy shim
    pub(crate) fn run(
        &self,
        caller: &Caller,
        command: QuotaCommand,
        special: Option<&str>,
        id: u32,
        addr: &mut dyn UserMemory,
    ) -> QuotaResult<usize> {
        let Some(special) = special else {
            if command.cmds == QuotaOpcode::Sync.raw() {
                return self.quota_sync_all(command.class).map(|()| 0);
            }
            return Err(QuotaError::NoSuchMount);
        };

        let opcode = command.opcode()?;
        let qtype = self.config.validate_class(opcode, command.class)?;
        debug!(
            target: "quotactl::dispatch",
            opcode = %opcode,
            class = command.class,
            id,
            special,
            "dispatch_start"
        );

        // The quota file is looked up before the target so that path
        // resolution never runs under the mount table lock. Its outcome only
        // matters to filesystems that keep quotas in a file, so a failure is
        // carried along and reported there.
        let path = (opcode == QuotaOpcode::QuotaOn && !addr.is_empty())
            .then(|| addr.read_path().and_then(|name| self.mounts.lookup_path(&name)));

        let sb = resolve_target(&self.mounts, special, opcode, caller, &self.config)?;
        let res = self.do_quotactl(caller, &sb, qtype, opcode, id, addr, path);
        match &res {
            Ok(written) => trace!(target: "quotactl::dispatch", opcode = %opcode, written, "dispatch_done"),
            Err(err) => debug!(
                target: "quotactl::dispatch",
                opcode = %opcode,
                dev = %sb.dev(),
                error = %err,
                "dispatch_failed"
            ),
        }
        res
    }

    /// Run `opcode` against an already resolved filesystem.
    ///
    /// `qtype` has already been checked against the opcode family. Checks
    /// permission, then routes to the filesystem's quota operations. Output
    /// is written to `addr` only after the operation succeeded. `path` is the
    /// pre-resolved quota file of a QuotaOn; a lookup failure carried in it
    /// surfaces only when the filesystem needs the file.
    #[allow(clippy::too_many_arguments)]
    pub fn do_quotactl(
        &self,
        caller: &Caller,
        sb: &SuperBlock,
        qtype: QuotaType,
        opcode: QuotaOpcode,
        id: u32,
        addr: &mut dyn UserMemory,
        path: Option<QuotaResult<QuotaPath>>,
    ) -> QuotaResult<usize> {
        let ops = sb.quota_ops().ok_or(QuotaError::NotSupported)?;
        check_quotactl_permission(sb, qtype, opcode, id, &caller.cred, &self.policy)?;

        let ops: &dyn QuotaOps = &**ops;
        let caps = ops.capabilities();
        let require = |cap: QuotaCaps| {
            if caps.contains(cap) {
                Ok(())
            } else {
                Err(QuotaError::NotSupported)
            }
        };

        match opcode {
            QuotaOpcode::QuotaOn => {
                if caps.contains(QuotaCaps::ON_META) {
                    ops.quota_on_meta(sb, qtype, id)?;
                } else if caps.contains(QuotaCaps::ON) {
                    let path = path.unwrap_or(Err(QuotaError::TransportFault))?;
                    ops.quota_on(sb, qtype, id, &path)?;
                } else {
                    return Err(QuotaError::NotSupported);
                }
                Ok(0)
            }
            QuotaOpcode::QuotaOff => {
                require(QuotaCaps::OFF)?;
                ops.quota_off(sb, qtype)?;
                Ok(0)
            }
            QuotaOpcode::GetFormat => {
                require(QuotaCaps::GET_FORMAT)?;
                let format = ops.get_format(sb, qtype)?;
                write_u32(addr, format)
            }
            QuotaOpcode::GetInfo => {
                require(QuotaCaps::GET_INFO)?;
                let info = ops.get_info(sb, qtype)?;
                addr.copy_to(&info.encode())?;
                Ok(QuotaInfo::SIZE)
            }
            QuotaOpcode::SetInfo => {
                require(QuotaCaps::SET_INFO)?;
                let mut raw = [0u8; QuotaInfo::SIZE];
                addr.copy_from(&mut raw)?;
                ops.set_info(sb, qtype, &QuotaInfo::decode(&raw))?;
                Ok(0)
            }
            QuotaOpcode::GetQuota => {
                require(QuotaCaps::GET_DQBLK)?;
                let qid = caller.cred.user_ns.make_kqid(qtype, id)?;
                let rec = ops.get_dqblk(sb, qid)?;
                addr.copy_to(&basic_from_extended(&rec).encode())?;
                Ok(BasicQuotaRecord::SIZE)
            }
            QuotaOpcode::SetQuota => {
                require(QuotaCaps::SET_DQBLK)?;
                let mut raw = [0u8; BasicQuotaRecord::SIZE];
                addr.copy_from(&mut raw)?;
                let qid = caller.cred.user_ns.make_kqid(qtype, id)?;
                let rec = extended_from_basic(&BasicQuotaRecord::decode(&raw));
                ops.set_dqblk(sb, qid, &rec)?;
                Ok(0)
            }
            QuotaOpcode::Sync => {
                require(QuotaCaps::SYNC)?;
                ops.quota_sync(sb, qtype)?;
                Ok(0)
            }
            QuotaOpcode::XQuotaOn | QuotaOpcode::XQuotaOff => {
                require(QuotaCaps::SET_XSTATE)?;
                let flags = read_u32(addr)?;
                ops.set_xstate(sb, flags, opcode)?;
                Ok(0)
            }
            QuotaOpcode::XQuotaRm => {
                require(QuotaCaps::RM_XQUOTA)?;
                let flags = read_u32(addr)?;
                ops.rm_xquota(sb, flags)?;
                Ok(0)
            }
            QuotaOpcode::XGetQStat => {
                require(QuotaCaps::GET_XSTATE)?;
                let state = ops.get_xstate(sb)?;
                addr.copy_to(&state.encode())?;
                Ok(ExtendedQuotaState::SIZE)
            }
            QuotaOpcode::XGetQStatV => {
                require(QuotaCaps::GET_XSTATEV)?;
                let mut version = [0u8; 1];
                addr.copy_from(&mut version)?;
                if !self.config.supports_qstatv(version[0]) {
                    return Err(QuotaError::InvalidArgument);
                }
                let state = ops.get_xstatev(sb, version[0])?;
                addr.copy_to(&state.encode())?;
                Ok(ExtendedQuotaStateV::SIZE)
            }
            QuotaOpcode::XSetQLim => {
                require(QuotaCaps::SET_DQBLK)?;
                let mut raw = [0u8; ExtendedQuotaRecord::SIZE];
                addr.copy_from(&mut raw)?;
                let qid = caller.cred.user_ns.make_kqid(qtype, id)?;
                ops.set_dqblk(sb, qid, &ExtendedQuotaRecord::decode(&raw))?;
                Ok(0)
            }
            QuotaOpcode::XGetQuota => {
                require(QuotaCaps::GET_DQBLK)?;
                let qid = caller.cred.user_ns.make_kqid(qtype, id)?;
                let mut rec = ops.get_dqblk(sb, qid)?;
                rec.version = FS_DQUOT_VERSION;
                rec.flags = quota_type_flag(qtype);
                rec.id = id;
                addr.copy_to(&rec.encode())?;
                Ok(ExtendedQuotaRecord::SIZE)
            }
            QuotaOpcode::XQuotaSync => {
                if sb.is_read_only() {
                    return Err(QuotaError::ReadOnlyFilesystem);
                }
                if caps.contains(QuotaCaps::COHERENT) {
                    return Ok(0);
                }
                require(QuotaCaps::XSYNC)?;
                ops.extended_sync(sb)?;
                Ok(0)
            }
        }
    }
}

/// Builder for [`QuotaCtl`]
pub struct QuotaCtlBuilder<M: MountTable, S: SecurityPolicy = PermitAll> {
    mounts: M,
    policy: S,
    config: QuotaCtlConfig,
}

impl<M: MountTable> QuotaCtlBuilder<M, PermitAll> {
    pub fn new(mounts: M) -> Self {
        Self {
            mounts,
            policy: PermitAll,
            config: QuotaCtlConfig::default(),
        }
    }
}

impl<M: MountTable, S: SecurityPolicy> QuotaCtlBuilder<M, S> {
    pub fn policy<P: SecurityPolicy>(self, policy: P) -> QuotaCtlBuilder<M, P> {
        QuotaCtlBuilder {
            mounts: self.mounts,
            policy,
            config: self.config,
        }
    }

    pub fn config(mut self, config: QuotaCtlConfig) -> Self {
        self.config = config;
        self
    }

    /// Classes accepted by basic opcodes (capped at 3)
    pub fn basic_max_classes(mut self, n: u32) -> Self {
        self.config.basic_max_classes = n.min(QuotaType::COUNT);
        self
    }

    /// Classes accepted by extended opcodes (capped at 3)
    pub fn extended_max_classes(mut self, n: u32) -> Self {
        self.config.extended_max_classes = n.min(QuotaType::COUNT);
        self
    }

    pub fn freeze_poll_interval(mut self, interval: Duration) -> Self {
        self.config.freeze_poll_interval = interval;
        self
    }

    pub fn compat(mut self, enabled: bool) -> Self {
        self.config.compat = enabled;
        self
    }

    pub fn build(self) -> QuotaCtl<M, S> {
        QuotaCtl {
            mounts: self.mounts,
            policy: self.policy,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Credentials;
    use crate::mock::{EngineCall, MemoryQuotaEngine, MountRegistry, RecordingPolicy};
    use crate::record::{DqblkValid, FieldMask, QFMT_VFS_V1};
    use crate::superblock::DeviceId;
    use crate::uaccess::{NullMemory, UserSlice};
    use std::sync::Arc;

    const DEV: DeviceId = DeviceId::new(8, 0);

    fn setup(
        engine: MemoryQuotaEngine,
    ) -> (Arc<MemoryQuotaEngine>, Arc<RecordingPolicy>, QuotaCtl<Arc<MountRegistry>, Arc<RecordingPolicy>>) {
        let engine = Arc::new(engine);
        let mounts = Arc::new(MountRegistry::new());
        let policy = Arc::new(RecordingPolicy::new());
        mounts.mount("/dev/sda", DEV, "ext4", Some(engine.clone()));
        let ctl = QuotaCtlBuilder::new(mounts).policy(policy.clone()).build();
        (engine, policy, ctl)
    }

    fn root() -> Caller {
        Caller::new(Credentials::root())
    }

    fn sb(ctl: &QuotaCtl<Arc<MountRegistry>, Arc<RecordingPolicy>>) -> Arc<SuperBlock> {
        ctl.mounts().superblock(DEV).unwrap()
    }

    #[test]
    fn test_no_quota_ops_not_supported() {
        let mounts = MountRegistry::new();
        mounts.mount("/dev/sdb", DEV, "tmpfs", None);
        let ctl = QuotaCtl::new(mounts);
        let sb = ctl.mounts().superblock(DEV).unwrap();
        let res = ctl.do_quotactl(
            &root(),
            &sb,
            QuotaType::User,
            QuotaOpcode::GetFormat,
            0,
            &mut NullMemory,
            None,
        );
        assert_eq!(res, Err(QuotaError::NotSupported));
    }

    #[test]
    fn test_class_checked_before_anything() {
        let (engine, policy, ctl) = setup(MemoryQuotaEngine::file_backed());
        let cmd = crate::cmd::qcmd(QuotaOpcode::GetQuota.raw(), 2);
        let res = ctl.quotactl(&root(), cmd, Some("/dev/sda"), 0, &mut NullMemory);
        assert_eq!(res, Err(QuotaError::InvalidArgument));
        assert!(policy.calls().is_empty());
        assert!(engine.calls().is_empty());
        assert_eq!(ctl.mounts().mount_lock_acquisitions(), 0);
    }

    #[test]
    fn test_get_format_writes_u32() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        engine.enable(QuotaType::Group, QFMT_VFS_V1);
        let mut raw = [0u8; 4];
        let res = ctl.do_quotactl(
            &root(),
            &sb(&ctl),
            QuotaType::Group,
            QuotaOpcode::GetFormat,
            0,
            &mut UserSlice::new(&mut raw),
            None,
        );
        assert_eq!(res, Ok(4));
        assert_eq!(u32::from_le_bytes(raw), QFMT_VFS_V1);
    }

    #[test]
    fn test_set_quota_translates_mask() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        engine.enable(QuotaType::User, QFMT_VFS_V1);
        let rec = BasicQuotaRecord {
            bhardlimit: 10,
            bsoftlimit: 5,
            valid: DqblkValid::BLIMITS,
            ..Default::default()
        };
        let mut raw = rec.encode();
        let res = ctl.do_quotactl(
            &root(),
            &sb(&ctl),
            QuotaType::User,
            QuotaOpcode::SetQuota,
            42,
            &mut UserSlice::new(&mut raw),
            None,
        );
        assert_eq!(res, Ok(0));
        let qid = crate::ident::KernelQid { qtype: QuotaType::User, id: 42 };
        assert_eq!(
            engine.calls(),
            vec![EngineCall::SetDqblk(qid, FieldMask::BSOFT | FieldMask::BHARD)]
        );
    }

    fn quota_on(
        ctl: &QuotaCtl<Arc<MountRegistry>, Arc<RecordingPolicy>>,
        path: Option<QuotaResult<QuotaPath>>,
    ) -> QuotaResult<usize> {
        ctl.do_quotactl(
            &root(),
            &sb(ctl),
            QuotaType::User,
            QuotaOpcode::QuotaOn,
            QFMT_VFS_V1,
            &mut NullMemory,
            path,
        )
    }

    #[test]
    fn test_quota_on_without_path_faults() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        assert_eq!(quota_on(&ctl, None), Err(QuotaError::TransportFault));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_quota_on_reports_deferred_lookup_failure() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        let missing = Err(QuotaError::NoSuchDevice("/quota.user".into()));
        assert_eq!(
            quota_on(&ctl, Some(missing)),
            Err(QuotaError::NoSuchDevice("/quota.user".into()))
        );
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_quota_on_meta_ignores_path() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::journaled());
        let missing = Err(QuotaError::NoSuchDevice("/quota.user".into()));
        assert_eq!(quota_on(&ctl, Some(missing)), Ok(0));
        assert_eq!(
            engine.calls(),
            vec![EngineCall::QuotaOnMeta { qtype: QuotaType::User, format_id: QFMT_VFS_V1 }]
        );
    }

    #[test]
    fn test_missing_capability_never_called() {
        let (engine, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        let mut flags = 1u32.to_le_bytes();
        let res = ctl.do_quotactl(
            &root(),
            &sb(&ctl),
            QuotaType::User,
            QuotaOpcode::XQuotaRm,
            0,
            &mut UserSlice::new(&mut flags),
            None,
        );
        assert_eq!(res, Err(QuotaError::NotSupported));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_sys_quotactl_errno() {
        let (_, _, ctl) = setup(MemoryQuotaEngine::file_backed());
        let cmd = crate::cmd::qcmd(QuotaOpcode::GetQuota.raw(), 0);
        let ret = ctl.sys_quotactl(&root(), cmd, Some("/dev/nope"), 0, &mut NullMemory);
        assert_eq!(ret, -i64::from(libc::ENOENT));
        let ret = ctl.sys_quotactl(&root(), cmd, None, 0, &mut NullMemory);
        assert_eq!(ret, -i64::from(libc::ENODEV));
    }

    #[test]
    fn test_builder_caps_class_counts() {
        let ctl = QuotaCtlBuilder::new(MountRegistry::new())
            .basic_max_classes(9)
            .extended_max_classes(1)
            .compat(false)
            .build();
        assert_eq!(ctl.config().basic_max_classes, 3);
        assert_eq!(ctl.config().extended_max_classes, 1);
        assert!(!ctl.config().compat);
    }
}
