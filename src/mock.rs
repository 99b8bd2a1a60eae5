// Quotactl Mock Collaborators - in-memory mount table, quota engine and policy for testing

use crate::cmd::{QuotaOpcode, QuotaType};
use crate::ident::KernelQid;
use crate::ops::{QuotaCaps, QuotaOps};
use crate::perm::{PolicyDecision, SecurityPolicy};
use crate::record::{
    quota_type_flag, ExtendedQuotaRecord, ExtendedQuotaState, ExtendedQuotaStateV, FieldMask,
    InfoFlags, InfoValid, QuotaFileStat, QuotaInfo, XfsQuotaFlags, FS_DQUOT_VERSION,
    FS_QSTAT_VERSION, QFMT_VFS_OLD, QFMT_VFS_V1,
};
use crate::superblock::{DeviceId, MountTable, QuotaPath, SuperBlock, SuperIter, SuperRef};
use crate::time::{next_grace_timer, Clock, SystemClock};
use crate::{EngineError, QuotaError, QuotaResult};
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Default grace period: 7 days in seconds
pub const DEFAULT_GRACE_PERIOD: u64 = 7 * 24 * 60 * 60;

// ============================================================================
// MOUNT TABLE
// ============================================================================

/// In-memory mount table.
///
/// Device paths and quota file paths live in their own maps; only the
/// superblock list counts as the mount table lock.
#[derive(Default)]
pub struct MountRegistry {
    devices: RwLock<HashMap<String, DeviceId>>,
    paths: RwLock<HashMap<String, QuotaPath>>,
    supers: RwLock<Vec<Arc<SuperBlock>>>,
    mount_lock_acquisitions: AtomicU64,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block device node without mounting anything on it
    pub fn add_device(&self, special: &str, dev: DeviceId) {
        self.devices.write().insert(special.to_string(), dev);
    }

    /// Register a file usable as quota metadata
    pub fn add_path(&self, path: &str, dev: DeviceId, ino: u64) {
        self.paths.write().insert(
            path.to_string(),
            QuotaPath {
                dev,
                ino,
                path: path.to_string(),
            },
        );
    }

    /// Mount a filesystem of `fs_type` on `special`
    pub fn mount(
        &self,
        special: &str,
        dev: DeviceId,
        fs_type: &str,
        qcop: Option<Arc<dyn QuotaOps>>,
    ) -> Arc<SuperBlock> {
        self.add_device(special, dev);
        let sb = Arc::new(SuperBlock::new(dev, fs_type, qcop));
        self.supers.write().push(sb.clone());
        sb
    }

    /// Remove the filesystem on `dev`; pinned handles stay valid but inactive
    pub fn unmount(&self, dev: DeviceId) -> Option<Arc<SuperBlock>> {
        let mut supers = self.supers.write();
        let pos = supers.iter().position(|sb| sb.dev() == dev)?;
        let sb = supers.remove(pos);
        sb.deactivate();
        Some(sb)
    }

    pub fn superblock(&self, dev: DeviceId) -> Option<Arc<SuperBlock>> {
        self.supers.read().iter().find(|sb| sb.dev() == dev).cloned()
    }

    /// Total pins held across every mounted filesystem
    pub fn total_pins(&self) -> u32 {
        self.supers.read().iter().map(|sb| sb.pin_count()).sum()
    }

    /// How many times the mount table lock was taken through [`MountTable`]
    pub fn mount_lock_acquisitions(&self) -> u64 {
        self.mount_lock_acquisitions.load(Ordering::SeqCst)
    }

    fn lock_supers(&self) -> parking_lot::RwLockReadGuard<'_, Vec<Arc<SuperBlock>>> {
        self.mount_lock_acquisitions.fetch_add(1, Ordering::SeqCst);
        self.supers.read()
    }
}

impl MountTable for MountRegistry {
    fn lookup_bdev(&self, special: &str) -> QuotaResult<DeviceId> {
        self.devices
            .read()
            .get(special)
            .copied()
            .ok_or_else(|| QuotaError::NoSuchDevice(special.to_string()))
    }

    fn lookup_path(&self, path: &str) -> QuotaResult<QuotaPath> {
        self.paths
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| QuotaError::NoSuchDevice(path.to_string()))
    }

    fn get_super(&self, dev: DeviceId) -> Option<SuperRef> {
        let supers = self.lock_supers();
        supers
            .iter()
            .find(|sb| sb.dev() == dev && sb.is_active())
            .map(|sb| SuperRef::pin(sb.clone()))
    }

    fn iter_supers(&self) -> SuperIter {
        let supers = self.lock_supers();
        SuperIter::new(supers.iter().map(Arc::downgrade).collect())
    }
}

// ============================================================================
// QUOTA ENGINE
// ============================================================================

/// A call that reached [`MemoryQuotaEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    QuotaOn { qtype: QuotaType, format_id: u32, path: String },
    QuotaOnMeta { qtype: QuotaType, format_id: u32 },
    QuotaOff(QuotaType),
    GetFormat(QuotaType),
    GetInfo(QuotaType),
    SetInfo(QuotaType, QuotaInfo),
    GetDqblk(KernelQid),
    SetDqblk(KernelQid, FieldMask),
    QuotaSync(QuotaType),
    GetXState,
    GetXStateV(u8),
    SetXState { flags: u32, opcode: QuotaOpcode },
    RmXQuota(u32),
    ExtendedSync,
}

#[derive(Debug, Clone, Copy)]
struct TypeState {
    /// Active format, `None` while quotas of this type are off
    format: Option<u32>,
    info: QuotaInfo,
    dirty: bool,
}

impl Default for TypeState {
    fn default() -> Self {
        Self {
            format: None,
            info: QuotaInfo {
                bgrace: DEFAULT_GRACE_PERIOD,
                igrace: DEFAULT_GRACE_PERIOD,
                flags: InfoFlags::empty(),
                valid: InfoValid::ALL,
            },
            dirty: false,
        }
    }
}

/// In-memory quota accounting engine with per-type record tables
pub struct MemoryQuotaEngine {
    caps: QuotaCaps,
    clock: Arc<dyn Clock>,
    tables: [RwLock<HashMap<u32, ExtendedQuotaRecord>>; 3],
    types: Mutex<[TypeState; 3]>,
    xflags: Mutex<XfsQuotaFlags>,
    syncs: AtomicU64,
    calls: Mutex<Vec<EngineCall>>,
}

impl MemoryQuotaEngine {
    pub fn new(caps: QuotaCaps) -> Self {
        Self {
            caps,
            clock: Arc::new(SystemClock),
            tables: Default::default(),
            types: Mutex::new([TypeState::default(); 3]),
            xflags: Mutex::new(XfsQuotaFlags::empty()),
            syncs: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Quota file based engine: enabled by path, synced explicitly
    pub fn file_backed() -> Self {
        Self::new(
            QuotaCaps::ON
                | QuotaCaps::OFF
                | QuotaCaps::GET_FORMAT
                | QuotaCaps::GET_INFO
                | QuotaCaps::SET_INFO
                | QuotaCaps::GET_DQBLK
                | QuotaCaps::SET_DQBLK
                | QuotaCaps::SYNC
                | QuotaCaps::GET_XSTATE
                | QuotaCaps::GET_XSTATEV,
        )
    }

    /// Metadata based engine with always-coherent extended state
    pub fn journaled() -> Self {
        Self::new(
            QuotaCaps::ON_META
                | QuotaCaps::OFF
                | QuotaCaps::GET_INFO
                | QuotaCaps::SET_INFO
                | QuotaCaps::GET_DQBLK
                | QuotaCaps::SET_DQBLK
                | QuotaCaps::GET_XSTATE
                | QuotaCaps::GET_XSTATEV
                | QuotaCaps::SET_XSTATE
                | QuotaCaps::RM_XQUOTA
                | QuotaCaps::COHERENT,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Turn quotas of `qtype` on without going through quota control
    pub fn enable(&self, qtype: QuotaType, format_id: u32) {
        self.types.lock()[qtype.index() as usize].format = Some(format_id);
    }

    pub fn is_enabled(&self, qtype: QuotaType) -> bool {
        self.types.lock()[qtype.index() as usize].format.is_some()
    }

    pub fn is_dirty(&self, qtype: QuotaType) -> bool {
        self.types.lock()[qtype.index() as usize].dirty
    }

    /// Seed a record
    pub fn insert(&self, qid: KernelQid, rec: ExtendedQuotaRecord) {
        self.table(qid.qtype).write().insert(qid.id, rec);
    }

    pub fn record(&self, qid: KernelQid) -> Option<ExtendedQuotaRecord> {
        self.table(qid.qtype).read().get(&qid.id).copied()
    }

    pub fn xflags(&self) -> XfsQuotaFlags {
        *self.xflags.lock()
    }

    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn log(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn table(&self, qtype: QuotaType) -> &RwLock<HashMap<u32, ExtendedQuotaRecord>> {
        &self.tables[qtype.index() as usize]
    }

    fn require_active(&self, qtype: QuotaType) -> QuotaResult<TypeState> {
        let state = self.types.lock()[qtype.index() as usize];
        if state.format.is_none() {
            return Err(EngineError::NotActive.into());
        }
        Ok(state)
    }

    fn turn_on(&self, qtype: QuotaType, format_id: u32) -> QuotaResult<()> {
        if !(QFMT_VFS_OLD..=QFMT_VFS_V1).contains(&format_id) {
            return Err(EngineError::Other(libc::EINVAL).into());
        }
        let mut types = self.types.lock();
        let state = &mut types[qtype.index() as usize];
        if state.format.is_some() {
            return Err(EngineError::Busy.into());
        }
        state.format = Some(format_id);
        Ok(())
    }

    fn file_stat(&self, qtype: QuotaType) -> QuotaFileStat {
        let entries = self.table(qtype).read().len() as u64;
        if !self.is_enabled(qtype) {
            return QuotaFileStat::default();
        }
        QuotaFileStat {
            ino: 128 + qtype.index() as u64,
            nblks: entries.div_ceil(32).max(1),
            nextents: 1,
        }
    }

    fn incore(&self) -> u32 {
        self.tables.iter().map(|t| t.read().len() as u32).sum()
    }

    /// Restart or clear grace timers after usage or limits changed
    fn update_timers(&self, rec: &mut ExtendedQuotaRecord, mask: FieldMask, info: &QuotaInfo) {
        let now = self.clock.now_secs();
        if !mask.contains(FieldMask::BTIMER) {
            rec.btimer =
                next_grace_timer(rec.btimer, rec.bcount, rec.blk_softlimit, now, info.bgrace);
        }
        if !mask.contains(FieldMask::ITIMER) {
            rec.itimer =
                next_grace_timer(rec.itimer, rec.icount, rec.ino_softlimit, now, info.igrace);
        }
    }
}

impl QuotaOps for MemoryQuotaEngine {
    fn capabilities(&self) -> QuotaCaps {
        self.caps
    }

    fn quota_on(
        &self,
        _sb: &SuperBlock,
        qtype: QuotaType,
        format_id: u32,
        path: &QuotaPath,
    ) -> QuotaResult<()> {
        self.log(EngineCall::QuotaOn {
            qtype,
            format_id,
            path: path.path.clone(),
        });
        self.turn_on(qtype, format_id)
    }

    fn quota_on_meta(&self, _sb: &SuperBlock, qtype: QuotaType, format_id: u32) -> QuotaResult<()> {
        self.log(EngineCall::QuotaOnMeta { qtype, format_id });
        self.turn_on(qtype, format_id)?;
        let flag = match qtype {
            QuotaType::User => XfsQuotaFlags::UDQ_ACCT,
            QuotaType::Group => XfsQuotaFlags::GDQ_ACCT,
            QuotaType::Project => XfsQuotaFlags::PDQ_ACCT,
        };
        *self.xflags.lock() |= flag;
        Ok(())
    }

    fn quota_off(&self, _sb: &SuperBlock, qtype: QuotaType) -> QuotaResult<()> {
        self.log(EngineCall::QuotaOff(qtype));
        let mut types = self.types.lock();
        let state = &mut types[qtype.index() as usize];
        if state.format.take().is_none() {
            return Err(EngineError::NotActive.into());
        }
        Ok(())
    }

    fn get_format(&self, _sb: &SuperBlock, qtype: QuotaType) -> QuotaResult<u32> {
        self.log(EngineCall::GetFormat(qtype));
        let state = self.require_active(qtype)?;
        state.format.ok_or_else(|| EngineError::NotActive.into())
    }

    fn get_info(&self, _sb: &SuperBlock, qtype: QuotaType) -> QuotaResult<QuotaInfo> {
        self.log(EngineCall::GetInfo(qtype));
        let state = self.require_active(qtype)?;
        let mut info = state.info;
        if state.dirty {
            info.flags |= InfoFlags::INFO_DIRTY;
        }
        info.valid = InfoValid::ALL;
        Ok(info)
    }

    fn set_info(&self, _sb: &SuperBlock, qtype: QuotaType, info: &QuotaInfo) -> QuotaResult<()> {
        self.log(EngineCall::SetInfo(qtype, *info));
        self.require_active(qtype)?;
        let mut types = self.types.lock();
        let state = &mut types[qtype.index() as usize];
        if info.valid.contains(InfoValid::BGRACE) {
            state.info.bgrace = info.bgrace;
        }
        if info.valid.contains(InfoValid::IGRACE) {
            state.info.igrace = info.igrace;
        }
        if info.valid.contains(InfoValid::FLAGS) {
            // only root squash is settable
            state.info.flags = (state.info.flags - InfoFlags::ROOT_SQUASH)
                | (info.flags & InfoFlags::ROOT_SQUASH);
        }
        state.dirty = true;
        Ok(())
    }

    fn get_dqblk(&self, _sb: &SuperBlock, qid: KernelQid) -> QuotaResult<ExtendedQuotaRecord> {
        self.log(EngineCall::GetDqblk(qid));
        self.require_active(qid.qtype)?;
        let mut rec = self.record(qid).unwrap_or_default();
        rec.version = FS_DQUOT_VERSION;
        rec.flags = quota_type_flag(qid.qtype);
        rec.id = qid.id;
        rec.fieldmask = FieldMask::empty();
        Ok(rec)
    }

    fn set_dqblk(
        &self,
        _sb: &SuperBlock,
        qid: KernelQid,
        src: &ExtendedQuotaRecord,
    ) -> QuotaResult<()> {
        let mask = src.fieldmask;
        self.log(EngineCall::SetDqblk(qid, mask));
        let state = self.require_active(qid.qtype)?;

        let mut table = self.table(qid.qtype).write();
        let rec = table.entry(qid.id).or_insert_with(|| ExtendedQuotaRecord {
            id: qid.id,
            ..Default::default()
        });

        if mask.contains(FieldMask::BSOFT) {
            rec.blk_softlimit = src.blk_softlimit;
        }
        if mask.contains(FieldMask::BHARD) {
            rec.blk_hardlimit = src.blk_hardlimit;
        }
        if mask.contains(FieldMask::ISOFT) {
            rec.ino_softlimit = src.ino_softlimit;
        }
        if mask.contains(FieldMask::IHARD) {
            rec.ino_hardlimit = src.ino_hardlimit;
        }
        if mask.contains(FieldMask::BCOUNT) {
            rec.bcount = src.bcount;
        }
        if mask.contains(FieldMask::ICOUNT) {
            rec.icount = src.icount;
        }
        if mask.contains(FieldMask::BTIMER) {
            rec.btimer = src.btimer;
        }
        if mask.contains(FieldMask::ITIMER) {
            rec.itimer = src.itimer;
        }
        if mask.contains(FieldMask::RTBSOFT) {
            rec.rtb_softlimit = src.rtb_softlimit;
        }
        if mask.contains(FieldMask::RTBHARD) {
            rec.rtb_hardlimit = src.rtb_hardlimit;
        }
        if mask.contains(FieldMask::RTBCOUNT) {
            rec.rtbcount = src.rtbcount;
        }
        if mask.contains(FieldMask::RTBTIMER) {
            rec.rtbtimer = src.rtbtimer;
        }
        if mask.contains(FieldMask::BWARNS) {
            rec.bwarns = src.bwarns;
        }
        if mask.contains(FieldMask::IWARNS) {
            rec.iwarns = src.iwarns;
        }
        if mask.contains(FieldMask::RTBWARNS) {
            rec.rtbwarns = src.rtbwarns;
        }
        self.update_timers(rec, mask, &state.info);
        drop(table);

        self.types.lock()[qid.qtype.index() as usize].dirty = true;
        Ok(())
    }

    fn quota_sync(&self, _sb: &SuperBlock, qtype: QuotaType) -> QuotaResult<()> {
        self.log(EngineCall::QuotaSync(qtype));
        self.types.lock()[qtype.index() as usize].dirty = false;
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_xstate(&self, _sb: &SuperBlock) -> QuotaResult<ExtendedQuotaState> {
        self.log(EngineCall::GetXState);
        let user = self.types.lock()[QuotaType::User.index() as usize].info;
        Ok(ExtendedQuotaState {
            version: FS_QSTAT_VERSION,
            flags: self.xflags(),
            uquota: self.file_stat(QuotaType::User),
            gquota: self.file_stat(QuotaType::Group),
            incoredqs: self.incore(),
            btimelimit: u32::try_from(user.bgrace).unwrap_or(u32::MAX),
            itimelimit: u32::try_from(user.igrace).unwrap_or(u32::MAX),
            ..Default::default()
        })
    }

    fn get_xstatev(&self, _sb: &SuperBlock, version: u8) -> QuotaResult<ExtendedQuotaStateV> {
        self.log(EngineCall::GetXStateV(version));
        let user = self.types.lock()[QuotaType::User.index() as usize].info;
        Ok(ExtendedQuotaStateV {
            version,
            flags: self.xflags(),
            incoredqs: self.incore(),
            uquota: self.file_stat(QuotaType::User),
            gquota: self.file_stat(QuotaType::Group),
            pquota: self.file_stat(QuotaType::Project),
            btimelimit: u32::try_from(user.bgrace).unwrap_or(u32::MAX),
            itimelimit: u32::try_from(user.igrace).unwrap_or(u32::MAX),
            ..Default::default()
        })
    }

    fn set_xstate(&self, _sb: &SuperBlock, flags: u32, opcode: QuotaOpcode) -> QuotaResult<()> {
        self.log(EngineCall::SetXState { flags, opcode });
        let requested = u16::try_from(flags)
            .ok()
            .and_then(XfsQuotaFlags::from_bits)
            .ok_or(QuotaError::InvalidArgument)?;
        let mut xflags = self.xflags.lock();
        match opcode {
            QuotaOpcode::XQuotaOn => *xflags |= requested,
            QuotaOpcode::XQuotaOff => *xflags -= requested,
            _ => return Err(QuotaError::InvalidArgument),
        }
        Ok(())
    }

    fn rm_xquota(&self, _sb: &SuperBlock, flags: u32) -> QuotaResult<()> {
        self.log(EngineCall::RmXQuota(flags));
        for qtype in QuotaType::ALL {
            if flags & u32::from(quota_type_flag(qtype)) == 0 {
                continue;
            }
            if self.is_enabled(qtype) {
                return Err(EngineError::Busy.into());
            }
            self.table(qtype).write().clear();
        }
        Ok(())
    }

    fn extended_sync(&self, _sb: &SuperBlock) -> QuotaResult<()> {
        self.log(EngineCall::ExtendedSync);
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// SECURITY POLICY
// ============================================================================

/// A policy hook consultation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCall {
    pub opcode: QuotaOpcode,
    pub class: u32,
    pub id: u32,
    /// Target device, `None` for broadcast sync
    pub dev: Option<DeviceId>,
}

/// Policy that records every consultation and denies a configurable set of opcodes
#[derive(Default)]
pub struct RecordingPolicy {
    denied: RwLock<Vec<QuotaOpcode>>,
    calls: Mutex<Vec<PolicyCall>>,
}

impl RecordingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, opcode: QuotaOpcode) {
        self.denied.write().push(opcode);
    }

    pub fn allow_all(&self) {
        self.denied.write().clear();
    }

    pub fn calls(&self) -> Vec<PolicyCall> {
        self.calls.lock().clone()
    }
}

impl SecurityPolicy for RecordingPolicy {
    fn authorize(
        &self,
        opcode: QuotaOpcode,
        class: u32,
        id: u32,
        sb: Option<&SuperBlock>,
    ) -> PolicyDecision {
        self.calls.lock().push(PolicyCall {
            opcode,
            class,
            id,
            dev: sb.map(|sb| sb.dev()),
        });
        if self.denied.read().contains(&opcode) {
            PolicyDecision::Deny
        } else {
            PolicyDecision::Allow
        }
    }
}
