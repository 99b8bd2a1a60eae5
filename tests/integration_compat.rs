#![cfg(feature = "compat")]

use quotactl::cmd::qcmd;
use quotactl::compat::{
    LegacyQuotaInfo, LegacyQuotaRecord, LegacyQuotaStats, LEGACY_STATS_VERSION, QC_GETINFO,
    QC_GETQUOTA, QC_GETSTATS, QC_SETGRACE, QC_SETQLIM, QC_SETQUOTA, QC_SYNC,
};
use quotactl::mock::{EngineCall, MemoryQuotaEngine, MountRegistry};
use quotactl::record::QFMT_VFS_V1;
use quotactl::{
    Caller, Credentials, DeviceId, ExtendedQuotaRecord, KernelQid, NullMemory, QuotaCtl,
    QuotaCtlBuilder, QuotaError, QuotaResult, QuotaType, UserMemory, UserSlice,
};
use std::sync::Arc;

const DEV: DeviceId = DeviceId::new(8, 1);

fn setup() -> (QuotaCtl<Arc<MountRegistry>>, Arc<MountRegistry>, Arc<MemoryQuotaEngine>) {
    let mounts = Arc::new(MountRegistry::new());
    let engine = Arc::new(MemoryQuotaEngine::file_backed());
    engine.enable(QuotaType::User, QFMT_VFS_V1);
    mounts.mount("/dev/sda1", DEV, "ext4", Some(engine.clone()));
    (QuotaCtlBuilder::new(mounts.clone()).build(), mounts, engine)
}

fn legacy(
    ctl: &QuotaCtl<Arc<MountRegistry>>,
    caller: &Caller,
    cmds: u32,
    id: u32,
    addr: &mut dyn UserMemory,
) -> QuotaResult<usize> {
    ctl.quotactl(caller, qcmd(cmds, 0), Some("/dev/sda1"), id, addr)
}

fn user_qid(id: u32) -> KernelQid {
    KernelQid { qtype: QuotaType::User, id }
}

#[test]
fn legacy_get_narrows_record() {
    let (ctl, mounts, engine) = setup();
    engine.insert(
        user_qid(1000),
        ExtendedQuotaRecord {
            blk_hardlimit: u64::from(u32::MAX) + 10,
            blk_softlimit: 300,
            bcount: 1 << 36,
            ino_hardlimit: 40,
            icount: 3,
            ..Default::default()
        },
    );

    let caller = Caller::new(Credentials::new(1000, 1000));
    let mut buf = [0u8; LegacyQuotaRecord::SIZE];
    let res = legacy(&ctl, &caller, QC_GETQUOTA, 1000, &mut UserSlice::new(&mut buf));
    assert_eq!(res, Ok(LegacyQuotaRecord::SIZE));

    let rec = LegacyQuotaRecord::decode(&buf);
    assert_eq!(rec.bhardlimit, u32::MAX);
    assert_eq!(rec.bsoftlimit, 300);
    assert_eq!(rec.curspace, 1 << 36);
    assert_eq!((rec.ihardlimit, rec.curinodes), (40, 3));
    assert_eq!(mounts.total_pins(), 0);
}

#[test]
fn legacy_get_checks_identity() {
    let (ctl, _mounts, engine) = setup();
    let caller = Caller::new(Credentials::new(1000, 1000));
    let mut buf = [0u8; LegacyQuotaRecord::SIZE];
    let res = legacy(&ctl, &caller, QC_GETQUOTA, 1001, &mut UserSlice::new(&mut buf));
    assert_eq!(res, Err(QuotaError::PermissionDenied));
    assert!(engine.calls().is_empty());
}

#[test]
fn legacy_set_requires_privilege() {
    let (ctl, _mounts, engine) = setup();
    let caller = Caller::new(Credentials::new(1000, 1000));
    let mut buf = LegacyQuotaRecord::default().encode();
    let res = legacy(&ctl, &caller, QC_SETQLIM, 1000, &mut UserSlice::new(&mut buf));
    assert_eq!(res, Err(QuotaError::PermissionDenied));
    assert!(engine.calls().is_empty());
}

#[test]
fn legacy_set_limits_keeps_usage() {
    let (ctl, _mounts, engine) = setup();
    engine.insert(
        user_qid(42),
        ExtendedQuotaRecord {
            bcount: 900,
            icount: 9,
            ..Default::default()
        },
    );
    let update = LegacyQuotaRecord {
        bhardlimit: 2000,
        bsoftlimit: 1000,
        ihardlimit: 50,
        isoftlimit: 40,
        curspace: 1,
        curinodes: 1,
        ..Default::default()
    };
    let mut buf = update.encode();
    let root = Caller::new(Credentials::root());
    assert_eq!(legacy(&ctl, &root, QC_SETQLIM, 42, &mut UserSlice::new(&mut buf)), Ok(0));

    let stored = engine.record(user_qid(42)).unwrap();
    assert_eq!((stored.blk_hardlimit, stored.blk_softlimit), (2000, 1000));
    assert_eq!((stored.ino_hardlimit, stored.ino_softlimit), (50, 40));
    assert_eq!((stored.bcount, stored.icount), (900, 9));
}

#[test]
fn legacy_full_set_applies_usage() {
    let (ctl, _mounts, engine) = setup();
    let update = LegacyQuotaRecord {
        bhardlimit: 10,
        curspace: 4096,
        curinodes: 2,
        ..Default::default()
    };
    let mut buf = update.encode();
    let root = Caller::new(Credentials::root());
    assert_eq!(legacy(&ctl, &root, QC_SETQUOTA, 5, &mut UserSlice::new(&mut buf)), Ok(0));

    let stored = engine.record(user_qid(5)).unwrap();
    assert_eq!(stored.blk_hardlimit, 10);
    assert_eq!((stored.bcount, stored.icount), (4096, 2));
}

#[test]
fn legacy_info_reports_dirty_flag() {
    let (ctl, _mounts, engine) = setup();
    let root = Caller::new(Credentials::root());

    let grace = LegacyQuotaInfo {
        bgrace: 600,
        igrace: 1200,
        flags: 0xFFFF,
        ..Default::default()
    };
    let mut buf = grace.encode();
    assert_eq!(legacy(&ctl, &root, QC_SETGRACE, 0, &mut UserSlice::new(&mut buf)), Ok(0));

    let mut out = [0u8; LegacyQuotaInfo::SIZE];
    let unprivileged = Caller::new(Credentials::new(1000, 1000));
    let res = legacy(&ctl, &unprivileged, QC_GETINFO, 0, &mut UserSlice::new(&mut out));
    assert_eq!(res, Ok(LegacyQuotaInfo::SIZE));

    let info = LegacyQuotaInfo::decode(&out);
    assert_eq!((info.bgrace, info.igrace), (600, 1200));
    assert_eq!(info.flags, 0x0010);
    assert!(engine.is_dirty(QuotaType::User));
}

#[test]
fn legacy_stats_need_no_target() {
    let (ctl, mounts, _engine) = setup();
    let caller = Caller::new(Credentials::new(1000, 1000));
    let mut buf = [0xFFu8; LegacyQuotaStats::SIZE];
    let res = ctl.quotactl(
        &caller,
        qcmd(QC_GETSTATS, 0),
        None,
        0,
        &mut UserSlice::new(&mut buf),
    );
    assert_eq!(res, Ok(LegacyQuotaStats::SIZE));
    assert_eq!(&buf[32..36], &LEGACY_STATS_VERSION.to_le_bytes());
    assert!(buf[..32].iter().all(|&b| b == 0));
    assert_eq!(mounts.mount_lock_acquisitions(), 0);
}

#[test]
fn legacy_sync_runs_primary_path() {
    let (ctl, _mounts, engine) = setup();
    let caller = Caller::new(Credentials::new(1000, 1000));
    assert_eq!(legacy(&ctl, &caller, QC_SYNC, 0, &mut NullMemory), Ok(0));
    assert_eq!(engine.calls(), vec![EngineCall::QuotaSync(QuotaType::User)]);
}

#[test]
fn unknown_legacy_word() {
    let (ctl, mounts, _engine) = setup();
    let root = Caller::new(Credentials::root());
    assert_eq!(
        legacy(&ctl, &root, 0x0D00, 0, &mut NullMemory),
        Err(QuotaError::NotSupported)
    );
    assert_eq!(mounts.mount_lock_acquisitions(), 0);
}

#[test]
fn legacy_words_rejected_when_disabled() {
    let mounts = Arc::new(MountRegistry::new());
    mounts.mount("/dev/sda1", DEV, "ext4", Some(Arc::new(MemoryQuotaEngine::file_backed())));
    let ctl = QuotaCtlBuilder::new(mounts).compat(false).build();

    let mut buf = [0u8; LegacyQuotaRecord::SIZE];
    let root = Caller::new(Credentials::root());
    let res = legacy(&ctl, &root, QC_GETQUOTA, 0, &mut UserSlice::new(&mut buf));
    assert_eq!(res, Err(QuotaError::InvalidArgument));
}
