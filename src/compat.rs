// Quotactl Compatibility - legacy command words and narrow record layouts
//
// Every legacy command is re-expressed as a primary command and run through
// the primary path. Narrow records are converted at the caller-memory
// boundary, so permission, resolution and capability checks are exactly
// those of the primary opcode.

use crate::cmd::{QuotaCommand, QuotaOpcode};
use crate::dispatch::QuotaCtl;
use crate::ident::Caller;
use crate::perm::SecurityPolicy;
use crate::record::{
    BasicQuotaRecord, Decoder, DqblkValid, Encoder, InfoFlags, InfoValid, QuotaInfo,
};
use crate::superblock::MountTable;
use crate::uaccess::UserMemory;
use crate::{QuotaError, QuotaResult};
use tracing::trace;

pub const QC_QUOTAON: u32 = 0x0100;
pub const QC_QUOTAOFF: u32 = 0x0200;
pub const QC_GETQUOTA: u32 = 0x0300;
pub const QC_SETQUOTA: u32 = 0x0400;
pub const QC_SETUSE: u32 = 0x0500;
pub const QC_SYNC: u32 = 0x0600;
pub const QC_SETQLIM: u32 = 0x0700;
pub const QC_GETSTATS: u32 = 0x0800;
pub const QC_GETINFO: u32 = 0x0900;
pub const QC_SETINFO: u32 = 0x0A00;
pub const QC_SETGRACE: u32 = 0x0B00;
pub const QC_SETFLAGS: u32 = 0x0C00;

/// Version reported by the legacy statistics query
pub const LEGACY_STATS_VERSION: u32 = 6 * 10000 + 5 * 100;

/// Legacy "info dirty" flag bit
const LEGACY_INFO_DIRTY: u32 = 0x0010;

fn saturate_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn saturate_i32(v: u64) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Narrow quota record of the legacy interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyQuotaRecord {
    pub ihardlimit: u32,
    pub isoftlimit: u32,
    pub curinodes: u32,
    pub bhardlimit: u32,
    pub bsoftlimit: u32,
    pub curspace: u64,
    pub btime: i32,
    pub itime: i32,
}

impl LegacyQuotaRecord {
    pub const SIZE: usize = 40;

    /// Narrow a basic record; values that do not fit saturate
    pub fn narrow(rec: &BasicQuotaRecord) -> Self {
        Self {
            ihardlimit: saturate_u32(rec.ihardlimit),
            isoftlimit: saturate_u32(rec.isoftlimit),
            curinodes: saturate_u32(rec.curinodes),
            bhardlimit: saturate_u32(rec.bhardlimit),
            bsoftlimit: saturate_u32(rec.bsoftlimit),
            curspace: rec.curspace,
            btime: saturate_i32(rec.btime),
            itime: saturate_i32(rec.itime),
        }
    }

    pub fn widen(&self, valid: DqblkValid) -> BasicQuotaRecord {
        BasicQuotaRecord {
            bhardlimit: u64::from(self.bhardlimit),
            bsoftlimit: u64::from(self.bsoftlimit),
            curspace: self.curspace,
            ihardlimit: u64::from(self.ihardlimit),
            isoftlimit: u64::from(self.isoftlimit),
            curinodes: u64::from(self.curinodes),
            btime: u64::try_from(self.btime).unwrap_or(0),
            itime: u64::try_from(self.itime).unwrap_or(0),
            valid,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u32(self.ihardlimit);
        enc.u32(self.isoftlimit);
        enc.u32(self.curinodes);
        enc.u32(self.bhardlimit);
        enc.u32(self.bsoftlimit);
        enc.pad(4);
        enc.u64(self.curspace);
        enc.i32(self.btime);
        enc.i32(self.itime);
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        let ihardlimit = dec.u32();
        let isoftlimit = dec.u32();
        let curinodes = dec.u32();
        let bhardlimit = dec.u32();
        let bsoftlimit = dec.u32();
        dec.skip(4);
        Self {
            ihardlimit,
            isoftlimit,
            curinodes,
            bhardlimit,
            bsoftlimit,
            curspace: dec.u64(),
            btime: dec.i32(),
            itime: dec.i32(),
        }
    }
}

/// Narrow per-type information of the legacy interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyQuotaInfo {
    pub bgrace: u32,
    pub igrace: u32,
    pub flags: u32,
    pub blocks: u32,
    pub free_blk: u32,
    pub free_entry: u32,
}

impl LegacyQuotaInfo {
    pub const SIZE: usize = 24;

    /// Only the dirty flag survives narrowing; block counters read as zero
    pub fn narrow(info: &QuotaInfo) -> Self {
        let flags = if info.flags.contains(InfoFlags::INFO_DIRTY) {
            LEGACY_INFO_DIRTY
        } else {
            0
        };
        Self {
            bgrace: saturate_u32(info.bgrace),
            igrace: saturate_u32(info.igrace),
            flags,
            ..Default::default()
        }
    }

    pub fn widen(&self, valid: InfoValid) -> QuotaInfo {
        QuotaInfo {
            bgrace: u64::from(self.bgrace),
            igrace: u64::from(self.igrace),
            flags: InfoFlags::from_bits_retain(self.flags),
            valid,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u32(self.bgrace);
        enc.u32(self.igrace);
        enc.u32(self.flags);
        enc.u32(self.blocks);
        enc.u32(self.free_blk);
        enc.u32(self.free_entry);
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        Self {
            bgrace: dec.u32(),
            igrace: dec.u32(),
            flags: dec.u32(),
            blocks: dec.u32(),
            free_blk: dec.u32(),
            free_entry: dec.u32(),
        }
    }
}

/// Legacy statistics block; nothing is tracked, only the version is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyQuotaStats {
    pub lookups: u32,
    pub drops: u32,
    pub reads: u32,
    pub writes: u32,
    pub cache_hits: u32,
    pub allocated_dquots: u32,
    pub free_dquots: u32,
    pub syncs: u32,
    pub version: u32,
}

impl LegacyQuotaStats {
    pub const SIZE: usize = 36;

    pub fn current() -> Self {
        Self {
            version: LEGACY_STATS_VERSION,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        for v in [
            self.lookups,
            self.drops,
            self.reads,
            self.writes,
            self.cache_hits,
            self.allocated_dquots,
            self.free_dquots,
            self.syncs,
            self.version,
        ] {
            enc.u32(v);
        }
        buf
    }
}

// ============================================================================
// CALLER MEMORY ADAPTERS
// ============================================================================

/// Presents legacy caller memory to the primary path as a basic record
struct LegacyDqblkMemory<'a> {
    inner: &'a mut dyn UserMemory,
    /// Validity mask attached to records read from the caller
    valid: DqblkValid,
}

impl UserMemory for LegacyDqblkMemory<'_> {
    fn len(&self) -> usize {
        if self.inner.len() >= LegacyQuotaRecord::SIZE {
            BasicQuotaRecord::SIZE
        } else {
            0
        }
    }

    fn copy_from(&self, dst: &mut [u8]) -> QuotaResult<()> {
        let mut raw = [0u8; LegacyQuotaRecord::SIZE];
        self.inner.copy_from(&mut raw)?;
        let wide = LegacyQuotaRecord::decode(&raw).widen(self.valid).encode();
        let src = wide.get(..dst.len()).ok_or(QuotaError::TransportFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn copy_to(&mut self, src: &[u8]) -> QuotaResult<()> {
        let raw: &[u8; BasicQuotaRecord::SIZE] =
            src.try_into().map_err(|_| QuotaError::TransportFault)?;
        let narrow = LegacyQuotaRecord::narrow(&BasicQuotaRecord::decode(raw));
        self.inner.copy_to(&narrow.encode())
    }
}

/// Presents legacy caller memory to the primary path as quota info
struct LegacyInfoMemory<'a> {
    inner: &'a mut dyn UserMemory,
    valid: InfoValid,
}

impl UserMemory for LegacyInfoMemory<'_> {
    fn len(&self) -> usize {
        if self.inner.len() >= LegacyQuotaInfo::SIZE {
            QuotaInfo::SIZE
        } else {
            0
        }
    }

    fn copy_from(&self, dst: &mut [u8]) -> QuotaResult<()> {
        let mut raw = [0u8; LegacyQuotaInfo::SIZE];
        self.inner.copy_from(&mut raw)?;
        let wide = LegacyQuotaInfo::decode(&raw).widen(self.valid).encode();
        let src = wide.get(..dst.len()).ok_or(QuotaError::TransportFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn copy_to(&mut self, src: &[u8]) -> QuotaResult<()> {
        let raw: &[u8; QuotaInfo::SIZE] = src.try_into().map_err(|_| QuotaError::TransportFault)?;
        let narrow = LegacyQuotaInfo::narrow(&QuotaInfo::decode(raw));
        self.inner.copy_to(&narrow.encode())
    }
}

/// Primary opcode a legacy command word runs as
pub fn primary_opcode(cmds: u32) -> Option<QuotaOpcode> {
    match cmds {
        QC_QUOTAON => Some(QuotaOpcode::QuotaOn),
        QC_QUOTAOFF => Some(QuotaOpcode::QuotaOff),
        QC_SYNC => Some(QuotaOpcode::Sync),
        QC_GETQUOTA => Some(QuotaOpcode::GetQuota),
        QC_SETQUOTA | QC_SETUSE | QC_SETQLIM => Some(QuotaOpcode::SetQuota),
        QC_GETINFO => Some(QuotaOpcode::GetInfo),
        QC_SETINFO | QC_SETGRACE | QC_SETFLAGS => Some(QuotaOpcode::SetInfo),
        _ => None,
    }
}

/// Run a legacy command word
pub(crate) fn compat_quotactl<M: MountTable, S: SecurityPolicy>(
    ctl: &QuotaCtl<M, S>,
    caller: &Caller,
    command: QuotaCommand,
    special: Option<&str>,
    id: u32,
    addr: &mut dyn UserMemory,
) -> QuotaResult<usize> {
    trace!(target: "quotactl::compat", cmds = command.cmds, class = command.class, "legacy_command");

    if command.cmds == QC_GETSTATS {
        addr.copy_to(&LegacyQuotaStats::current().encode())?;
        return Ok(LegacyQuotaStats::SIZE);
    }

    let opcode = primary_opcode(command.cmds).ok_or(QuotaError::NotSupported)?;
    let primary = QuotaCommand::new(opcode, command.class);

    match command.cmds {
        QC_GETQUOTA => {
            let mut mem = LegacyDqblkMemory {
                inner: addr,
                valid: DqblkValid::empty(),
            };
            ctl.run(caller, primary, special, id, &mut mem)?;
            Ok(LegacyQuotaRecord::SIZE)
        }
        QC_SETQUOTA | QC_SETUSE | QC_SETQLIM => {
            let valid = match command.cmds {
                QC_SETQUOTA => DqblkValid::LIMITS | DqblkValid::USAGE,
                QC_SETUSE => DqblkValid::USAGE,
                _ => DqblkValid::LIMITS,
            };
            let mut mem = LegacyDqblkMemory { inner: addr, valid };
            ctl.run(caller, primary, special, id, &mut mem)
        }
        QC_GETINFO => {
            let mut mem = LegacyInfoMemory {
                inner: addr,
                valid: InfoValid::empty(),
            };
            ctl.run(caller, primary, special, id, &mut mem)?;
            Ok(LegacyQuotaInfo::SIZE)
        }
        QC_SETINFO | QC_SETGRACE | QC_SETFLAGS => {
            let valid = match command.cmds {
                QC_SETINFO => InfoValid::ALL,
                QC_SETGRACE => InfoValid::BGRACE | InfoValid::IGRACE,
                _ => InfoValid::FLAGS,
            };
            let mut mem = LegacyInfoMemory { inner: addr, valid };
            ctl.run(caller, primary, special, id, &mut mem)
        }
        _ => ctl.run(caller, primary, special, id, addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowing_saturates() {
        let rec = BasicQuotaRecord {
            bhardlimit: u64::MAX,
            bsoftlimit: 17,
            curspace: 1 << 40,
            ihardlimit: u64::from(u32::MAX) + 1,
            btime: 1 << 33,
            itime: 12,
            ..Default::default()
        };
        let narrow = LegacyQuotaRecord::narrow(&rec);
        assert_eq!(narrow.bhardlimit, u32::MAX);
        assert_eq!(narrow.bsoftlimit, 17);
        assert_eq!(narrow.curspace, 1 << 40);
        assert_eq!(narrow.ihardlimit, u32::MAX);
        assert_eq!(narrow.btime, i32::MAX);
        assert_eq!(narrow.itime, 12);
        assert_eq!(LegacyQuotaRecord::decode(&narrow.encode()), narrow);
    }

    #[test]
    fn test_record_layout_offsets() {
        let rec = LegacyQuotaRecord {
            ihardlimit: 1,
            bsoftlimit: 5,
            curspace: 0x0102_0304_0506_0708,
            btime: -1,
            itime: 9,
            ..Default::default()
        };
        let buf = rec.encode();
        assert_eq!(&buf[0..4], &1u32.to_le_bytes());
        assert_eq!(&buf[16..20], &5u32.to_le_bytes());
        assert_eq!(&buf[20..24], &[0u8; 4]);
        assert_eq!(&buf[24..32], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&buf[32..36], &[0xFF; 4]);
        assert_eq!(&buf[36..40], &9i32.to_le_bytes());

        let back = LegacyQuotaRecord::decode(&buf);
        assert_eq!(back, rec);
        // a negative timestamp widens to "no timer"
        assert_eq!(back.widen(DqblkValid::TIMES).btime, 0);
    }

    #[test]
    fn test_info_narrowing_keeps_dirty_only() {
        let info = QuotaInfo {
            bgrace: 3600,
            igrace: u64::MAX,
            flags: InfoFlags::INFO_DIRTY | InfoFlags::ROOT_SQUASH,
            valid: InfoValid::ALL,
        };
        let narrow = LegacyQuotaInfo::narrow(&info);
        assert_eq!(narrow.flags, LEGACY_INFO_DIRTY);
        assert_eq!(narrow.igrace, u32::MAX);
        assert_eq!((narrow.blocks, narrow.free_blk, narrow.free_entry), (0, 0, 0));
        assert_eq!(LegacyQuotaInfo::decode(&narrow.encode()), narrow);
    }

    #[test]
    fn test_stats_version() {
        let buf = LegacyQuotaStats::current().encode();
        assert_eq!(&buf[32..36], &60500u32.to_le_bytes());
        assert!(buf[..32].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_legacy_opcode_map() {
        assert_eq!(primary_opcode(QC_SETUSE), Some(QuotaOpcode::SetQuota));
        assert_eq!(primary_opcode(QC_SETFLAGS), Some(QuotaOpcode::SetInfo));
        assert_eq!(primary_opcode(QC_GETINFO), Some(QuotaOpcode::GetInfo));
        assert_eq!(primary_opcode(QC_GETSTATS), None);
        assert_eq!(primary_opcode(0x0D00), None);
    }
}
