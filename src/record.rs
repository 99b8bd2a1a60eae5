// Quotactl Records - basic and extended quota records, and translation between them
//
// Two encodings describe the same six limit/usage fields. The basic record
// carries a "valid" mask of what the caller supplied; the extended record
// carries a "field mask" of what a set should apply. The masks use disjoint
// bit layouts and only translate one way (basic valid -> extended field mask).
// Going the other way always reports every basic field as valid.

use crate::cmd::QuotaType;

bitflags::bitflags! {
    /// Fields of a [`BasicQuotaRecord`] the caller supplied or wants applied
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct DqblkValid: u32 {
        const BLIMITS = 1 << 0;
        const SPACE   = 1 << 1;
        const ILIMITS = 1 << 2;
        const INODES  = 1 << 3;
        const BTIME   = 1 << 4;
        const ITIME   = 1 << 5;
        const LIMITS = Self::BLIMITS.bits() | Self::ILIMITS.bits();
        const USAGE  = Self::SPACE.bits() | Self::INODES.bits();
        const TIMES  = Self::BTIME.bits() | Self::ITIME.bits();
        const ALL    = Self::LIMITS.bits() | Self::USAGE.bits() | Self::TIMES.bits();
    }
}

bitflags::bitflags! {
    /// Fields of an [`ExtendedQuotaRecord`] a set operation applies
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct FieldMask: u16 {
        const ISOFT    = 1 << 0;
        const IHARD    = 1 << 1;
        const BSOFT    = 1 << 2;
        const BHARD    = 1 << 3;
        const RTBSOFT  = 1 << 4;
        const RTBHARD  = 1 << 5;
        const BTIMER   = 1 << 6;
        const ITIMER   = 1 << 7;
        const RTBTIMER = 1 << 8;
        const BWARNS   = 1 << 9;
        const IWARNS   = 1 << 10;
        const RTBWARNS = 1 << 11;
        const BCOUNT   = 1 << 12;
        const ICOUNT   = 1 << 13;
        const RTBCOUNT = 1 << 14;
    }
}

bitflags::bitflags! {
    /// Per-type quota information flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct InfoFlags: u32 {
        const ROOT_SQUASH = 1 << 0;
        const SYS_FILE    = 1 << 16;
        const INFO_DIRTY  = 1 << 17;
    }
}

bitflags::bitflags! {
    /// Fields of a [`QuotaInfo`] a set operation applies
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct InfoValid: u32 {
        const BGRACE = 1 << 0;
        const IGRACE = 1 << 1;
        const FLAGS  = 1 << 2;
        const ALL = Self::BGRACE.bits() | Self::IGRACE.bits() | Self::FLAGS.bits();
    }
}

bitflags::bitflags! {
    /// Accounting/enforcement state of extended quotas
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct XfsQuotaFlags: u16 {
        const UDQ_ACCT = 1 << 0;
        const UDQ_ENFD = 1 << 1;
        const GDQ_ACCT = 1 << 2;
        const GDQ_ENFD = 1 << 3;
        const PDQ_ACCT = 1 << 4;
        const PDQ_ENFD = 1 << 5;
    }
}

/// Version tag of [`ExtendedQuotaRecord`]
pub const FS_DQUOT_VERSION: u8 = 1;
/// Version tag of [`ExtendedQuotaState`]
pub const FS_QSTAT_VERSION: u8 = 1;
/// The only version of [`ExtendedQuotaStateV`] this crate understands
pub const FS_QSTATV_VERSION1: u8 = 1;

/// Quota type flags carried in [`ExtendedQuotaRecord::flags`] and in
/// remove requests
pub const FS_USER_QUOTA: u8 = 1 << 0;
pub const FS_PROJ_QUOTA: u8 = 1 << 1;
pub const FS_GROUP_QUOTA: u8 = 1 << 2;

pub fn quota_type_flag(qtype: QuotaType) -> u8 {
    match qtype {
        QuotaType::User => FS_USER_QUOTA,
        QuotaType::Group => FS_GROUP_QUOTA,
        QuotaType::Project => FS_PROJ_QUOTA,
    }
}

/// Quota format identifiers passed to quota-on
pub const QFMT_VFS_OLD: u32 = 1;
pub const QFMT_VFS_V0: u32 = 2;
pub const QFMT_OCFS2: u32 = 3;
pub const QFMT_VFS_V1: u32 = 4;

// ============================================================================
// FIXED LAYOUT HELPERS
// ============================================================================

/// Little-endian writer over a fixed layout
pub(crate) struct Encoder<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub(crate) fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub(crate) fn u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    #[cfg_attr(not(feature = "compat"), allow(dead_code))]
    pub(crate) fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub(crate) fn pad(&mut self, n: usize) {
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
    }
}

/// Little-endian reader over a fixed layout
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub(crate) fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub(crate) fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    #[cfg_attr(not(feature = "compat"), allow(dead_code))]
    pub(crate) fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    pub(crate) fn skip(&mut self, n: usize) {
        self.pos += n;
    }
}

// ============================================================================
// BASIC RECORD
// ============================================================================

/// Caller-facing quota record with a single validity mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicQuotaRecord {
    pub bhardlimit: u64,
    pub bsoftlimit: u64,
    /// Space in use, in bytes
    pub curspace: u64,
    pub ihardlimit: u64,
    pub isoftlimit: u64,
    pub curinodes: u64,
    /// Block grace expiry (seconds since epoch, 0 = not running)
    pub btime: u64,
    /// Inode grace expiry
    pub itime: u64,
    pub valid: DqblkValid,
}

impl BasicQuotaRecord {
    pub const SIZE: usize = 72;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u64(self.bhardlimit);
        enc.u64(self.bsoftlimit);
        enc.u64(self.curspace);
        enc.u64(self.ihardlimit);
        enc.u64(self.isoftlimit);
        enc.u64(self.curinodes);
        enc.u64(self.btime);
        enc.u64(self.itime);
        enc.u32(self.valid.bits());
        enc.pad(4);
        buf
    }

    /// Decode; unknown validity bits are dropped
    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        Self {
            bhardlimit: dec.u64(),
            bsoftlimit: dec.u64(),
            curspace: dec.u64(),
            ihardlimit: dec.u64(),
            isoftlimit: dec.u64(),
            curinodes: dec.u64(),
            btime: dec.u64(),
            itime: dec.u64(),
            valid: DqblkValid::from_bits_truncate(dec.u32()),
        }
    }
}

// ============================================================================
// EXTENDED RECORD
// ============================================================================

/// Filesystem-native quota record with a per-field mutation mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedQuotaRecord {
    pub version: u8,
    pub flags: u8,
    pub fieldmask: FieldMask,
    pub id: u32,
    pub blk_hardlimit: u64,
    pub blk_softlimit: u64,
    pub ino_hardlimit: u64,
    pub ino_softlimit: u64,
    pub bcount: u64,
    pub icount: u64,
    pub itimer: u64,
    pub btimer: u64,
    pub iwarns: u16,
    pub bwarns: u16,
    pub rtb_hardlimit: u64,
    pub rtb_softlimit: u64,
    pub rtbcount: u64,
    pub rtbtimer: u64,
    pub rtbwarns: u16,
}

impl ExtendedQuotaRecord {
    pub const SIZE: usize = 120;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u8(self.version);
        enc.u8(self.flags);
        enc.u16(self.fieldmask.bits());
        enc.u32(self.id);
        enc.u64(self.blk_hardlimit);
        enc.u64(self.blk_softlimit);
        enc.u64(self.ino_hardlimit);
        enc.u64(self.ino_softlimit);
        enc.u64(self.bcount);
        enc.u64(self.icount);
        enc.u64(self.itimer);
        enc.u64(self.btimer);
        enc.u16(self.iwarns);
        enc.u16(self.bwarns);
        enc.pad(4);
        enc.u64(self.rtb_hardlimit);
        enc.u64(self.rtb_softlimit);
        enc.u64(self.rtbcount);
        enc.u64(self.rtbtimer);
        enc.u16(self.rtbwarns);
        enc.pad(6);
        buf
    }

    /// Decode; unknown field-mask bits are dropped
    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        let version = dec.u8();
        let flags = dec.u8();
        let fieldmask = FieldMask::from_bits_truncate(dec.u16());
        let id = dec.u32();
        let blk_hardlimit = dec.u64();
        let blk_softlimit = dec.u64();
        let ino_hardlimit = dec.u64();
        let ino_softlimit = dec.u64();
        let bcount = dec.u64();
        let icount = dec.u64();
        let itimer = dec.u64();
        let btimer = dec.u64();
        let iwarns = dec.u16();
        let bwarns = dec.u16();
        dec.skip(4);
        Self {
            version,
            flags,
            fieldmask,
            id,
            blk_hardlimit,
            blk_softlimit,
            ino_hardlimit,
            ino_softlimit,
            bcount,
            icount,
            itimer,
            btimer,
            iwarns,
            bwarns,
            rtb_hardlimit: dec.u64(),
            rtb_softlimit: dec.u64(),
            rtbcount: dec.u64(),
            rtbtimer: dec.u64(),
            rtbwarns: dec.u16(),
        }
    }
}

// ============================================================================
// TRANSLATION
// ============================================================================

impl DqblkValid {
    /// Fixed one-way mapping onto the extended field mask
    pub fn to_field_mask(self) -> FieldMask {
        let mut mask = FieldMask::empty();
        if self.contains(DqblkValid::BLIMITS) {
            mask |= FieldMask::BSOFT | FieldMask::BHARD;
        }
        if self.contains(DqblkValid::SPACE) {
            mask |= FieldMask::BCOUNT;
        }
        if self.contains(DqblkValid::ILIMITS) {
            mask |= FieldMask::ISOFT | FieldMask::IHARD;
        }
        if self.contains(DqblkValid::INODES) {
            mask |= FieldMask::ICOUNT;
        }
        if self.contains(DqblkValid::BTIME) {
            mask |= FieldMask::BTIMER;
        }
        if self.contains(DqblkValid::ITIME) {
            mask |= FieldMask::ITIMER;
        }
        mask
    }
}

/// Extended -> basic. A read always returns a fully populated record, so the
/// result is marked valid for every field whatever the source mask says.
pub fn basic_from_extended(src: &ExtendedQuotaRecord) -> BasicQuotaRecord {
    BasicQuotaRecord {
        bhardlimit: src.blk_hardlimit,
        bsoftlimit: src.blk_softlimit,
        curspace: src.bcount,
        ihardlimit: src.ino_hardlimit,
        isoftlimit: src.ino_softlimit,
        curinodes: src.icount,
        btime: src.btimer,
        itime: src.itimer,
        valid: DqblkValid::ALL,
    }
}

/// Basic -> extended, deriving the field mask from the validity mask
pub fn extended_from_basic(src: &BasicQuotaRecord) -> ExtendedQuotaRecord {
    ExtendedQuotaRecord {
        version: FS_DQUOT_VERSION,
        blk_hardlimit: src.bhardlimit,
        blk_softlimit: src.bsoftlimit,
        bcount: src.curspace,
        ino_hardlimit: src.ihardlimit,
        ino_softlimit: src.isoftlimit,
        icount: src.curinodes,
        btimer: src.btime,
        itimer: src.itime,
        fieldmask: src.valid.to_field_mask(),
        ..Default::default()
    }
}

// ============================================================================
// PER-TYPE INFORMATION AND EXTENDED STATE
// ============================================================================

/// Grace periods and flags for one quota type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaInfo {
    /// Block grace period in seconds
    pub bgrace: u64,
    /// Inode grace period in seconds
    pub igrace: u64,
    pub flags: InfoFlags,
    pub valid: InfoValid,
}

impl QuotaInfo {
    pub const SIZE: usize = 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u64(self.bgrace);
        enc.u64(self.igrace);
        enc.u32(self.flags.bits());
        enc.u32(self.valid.bits());
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        Self {
            bgrace: dec.u64(),
            igrace: dec.u64(),
            flags: InfoFlags::from_bits_retain(dec.u32()),
            valid: InfoValid::from_bits_truncate(dec.u32()),
        }
    }
}

/// Storage used by one quota metadata file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaFileStat {
    pub ino: u64,
    pub nblks: u64,
    pub nextents: u32,
}

impl QuotaFileStat {
    const SIZE: usize = 24;

    fn encode_into(&self, enc: &mut Encoder<'_>) {
        enc.u64(self.ino);
        enc.u64(self.nblks);
        enc.u32(self.nextents);
        enc.pad(4);
    }

    fn decode_from(dec: &mut Decoder<'_>) -> Self {
        let stat = Self {
            ino: dec.u64(),
            nblks: dec.u64(),
            nextents: dec.u32(),
        };
        dec.skip(4);
        stat
    }
}

/// Extended quota subsystem state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedQuotaState {
    pub version: u8,
    pub flags: XfsQuotaFlags,
    pub uquota: QuotaFileStat,
    pub gquota: QuotaFileStat,
    pub incoredqs: u32,
    pub btimelimit: u32,
    pub itimelimit: u32,
    pub rtbtimelimit: u32,
    pub bwarnlimit: u16,
    pub iwarnlimit: u16,
}

impl ExtendedQuotaState {
    pub const SIZE: usize = 8 + 2 * QuotaFileStat::SIZE + 24;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u8(self.version);
        enc.pad(1);
        enc.u16(self.flags.bits());
        enc.pad(4);
        self.uquota.encode_into(&mut enc);
        self.gquota.encode_into(&mut enc);
        enc.u32(self.incoredqs);
        enc.u32(self.btimelimit);
        enc.u32(self.itimelimit);
        enc.u32(self.rtbtimelimit);
        enc.u16(self.bwarnlimit);
        enc.u16(self.iwarnlimit);
        enc.pad(4);
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        let version = dec.u8();
        dec.skip(1);
        let flags = XfsQuotaFlags::from_bits_truncate(dec.u16());
        dec.skip(4);
        Self {
            version,
            flags,
            uquota: QuotaFileStat::decode_from(&mut dec),
            gquota: QuotaFileStat::decode_from(&mut dec),
            incoredqs: dec.u32(),
            btimelimit: dec.u32(),
            itimelimit: dec.u32(),
            rtbtimelimit: dec.u32(),
            bwarnlimit: dec.u16(),
            iwarnlimit: dec.u16(),
        }
    }
}

/// Versioned extended state; the version tag is the first byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedQuotaStateV {
    pub version: u8,
    pub flags: XfsQuotaFlags,
    pub incoredqs: u32,
    pub uquota: QuotaFileStat,
    pub gquota: QuotaFileStat,
    pub pquota: QuotaFileStat,
    pub btimelimit: u32,
    pub itimelimit: u32,
    pub rtbtimelimit: u32,
    pub bwarnlimit: u16,
    pub iwarnlimit: u16,
}

impl ExtendedQuotaStateV {
    /// Trailing reserved space keeps room for later versions
    const RESERVED: usize = 64;
    pub const SIZE: usize = 8 + 3 * QuotaFileStat::SIZE + 16 + Self::RESERVED;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut enc = Encoder::new(&mut buf);
        enc.u8(self.version);
        enc.pad(1);
        enc.u16(self.flags.bits());
        enc.u32(self.incoredqs);
        self.uquota.encode_into(&mut enc);
        self.gquota.encode_into(&mut enc);
        self.pquota.encode_into(&mut enc);
        enc.u32(self.btimelimit);
        enc.u32(self.itimelimit);
        enc.u32(self.rtbtimelimit);
        enc.u16(self.bwarnlimit);
        enc.u16(self.iwarnlimit);
        enc.pad(Self::RESERVED);
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        let mut dec = Decoder::new(buf);
        let version = dec.u8();
        dec.skip(1);
        Self {
            version,
            flags: XfsQuotaFlags::from_bits_truncate(dec.u16()),
            incoredqs: dec.u32(),
            uquota: QuotaFileStat::decode_from(&mut dec),
            gquota: QuotaFileStat::decode_from(&mut dec),
            pquota: QuotaFileStat::decode_from(&mut dec),
            btimelimit: dec.u32(),
            itimelimit: dec.u32(),
            rtbtimelimit: dec.u32(),
            bwarnlimit: dec.u16(),
            iwarnlimit: dec.u16(),
        }
    }
}
