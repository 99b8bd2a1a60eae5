// Quotactl Superblocks - mounted filesystem handles, pinning and freeze state

use crate::ident::Interrupt;
use crate::ops::{QuotaCaps, QuotaOps};
use crate::{QuotaError, QuotaResult};
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Block device number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl DeviceId {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// A resolved filesystem location holding quota metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPath {
    /// Device the location lives on
    pub dev: DeviceId,
    pub ino: u64,
    pub path: String,
}

/// A mounted filesystem as seen by quota control
pub struct SuperBlock {
    dev: DeviceId,
    fs_type: String,
    read_only: AtomicBool,
    active: AtomicBool,
    frozen: Mutex<bool>,
    thawed: Condvar,
    pins: AtomicU32,
    qcop: Option<Arc<dyn QuotaOps>>,
}

impl SuperBlock {
    pub fn new(dev: DeviceId, fs_type: &str, qcop: Option<Arc<dyn QuotaOps>>) -> Self {
        Self {
            dev,
            fs_type: fs_type.to_string(),
            read_only: AtomicBool::new(false),
            active: AtomicBool::new(true),
            frozen: Mutex::new(false),
            thawed: Condvar::new(),
            pins: AtomicU32::new(0),
            qcop,
        }
    }

    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    pub fn fs_type(&self) -> &str {
        &self.fs_type
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the filesystem as going away; new lookups skip it
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        // wake freeze waiters so they notice the unmount
        let _guard = self.frozen.lock();
        self.thawed.notify_all();
    }

    /// Quota implementation, if the filesystem has one
    pub fn quota_ops(&self) -> Option<&Arc<dyn QuotaOps>> {
        self.qcop.as_ref()
    }

    /// Capabilities advertised by the quota implementation (empty without one)
    pub fn quota_caps(&self) -> QuotaCaps {
        self.qcop
            .as_ref()
            .map(|ops| ops.capabilities())
            .unwrap_or_default()
    }

    pub fn freeze(&self) {
        *self.frozen.lock() = true;
    }

    pub fn thaw(&self) {
        let mut frozen = self.frozen.lock();
        *frozen = false;
        self.thawed.notify_all();
    }

    pub fn is_frozen(&self) -> bool {
        *self.frozen.lock()
    }

    /// Outstanding pins
    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }

    /// Block until the filesystem is thawed or deactivated.
    ///
    /// `interrupt` is polled every `poll`; once raised the wait fails with
    /// [`QuotaError::Interrupted`].
    pub fn wait_thawed(&self, interrupt: &Interrupt, poll: Duration) -> QuotaResult<()> {
        let mut frozen = self.frozen.lock();
        while *frozen && self.is_active() {
            if interrupt.is_raised() {
                return Err(QuotaError::Interrupted);
            }
            self.thawed.wait_for(&mut frozen, poll);
        }
        Ok(())
    }
}

impl fmt::Debug for SuperBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuperBlock")
            .field("dev", &self.dev)
            .field("fs_type", &self.fs_type)
            .field("read_only", &self.is_read_only())
            .field("active", &self.is_active())
            .field("pins", &self.pin_count())
            .field("caps", &self.quota_caps())
            .finish()
    }
}

/// A pinned superblock. The pin is taken on construction and released
/// exactly once when the handle is dropped.
pub struct SuperRef {
    sb: Arc<SuperBlock>,
}

impl SuperRef {
    pub fn pin(sb: Arc<SuperBlock>) -> Self {
        sb.pins.fetch_add(1, Ordering::AcqRel);
        Self { sb }
    }

    pub fn superblock(&self) -> &Arc<SuperBlock> {
        &self.sb
    }
}

impl Deref for SuperRef {
    type Target = SuperBlock;

    fn deref(&self) -> &SuperBlock {
        &self.sb
    }
}

impl Drop for SuperRef {
    fn drop(&mut self) {
        self.sb.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SuperRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SuperRef").field(&self.sb.dev).finish()
    }
}

/// Lazy walk over a snapshot of mounted filesystems.
///
/// Each step upgrades the next weak handle and pins it; filesystems
/// unmounted or deactivated since the snapshot are skipped. The walk can be
/// restarted from the beginning of the same snapshot.
pub struct SuperIter {
    supers: Vec<Weak<SuperBlock>>,
    pos: usize,
}

impl SuperIter {
    pub fn new(supers: Vec<Weak<SuperBlock>>) -> Self {
        Self { supers, pos: 0 }
    }

    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for SuperIter {
    type Item = SuperRef;

    fn next(&mut self) -> Option<SuperRef> {
        while let Some(weak) = self.supers.get(self.pos) {
            self.pos += 1;
            if let Some(sb) = weak.upgrade() {
                if sb.is_active() {
                    return Some(SuperRef::pin(sb));
                }
            }
        }
        None
    }
}

/// The mount subsystem as consumed by quota control
pub trait MountTable: Send + Sync {
    /// Resolve a block device path
    fn lookup_bdev(&self, special: &str) -> QuotaResult<DeviceId>;

    /// Resolve a quota file path. Must not take the mount table lock.
    fn lookup_path(&self, path: &str) -> QuotaResult<QuotaPath>;

    /// Pin the active filesystem mounted on `dev`, frozen or not
    fn get_super(&self, dev: DeviceId) -> Option<SuperRef>;

    /// Snapshot every mounted filesystem
    fn iter_supers(&self) -> SuperIter;
}

impl<T: MountTable + ?Sized> MountTable for Arc<T> {
    fn lookup_bdev(&self, special: &str) -> QuotaResult<DeviceId> {
        (**self).lookup_bdev(special)
    }

    fn lookup_path(&self, path: &str) -> QuotaResult<QuotaPath> {
        (**self).lookup_path(path)
    }

    fn get_super(&self, dev: DeviceId) -> Option<SuperRef> {
        (**self).get_super(dev)
    }

    fn iter_supers(&self) -> SuperIter {
        (**self).iter_supers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn sb() -> Arc<SuperBlock> {
        Arc::new(SuperBlock::new(DeviceId::new(8, 1), "ext4", None))
    }

    #[test]
    fn test_pin_released_on_drop() {
        let sb = sb();
        {
            let a = SuperRef::pin(sb.clone());
            let _b = SuperRef::pin(sb.clone());
            assert_eq!(a.pin_count(), 2);
        }
        assert_eq!(sb.pin_count(), 0);
    }

    #[test]
    fn test_wait_thawed_unfrozen_returns() {
        let sb = sb();
        assert_eq!(sb.wait_thawed(&Interrupt::new(), Duration::from_millis(1)), Ok(()));
    }

    #[test]
    fn test_wait_thawed_blocks_until_thaw() {
        let sb = sb();
        sb.freeze();
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let sb = sb.clone();
            thread::spawn(move || {
                let res = sb.wait_thawed(&Interrupt::new(), Duration::from_millis(5));
                tx.send(res).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        sb.thaw();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_thawed_interrupted() {
        let sb = sb();
        sb.freeze();
        let intr = Interrupt::new();
        intr.raise();
        assert_eq!(
            sb.wait_thawed(&intr, Duration::from_millis(1)),
            Err(QuotaError::Interrupted)
        );
        assert!(sb.is_frozen());
    }

    #[test]
    fn test_iter_skips_dead_and_inactive() {
        let live = sb();
        let inactive = Arc::new(SuperBlock::new(DeviceId::new(8, 2), "xfs", None));
        inactive.deactivate();
        let dropped = Arc::new(SuperBlock::new(DeviceId::new(8, 3), "ext4", None));
        let weak_dropped = Arc::downgrade(&dropped);
        drop(dropped);

        let mut iter = SuperIter::new(vec![
            Arc::downgrade(&live),
            Arc::downgrade(&inactive),
            weak_dropped,
        ]);
        let devs: Vec<_> = iter.by_ref().map(|s| s.dev()).collect();
        assert_eq!(devs, vec![DeviceId::new(8, 1)]);
        assert!(iter.next().is_none());

        iter.restart();
        assert_eq!(iter.next().map(|s| s.dev()), Some(DeviceId::new(8, 1)));
        assert_eq!(live.pin_count(), 0);
    }
}
