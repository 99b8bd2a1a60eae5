// Quotactl Target Resolution - device path to pinned, freeze-aware superblock

use crate::cmd::QuotaOpcode;
use crate::config::QuotaCtlConfig;
use crate::ident::Caller;
use crate::superblock::{MountTable, SuperRef};
use crate::{QuotaError, QuotaResult};
use tracing::{debug, trace};

/// Resolve `special` to the filesystem mounted on it.
///
/// Read-class opcodes get the filesystem even while it is frozen. Write-class
/// opcodes wait for a thaw first; the wait is abandoned with
/// [`QuotaError::Interrupted`] when the caller is interrupted. The returned
/// handle is pinned and every failure path drops its pin before returning.
pub fn resolve_target<M: MountTable + ?Sized>(
    mounts: &M,
    special: &str,
    opcode: QuotaOpcode,
    caller: &Caller,
    config: &QuotaCtlConfig,
) -> QuotaResult<SuperRef> {
    let dev = mounts.lookup_bdev(special)?;

    loop {
        let sb = mounts.get_super(dev).ok_or(QuotaError::NoSuchMount)?;
        if !opcode.is_write() || !sb.is_frozen() {
            trace!(target: "quotactl::resolve", %dev, opcode = %opcode, "resolved");
            return Ok(sb);
        }

        debug!(target: "quotactl::resolve", %dev, opcode = %opcode, "freeze_wait_start");
        if let Err(err) = sb.wait_thawed(&caller.interrupt, config.freeze_poll_interval) {
            debug!(target: "quotactl::resolve", %dev, "freeze_wait_interrupted");
            return Err(err);
        }
        // look the device up again: it may have been unmounted while frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Credentials;
    use crate::mock::MountRegistry;
    use crate::superblock::DeviceId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const DEV: DeviceId = DeviceId::new(253, 0);

    fn registry() -> MountRegistry {
        let reg = MountRegistry::new();
        reg.mount("/dev/dm-0", DEV, "ext4", None);
        reg
    }

    fn caller() -> Caller {
        Caller::new(Credentials::root())
    }

    #[test]
    fn test_resolve_pins_target() {
        let reg = registry();
        let config = QuotaCtlConfig::default();
        let sb = resolve_target(&reg, "/dev/dm-0", QuotaOpcode::GetInfo, &caller(), &config)
            .unwrap();
        assert_eq!(sb.dev(), DEV);
        assert_eq!(reg.total_pins(), 1);
        drop(sb);
        assert_eq!(reg.total_pins(), 0);
    }

    #[test]
    fn test_unknown_device_and_unmounted_device() {
        let reg = registry();
        reg.add_device("/dev/dm-1", DeviceId::new(253, 1));
        let config = QuotaCtlConfig::default();

        let err = resolve_target(&reg, "/dev/dm-9", QuotaOpcode::GetInfo, &caller(), &config);
        assert_eq!(err.err(), Some(QuotaError::NoSuchDevice("/dev/dm-9".into())));
        assert_eq!(reg.mount_lock_acquisitions(), 0);

        let err = resolve_target(&reg, "/dev/dm-1", QuotaOpcode::GetInfo, &caller(), &config);
        assert_eq!(err.err(), Some(QuotaError::NoSuchMount));
    }

    #[test]
    fn test_frozen_read_does_not_wait() {
        let reg = registry();
        reg.superblock(DEV).unwrap().freeze();
        let config = QuotaCtlConfig::default();
        for opcode in QuotaOpcode::ALL.into_iter().filter(|op| !op.is_write()) {
            let sb = resolve_target(&reg, "/dev/dm-0", opcode, &caller(), &config).unwrap();
            assert!(sb.is_frozen());
        }
        assert_eq!(reg.total_pins(), 0);
    }

    #[test]
    fn test_frozen_write_waits_for_thaw() {
        let reg = Arc::new(registry());
        let sb = reg.superblock(DEV).unwrap();
        sb.freeze();

        let thawer = {
            let sb = sb.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                sb.thaw();
            })
        };
        let config = QuotaCtlConfig::default();
        let pinned = resolve_target(&*reg, "/dev/dm-0", QuotaOpcode::SetQuota, &caller(), &config)
            .unwrap();
        assert!(!pinned.is_frozen());
        assert_eq!(pinned.pin_count(), 1);
        thawer.join().unwrap();
    }

    #[test]
    fn test_interrupted_write_drops_pin() {
        let reg = registry();
        reg.superblock(DEV).unwrap().freeze();
        let caller = caller();
        caller.interrupt.raise();
        let config = QuotaCtlConfig::default();

        let res = resolve_target(&reg, "/dev/dm-0", QuotaOpcode::QuotaOff, &caller, &config);
        assert_eq!(res.err(), Some(QuotaError::Interrupted));
        assert_eq!(reg.total_pins(), 0);
    }
}
