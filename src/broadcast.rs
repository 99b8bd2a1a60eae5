// Quotactl Broadcast Sync - sync one quota type on every mounted filesystem

use crate::cmd::QuotaOpcode;
use crate::dispatch::QuotaCtl;
use crate::ops::QuotaCaps;
use crate::perm::{PolicyDecision, SecurityPolicy};
use crate::superblock::MountTable;
use crate::{QuotaError, QuotaResult};
use tracing::{debug, warn};

impl<M: MountTable, S: SecurityPolicy> QuotaCtl<M, S> {
    /// Sync quotas of `class` everywhere.
    ///
    /// The policy hook is asked once for the whole walk. Filesystems without
    /// a sync operation are skipped and per-filesystem failures are only
    /// logged.
    pub fn quota_sync_all(&self, class: u32) -> QuotaResult<()> {
        let qtype = self.config().validate_class(QuotaOpcode::Sync, class)?;

        if self.policy().authorize(QuotaOpcode::Sync, class, 0, None) == PolicyDecision::Deny {
            warn!(target: "quotactl::broadcast", class = qtype.name(), "policy_denied");
            return Err(QuotaError::PermissionDenied);
        }

        let mut synced = 0usize;
        for sb in self.mounts().iter_supers() {
            let Some(ops) = sb.quota_ops() else {
                continue;
            };
            if !ops.capabilities().contains(QuotaCaps::SYNC) {
                continue;
            }
            match ops.quota_sync(&sb, qtype) {
                Ok(()) => synced += 1,
                Err(err) => debug!(
                    target: "quotactl::broadcast",
                    dev = %sb.dev(),
                    error = %err,
                    "sync_failed"
                ),
            }
        }

        debug!(target: "quotactl::broadcast", class = qtype.name(), synced, "sync_all_done");
        Ok(())
    }
}

