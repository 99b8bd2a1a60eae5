// Quotactl Permissions - privilege rule plus the security policy hook

use crate::cmd::{QuotaOpcode, QuotaType};
use crate::ident::{Capabilities, Credentials};
use crate::superblock::SuperBlock;
use crate::{QuotaError, QuotaResult};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny,
}

/// External security hook consulted on every command.
///
/// `sb` is `None` only for the broadcast sync, which has no single target.
pub trait SecurityPolicy: Send + Sync {
    fn authorize(
        &self,
        opcode: QuotaOpcode,
        class: u32,
        id: u32,
        sb: Option<&SuperBlock>,
    ) -> PolicyDecision;
}

/// Policy that never vetoes
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl SecurityPolicy for PermitAll {
    fn authorize(&self, _: QuotaOpcode, _: u32, _: u32, _: Option<&SuperBlock>) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

impl<T: SecurityPolicy + ?Sized> SecurityPolicy for Arc<T> {
    fn authorize(
        &self,
        opcode: QuotaOpcode,
        class: u32,
        id: u32,
        sb: Option<&SuperBlock>,
    ) -> PolicyDecision {
        (**self).authorize(opcode, class, id, sb)
    }
}

/// Decide whether `cred` may run `opcode` against `id` on `sb`.
///
/// Unprivileged commands and self-service record reads skip the privilege
/// test. The policy hook runs afterwards in every case and its denial is
/// final.
pub fn check_quotactl_permission<S: SecurityPolicy + ?Sized>(
    sb: &SuperBlock,
    qtype: QuotaType,
    opcode: QuotaOpcode,
    id: u32,
    cred: &Credentials,
    policy: &S,
) -> QuotaResult<()> {
    let self_service = opcode.is_self_service() && cred.owns(qtype, id);
    if !opcode.is_unprivileged() && !self_service && !cred.capable(Capabilities::SYS_ADMIN) {
        warn!(
            target: "quotactl::perm",
            opcode = %opcode,
            class = qtype.name(),
            id,
            euid = cred.euid,
            dev = %sb.dev(),
            "permission_denied"
        );
        return Err(QuotaError::PermissionDenied);
    }

    match policy.authorize(opcode, qtype.index(), id, Some(sb)) {
        PolicyDecision::Allow => Ok(()),
        PolicyDecision::Deny => {
            warn!(
                target: "quotactl::perm",
                opcode = %opcode,
                class = qtype.name(),
                id,
                dev = %sb.dev(),
                "policy_denied"
            );
            Err(QuotaError::PermissionDenied)
        }
    }
}
