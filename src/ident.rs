// Quotactl Identities - caller credentials and namespace-relative quota ids

use crate::cmd::QuotaType;
use crate::{QuotaError, QuotaResult};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    /// Privileges held by a caller
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Capabilities: u32 {
        /// Filesystem administration
        const SYS_ADMIN = 1 << 0;
    }
}

/// One contiguous range of an id map: `[first, first + count)` inside the
/// namespace maps onto `[lower_first, lower_first + count)` outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapExtent {
    pub first: u32,
    pub lower_first: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    extents: Vec<IdMapExtent>,
}

impl IdMap {
    /// Every id maps onto itself
    pub fn identity() -> Self {
        Self {
            extents: vec![IdMapExtent {
                first: 0,
                lower_first: 0,
                count: u32::MAX,
            }],
        }
    }

    pub fn with_extents(extents: Vec<IdMapExtent>) -> Self {
        Self { extents }
    }

    /// Map a namespace-local id to a global id
    pub fn map_down(&self, id: u32) -> Option<u32> {
        self.extents.iter().find_map(|ext| {
            let offset = id.checked_sub(ext.first)?;
            if offset < ext.count {
                ext.lower_first.checked_add(offset)
            } else {
                None
            }
        })
    }
}

/// Namespace a caller's raw ids are interpreted in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNamespace {
    pub uid_map: IdMap,
    pub gid_map: IdMap,
    pub projid_map: IdMap,
}

impl UserNamespace {
    /// The initial namespace: all maps are identity
    pub fn initial() -> Self {
        Self {
            uid_map: IdMap::identity(),
            gid_map: IdMap::identity(),
            projid_map: IdMap::identity(),
        }
    }

    fn map_for(&self, qtype: QuotaType) -> &IdMap {
        match qtype {
            QuotaType::User => &self.uid_map,
            QuotaType::Group => &self.gid_map,
            QuotaType::Project => &self.projid_map,
        }
    }

    /// Resolve a raw id of the given type into a global quota id.
    pub fn make_kqid(&self, qtype: QuotaType, id: u32) -> QuotaResult<KernelQid> {
        match self.map_for(qtype).map_down(id) {
            // the all-ones id is reserved as "invalid" on every map
            Some(global) if global != u32::MAX => Ok(KernelQid { qtype, id: global }),
            _ => Err(QuotaError::InvalidIdentity(id)),
        }
    }
}

impl Default for UserNamespace {
    fn default() -> Self {
        Self::initial()
    }
}

/// Validated, namespace-independent quota identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelQid {
    pub qtype: QuotaType,
    pub id: u32,
}

/// Effective identity of a caller; ids are global (already mapped).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub euid: u32,
    pub egid: u32,
    pub groups: Vec<u32>,
    pub caps: Capabilities,
    pub user_ns: Arc<UserNamespace>,
}

impl Credentials {
    pub fn new(euid: u32, egid: u32) -> Self {
        Self {
            euid,
            egid,
            groups: Vec::new(),
            caps: Capabilities::empty(),
            user_ns: Arc::new(UserNamespace::initial()),
        }
    }

    /// Credentials of a fully privileged administrator
    pub fn root() -> Self {
        Self::new(0, 0).with_caps(Capabilities::SYS_ADMIN)
    }

    pub fn with_groups(mut self, groups: Vec<u32>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_namespace(mut self, ns: Arc<UserNamespace>) -> Self {
        self.user_ns = ns;
        self
    }

    pub fn capable(&self, cap: Capabilities) -> bool {
        self.caps.contains(cap)
    }

    /// Member of the group through the effective gid or a supplementary group
    pub fn in_egroup(&self, gid: u32) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }

    /// Whether `id` of `qtype`, read in the caller's namespace, is the caller
    /// (user) or one of its groups (group). Projects are never owned.
    pub fn owns(&self, qtype: QuotaType, id: u32) -> bool {
        match self.user_ns.make_kqid(qtype, id) {
            Ok(KernelQid { qtype: QuotaType::User, id }) => id == self.euid,
            Ok(KernelQid { qtype: QuotaType::Group, id }) => self.in_egroup(id),
            _ => false,
        }
    }
}

/// Interrupt flag for a caller blocked inside the dispatcher
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The invoking task: who it is and how to interrupt it
#[derive(Debug, Clone)]
pub struct Caller {
    pub cred: Credentials,
    pub interrupt: Interrupt,
}

impl Caller {
    pub fn new(cred: Credentials) -> Self {
        Self {
            cred,
            interrupt: Interrupt::new(),
        }
    }
}
