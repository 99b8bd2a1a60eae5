// Quotactl - Quota control dispatcher
// A single multiplexed entry point for querying and changing per-identity
// storage limits on mounted filesystems

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod broadcast;
pub mod cmd;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ident;
pub mod mock;
pub mod ops;
pub mod perm;
pub mod record;
pub mod resolve;
pub mod superblock;
pub mod time;
pub mod uaccess;

#[cfg(feature = "compat")]
pub mod compat;

// Re-exports
pub use cmd::{qcmd, QuotaCommand, QuotaOpcode, QuotaType};
pub use config::QuotaCtlConfig;
pub use dispatch::{QuotaCtl, QuotaCtlBuilder};
pub use error::{EngineError, QuotaError, QuotaResult};
pub use ident::{Caller, Capabilities, Credentials, Interrupt, KernelQid, UserNamespace};
pub use ops::{QuotaCaps, QuotaOps};
pub use perm::{check_quotactl_permission, PermitAll, PolicyDecision, SecurityPolicy};
pub use record::{
    basic_from_extended, extended_from_basic, BasicQuotaRecord, DqblkValid, ExtendedQuotaRecord,
    ExtendedQuotaState, ExtendedQuotaStateV, FieldMask, QuotaInfo,
};
pub use resolve::resolve_target;
pub use superblock::{DeviceId, MountTable, QuotaPath, SuperBlock, SuperIter, SuperRef};
pub use time::Clock;
pub use uaccess::{NullMemory, UserMemory, UserSlice};
