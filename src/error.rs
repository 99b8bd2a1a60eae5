// Quotactl Errors - caller-facing failure taxonomy and errno mapping

use thiserror::Error;

/// Failure reported by the quota accounting engine behind a filesystem.
///
/// These pass through the dispatcher unchanged as [`QuotaError::Underlying`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Quotas of the requested type are not turned on
    #[error("quota accounting is not active")]
    NotActive,
    /// Quotas of the requested type are already on, or the engine is busy
    #[error("quota accounting is busy")]
    Busy,
    /// No entry exists for the identity
    #[error("no quota entry for identity")]
    NoEntry,
    #[error("no space for quota metadata")]
    NoSpace,
    #[error("quota metadata I/O failed")]
    Io,
    /// Any other engine-specific errno
    #[error("quota engine failure (errno {0})")]
    Other(i32),
}

impl EngineError {
    pub fn errno(&self) -> i32 {
        match self {
            EngineError::NotActive => libc::ESRCH,
            EngineError::Busy => libc::EBUSY,
            EngineError::NoEntry => libc::ENOENT,
            EngineError::NoSpace => libc::ENOSPC,
            EngineError::Io => libc::EIO,
            EngineError::Other(errno) => *errno,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// Malformed opcode, class index or version tag
    #[error("invalid argument")]
    InvalidArgument,
    /// Missing privilege, or vetoed by the security policy
    #[error("operation not permitted")]
    PermissionDenied,
    /// The filesystem does not implement the requested capability
    #[error("operation not supported by this filesystem")]
    NotSupported,
    /// The target path does not name a block device
    #[error("no such device: {0}")]
    NoSuchDevice(String),
    /// No filesystem is mounted on the resolved device
    #[error("no filesystem mounted on target")]
    NoSuchMount,
    /// The identity does not map into the caller's namespace
    #[error("identity {0} is not valid in the caller's namespace")]
    InvalidIdentity(u32),
    #[error("filesystem is mounted read-only")]
    ReadOnlyFilesystem,
    /// Caller memory could not be read or written
    #[error("bad address in caller memory")]
    TransportFault,
    /// A freeze wait was interrupted; the caller may retry
    #[error("interrupted while waiting for filesystem thaw")]
    Interrupted,
    #[error(transparent)]
    Underlying(#[from] EngineError),
}

impl QuotaError {
    /// Errno value a system-call shaped transport reports for this error.
    pub fn errno(&self) -> i32 {
        match self {
            QuotaError::InvalidArgument => libc::EINVAL,
            QuotaError::PermissionDenied => libc::EPERM,
            QuotaError::NotSupported => libc::ENOSYS,
            QuotaError::NoSuchDevice(_) => libc::ENOENT,
            QuotaError::NoSuchMount => libc::ENODEV,
            QuotaError::InvalidIdentity(_) => libc::EINVAL,
            QuotaError::ReadOnlyFilesystem => libc::EROFS,
            QuotaError::TransportFault => libc::EFAULT,
            QuotaError::Interrupted => libc::EINTR,
            QuotaError::Underlying(err) => err.errno(),
        }
    }

    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QuotaError::Interrupted)
    }
}

/// Result of a quota control operation
pub type QuotaResult<T> = Result<T, QuotaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(QuotaError::InvalidArgument.errno(), libc::EINVAL);
        assert_eq!(QuotaError::InvalidIdentity(7).errno(), libc::EINVAL);
        assert_eq!(QuotaError::NoSuchMount.errno(), libc::ENODEV);
        assert_eq!(QuotaError::NotSupported.errno(), libc::ENOSYS);
        assert_eq!(QuotaError::from(EngineError::NotActive).errno(), libc::ESRCH);
        assert_eq!(QuotaError::Underlying(EngineError::Other(5)).errno(), 5);
    }

    #[test]
    fn test_only_interrupt_is_retryable() {
        assert!(QuotaError::Interrupted.is_retryable());
        assert!(!QuotaError::PermissionDenied.is_retryable());
        assert!(!QuotaError::NoSuchDevice("/dev/sdz".into()).is_retryable());
    }
}
