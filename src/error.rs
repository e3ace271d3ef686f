//! Error taxonomy for console operations
//!
//! Callers only need to tell "my arguments were malformed" apart from
//! "the handle or session is unusable"; the peer's own status codes are
//! folded into those two buckets by the control-channel client.

use thiserror::Error;

use crate::core::kernel::NtStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// Argument rejected, either locally or by the hosting peer
    #[error("Invalid parameter")]
    InvalidParameter,

    /// Handle or session unusable (every other peer-side failure)
    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Access denied")]
    AccessDenied,

    /// Caller buffer or output slot missing or too small
    #[error("Invalid access to memory location")]
    InvalidAccess,

    /// Origin at or beyond the buffer extent
    #[error("Incorrect function")]
    InvalidFunction,

    #[error("Not enough memory for staging buffer")]
    NotEnoughMemory,

    #[error("Buffer too small for result")]
    BufferOverflow,

    #[error("Operation not supported")]
    NotSupported,

    #[error("Hosting peer exited before signalling readiness")]
    PeerExited,

    #[error("Kernel object operation failed: {0}")]
    Status(NtStatus),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

impl From<NtStatus> for ConsoleError {
    fn from(status: NtStatus) -> Self {
        match status {
            NtStatus::INVALID_PARAMETER => ConsoleError::InvalidParameter,
            NtStatus::INVALID_HANDLE => ConsoleError::InvalidHandle,
            NtStatus::ACCESS_DENIED => ConsoleError::AccessDenied,
            NtStatus::NO_MEMORY => ConsoleError::NotEnoughMemory,
            NtStatus::NOT_SUPPORTED => ConsoleError::NotSupported,
            other => ConsoleError::Status(other),
        }
    }
}

impl ConsoleError {
    /// Win32 last-error value reported for this failure
    pub fn win32_code(&self) -> u32 {
        match self {
            ConsoleError::InvalidFunction => 1,
            ConsoleError::AccessDenied => 5,
            ConsoleError::InvalidHandle => 6,
            ConsoleError::NotEnoughMemory => 8,
            ConsoleError::InvalidAccess => 12,
            ConsoleError::NotSupported => 50,
            ConsoleError::InvalidParameter => 87,
            ConsoleError::BufferOverflow => 111,
            ConsoleError::PeerExited => 1067, // ERROR_PROCESS_ABORTED
            ConsoleError::Status(status) => status.to_win32(),
        }
    }

    /// HRESULT form used by the pseudo-console entry points
    pub fn hresult(&self) -> u32 {
        match self {
            ConsoleError::InvalidParameter => 0x8007_0057, // E_INVALIDARG
            ConsoleError::NotEnoughMemory => 0x8007_000E,  // E_OUTOFMEMORY
            ConsoleError::NotSupported => 0x8000_4001,     // E_NOTIMPL
            other => 0x8007_0000 | (other.win32_code() & 0xFFFF),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_buckets() {
        assert_eq!(ConsoleError::from(NtStatus::INVALID_PARAMETER), ConsoleError::InvalidParameter);
        assert_eq!(ConsoleError::from(NtStatus::ACCESS_DENIED), ConsoleError::AccessDenied);
        assert_eq!(
            ConsoleError::from(NtStatus::OBJECT_NAME_NOT_FOUND),
            ConsoleError::Status(NtStatus::OBJECT_NAME_NOT_FOUND)
        );
    }

    #[test]
    fn test_hresults() {
        assert_eq!(ConsoleError::InvalidParameter.hresult(), 0x8007_0057);
        assert_eq!(ConsoleError::NotSupported.hresult(), 0x8000_4001);
        assert_eq!(ConsoleError::InvalidHandle.hresult(), 0x8007_0006);
    }
}
