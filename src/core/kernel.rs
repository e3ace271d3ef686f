//! Kernel-object service consumed by the console client
//!
//! The console client never talks to the object manager, the process
//! loader or the hosting peer directly. Everything goes through this trait:
//! named-object opens, synchronous device control, process spawning and
//! waiting. [`crate::core::host::LoopbackHost`] provides an in-process
//! implementation.

use std::fmt;

use bitflags::bitflags;

use crate::core::types::{Handle, StartupInfo};

/// Raw status code returned by the kernel-object service
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
    pub const NO_MEMORY: NtStatus = NtStatus(0xC000_0017);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    pub const BUFFER_TOO_SMALL: NtStatus = NtStatus(0xC000_0023);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035);
    pub const PIPE_BROKEN: NtStatus = NtStatus(0xC000_014B);
    pub const POSSIBLE_DEADLOCK: NtStatus = NtStatus(0xC000_0194);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    pub const CONTROL_C_EXIT: NtStatus = NtStatus(0xC000_013A);

    pub fn is_success(self) -> bool {
        self.0 & 0x8000_0000 == 0
    }

    /// Matching Win32 last-error value
    pub fn to_win32(self) -> u32 {
        match self {
            NtStatus::SUCCESS => 0,
            NtStatus::INVALID_HANDLE => 6,
            NtStatus::INVALID_PARAMETER => 87,
            NtStatus::NO_MEMORY => 8,
            NtStatus::ACCESS_DENIED => 5,
            NtStatus::BUFFER_TOO_SMALL => 122,
            NtStatus::OBJECT_NAME_NOT_FOUND => 2,
            NtStatus::OBJECT_NAME_COLLISION => 183,
            NtStatus::PIPE_BROKEN => 109,
            NtStatus::POSSIBLE_DEADLOCK => 1131,
            NtStatus::NOT_SUPPORTED => 50,
            _ => 317, // ERROR_MR_MID_NOT_FOUND
        }
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({:#010x})", self.0)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {:#010x}", self.0)
    }
}

impl std::error::Error for NtStatus {}

pub type KernelResult<T> = std::result::Result<T, NtStatus>;

bitflags! {
    /// Requested access rights
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const READ_DATA        = 0x0000_0001;
        const WRITE_DATA       = 0x0000_0002;
        const READ_PROPERTIES  = 0x0000_0008;
        const WRITE_PROPERTIES = 0x0000_0010;
        const READ_ATTRIBUTES  = 0x0000_0080;
        const WRITE_ATTRIBUTES = 0x0000_0100;
        const SYNCHRONIZE      = 0x0010_0000;
        const GENERIC_WRITE    = 0x4000_0000;
        const GENERIC_READ     = 0x8000_0000;
    }
}

bitflags! {
    /// Sharing mode granted to later opens
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ShareMode: u32 {
        const READ   = 0x1;
        const WRITE  = 0x2;
        const DELETE = 0x4;
    }
}

/// Whether an open must find an existing object or may create one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Disposition {
    #[default]
    Open,
    Create,
}

/// Open a named object, optionally relative to a root handle
#[derive(Clone, Debug)]
pub struct OpenRequest<'a> {
    pub name: &'a str,
    pub root: Option<Handle>,
    pub access: AccessMask,
    pub share: ShareMode,
    pub disposition: Disposition,
    /// Synchronous I/O on the resulting handle
    pub synchronous: bool,
    pub inherit: bool,
}

impl<'a> OpenRequest<'a> {
    pub fn new(name: &'a str, access: AccessMask) -> Self {
        Self {
            name,
            root: None,
            access,
            share: ShareMode::empty(),
            disposition: Disposition::Open,
            synchronous: true,
            inherit: false,
        }
    }

    pub fn root(mut self, root: Handle) -> Self {
        self.root = Some(root);
        self
    }

    pub fn share(mut self, share: ShareMode) -> Self {
        self.share = share;
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn inherit(mut self, inherit: bool) -> Self {
        self.inherit = inherit;
        self
    }
}

/// Launch a process
#[derive(Clone, Debug, Default)]
pub struct SpawnRequest {
    pub application: Option<String>,
    pub command_line: String,
    pub inherit_handles: bool,
    /// No console of its own
    pub detached: bool,
    pub startup: StartupInfo,
}

/// Handles and ids of a spawned process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub process: Handle,
    pub thread: Handle,
    pub pid: u32,
    pub tid: u32,
}

/// Generic kernel-object primitives
pub trait Kernel: Send + Sync {
    /// Open or create a named object
    fn open(&self, request: &OpenRequest<'_>) -> KernelResult<Handle>;

    fn close(&self, handle: Handle) -> KernelResult<()>;

    fn duplicate(&self, handle: Handle, inherit: bool) -> KernelResult<Handle>;

    /// Synchronous device control; returns the number of output bytes produced
    fn control(&self, handle: Handle, code: u32, input: &[u8], output: &mut [u8]) -> KernelResult<usize>;

    fn create_event(&self, manual_reset: bool, initial_state: bool, inherit: bool) -> KernelResult<Handle>;

    /// Server end of an inbound byte pipe
    fn create_named_pipe(&self, name: &str, inherit: bool) -> KernelResult<Handle>;

    fn spawn(&self, request: &SpawnRequest) -> KernelResult<ProcessInfo>;

    /// Wait without timeout until one of `handles` is signalled; returns its index
    fn wait_any(&self, handles: &[Handle]) -> KernelResult<usize>;

    /// Tell the server this process no longer has a console
    fn free_console(&self) -> KernelResult<()>;

    /// Event signalled when input is available on a console channel
    fn console_wait_event(&self, handle: Handle) -> KernelResult<Option<Handle>>;
}
