//! Core console-client machinery.
//!
//! This module contains the low-level pieces every caller-facing operation
//! is built from:
//!
//! - **types**: shared data model (handles, coordinates, cells, input records)
//! - **codepage**: narrow/wide transcoding
//! - **protocol**: control opcodes and wire structs
//! - **kernel**: the kernel-object service the client runs on
//! - **ioctl**: one request/response exchange with the hosting peer
//! - **session**: per-process context and attach/allocate/free lifecycle
//! - **ctrl**: control-event handler chain and interrupt interception
//! - **pty**: pseudo consoles served by a headless peer
//! - **host**: in-process loopback kernel and hosting peer
//!
//! # Architecture
//!
//! ```text
//! Console (session)
//! ├── Kernel (open/close/control/spawn/wait)
//! │   └── ioctl ── protocol ── hosting peer
//! ├── std channels + ownership flags
//! └── ctrl handler chain
//! ```

pub mod codepage;
pub mod ctrl;
pub mod host;
pub mod ioctl;
pub mod kernel;
pub mod protocol;
pub mod pty;
pub mod session;
pub mod types;
