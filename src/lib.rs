//! conclient - client side of a console subsystem
//!
//! A process talks to its console through a hosting peer: every operation
//! is one control request on a kernel handle, answered by the peer that
//! owns the screen buffers and input queue. This crate is that client.
//!
//! # Features
//!
//! - **Lifecycle**: attach to another process's console, allocate a new
//!   one, free it, or bind the console inherited at startup
//! - **Screen buffers**: rectangular and linear read/write, fill, scroll
//! - **Input queue**: peek, write and count input records
//! - **Properties**: modes, codepages, cursor, window, title, input-exe name
//! - **Control events**: ordered handler chain and interrupt interception
//! - **Pseudo consoles**: headless peers driven over caller pipes
//! - **Narrow/wide**: every text-bearing call has a codepage-transcoding form
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use conclient::{Console, Coord, LoopbackHost, ProcessParams, StdChannel};
//!
//! let host = Arc::new(LoopbackHost::new());
//! let console = Console::new(host, ProcessParams::default());
//! console.alloc().unwrap();
//!
//! let out = console.std_handle(StdChannel::Output).unwrap();
//! console.fill_output_character(out, 'X' as u16, 5, Coord::new(0, 0)).unwrap();
//! console.free().unwrap();
//! ```

pub mod config;
pub mod console;
pub mod core;
pub mod error;

pub use crate::config::Config;
pub use crate::core::ctrl::{CtrlHandler, Interception};
pub use crate::core::host::LoopbackHost;
pub use crate::core::kernel::{Kernel, NtStatus};
pub use crate::core::pty::{PseudoConsole, PseudoConsoleFlags};
pub use crate::core::session::{Console, ConsoleSettings, SessionState};
pub use crate::core::types::{
    CharInfo, Coord, CtrlEvent, CursorInfo, Handle, InputRecord, ProcessParams, ScreenBufferInfo,
    ScreenBufferInfoEx, SmallRect, StdChannel,
};
pub use crate::error::{ConsoleError, Result};
