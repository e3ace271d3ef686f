//! Caller-facing console operations.
//!
//! Every operation is a method on [`Console`](crate::core::session::Console)
//! that validates its arguments, performs one control exchange through
//! [`crate::core::ioctl`] and transcodes at the narrow/wide boundary.
//!
//! - **output**: screen-buffer read/write/fill/scroll and buffer activation
//! - **info**: modes, codepages, cursor, window, buffer geometry, title,
//!   input-exe name
//! - **input**: input-queue peek, write and count

pub mod info;
pub mod input;
pub mod output;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::core::host::LoopbackHost;
    use crate::core::session::Console;
    use crate::core::types::{Handle, ProcessParams, StdChannel};

    /// Console attached to an 80x25 session owned by pid 1234; returns the
    /// session's output and input channels
    pub fn attached() -> (Arc<LoopbackHost>, Console, Handle, Handle) {
        let host = Arc::new(LoopbackHost::new());
        host.add_console_process(1234);
        let console = Console::new(host.clone(), ProcessParams::default()).with_exit_hook(|_| {});
        console.attach(1234).unwrap();
        let output = console.std_handle(StdChannel::Output).unwrap();
        let input = console.std_handle(StdChannel::Input).unwrap();
        (host, console, output, input)
    }
}
