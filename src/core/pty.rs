//! Pseudo consoles
//!
//! A pseudo console is a private session served by a headless hosting peer
//! whose standard channels are the caller's own pipes. It owns three
//! handles, released together in a fixed order: the signal pipe's write
//! end (which tells the peer to exit), the peer process (waited for, then
//! closed) and the session reference.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::core::kernel::{AccessMask, Kernel, OpenRequest, SpawnRequest};
use crate::core::session::{reference_request, Console};
use crate::core::types::{Coord, Handle, StartupFlags, StartupInfo};
use crate::error::{ConsoleError, Result};

const SERVER_PATH: &str = r"\Device\ConDrv\Server";

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PseudoConsoleFlags: u32 {
        /// Peer starts at the cursor position of the caller's terminal
        const INHERIT_CURSOR = 0x1;
    }
}

/// Pseudo-console handle
pub struct PseudoConsole {
    kernel: Arc<dyn Kernel>,
    reference: Option<Handle>,
    signal: Option<Handle>,
    process: Option<Handle>,
    size: Coord,
}

impl std::fmt::Debug for PseudoConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoConsole")
            .field("reference", &self.reference)
            .field("signal", &self.signal)
            .field("process", &self.process)
            .field("size", &self.size)
            .finish()
    }
}

impl PseudoConsole {
    /// Create a pseudo console of `size` cells reading from `input` and
    /// writing to `output`
    pub fn create(
        console: &Console,
        size: Coord,
        input: Handle,
        output: Handle,
        flags: PseudoConsoleFlags,
    ) -> Result<Self> {
        trace!("create_pseudo_console({:?}, {}, {}, {:?})", size, input, output, flags);
        if size.x <= 0 || size.y <= 0 {
            return Err(ConsoleError::InvalidParameter);
        }

        let mut pty = PseudoConsole {
            kernel: Arc::clone(&console.kernel),
            reference: None,
            signal: None,
            process: None,
            size,
        };

        match pty.start(console, input, output, flags) {
            Ok(()) => Ok(pty),
            Err(e) => {
                warn!("pseudo console creation failed: {}", e);
                pty.close();
                Err(e)
            }
        }
    }

    fn start(&mut self, console: &Console, input: Handle, output: Handle, flags: PseudoConsoleFlags) -> Result<()> {
        let tid = console.process_params().tid;
        let pipe_name = format!(r"\\.\pipe\conclient_pty_signal_pipe{:x}", tid);

        let pipe = self.kernel.create_named_pipe(&pipe_name, true)?;
        let spawned = self.spawn_peer(console, &pipe_name, pipe, input, output, flags);
        let _ = self.kernel.close(pipe);
        spawned
    }

    fn spawn_peer(
        &mut self,
        console: &Console,
        pipe_name: &str,
        pipe: Handle,
        input: Handle,
        output: Handle,
        flags: PseudoConsoleFlags,
    ) -> Result<()> {
        self.signal = Some(self.kernel.open(&OpenRequest::new(pipe_name, AccessMask::GENERIC_WRITE))?);

        let server = self.kernel.open(
            &OpenRequest::new(
                SERVER_PATH,
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE | AccessMask::SYNCHRONIZE,
            )
            .inherit(true),
        )?;
        let spawned = self.spawn_with_server(console, server, pipe, input, output, flags);
        let _ = self.kernel.close(server);
        spawned
    }

    fn spawn_with_server(
        &mut self,
        console: &Console,
        server: Handle,
        pipe: Handle,
        input: Handle,
        output: Handle,
        flags: PseudoConsoleFlags,
    ) -> Result<()> {
        self.reference = Some(self.kernel.open(&reference_request(server))?);

        let conhost = format!(r"{}\conhost.exe", console.settings().system_dir);
        let command_line = format!(
            "\"{}\" --headless {}--width {} --height {} --signal 0x{:x} --server 0x{:x}",
            conhost,
            if flags.contains(PseudoConsoleFlags::INHERIT_CURSOR) {
                "--inheritcursor "
            } else {
                ""
            },
            self.size.x,
            self.size.y,
            pipe.as_raw(),
            server.as_raw(),
        );

        let request = SpawnRequest {
            application: Some(conhost),
            command_line,
            inherit_handles: true,
            detached: true,
            startup: StartupInfo {
                flags: StartupFlags::USESTDHANDLES,
                std_input: Some(input),
                std_output: Some(output),
                std_error: Some(output),
                ..Default::default()
            },
        };
        let peer = self.kernel.spawn(&request)?;
        let _ = self.kernel.close(peer.thread);
        self.process = Some(peer.process);
        debug!("headless peer pid={:#x}", peer.pid);
        Ok(())
    }

    pub fn size(&self) -> Coord {
        self.size
    }

    /// Session reference served by the peer
    pub fn reference(&self) -> Option<Handle> {
        self.reference
    }

    pub fn is_open(&self) -> bool {
        self.reference.is_some() || self.signal.is_some() || self.process.is_some()
    }

    /// Not supported by the headless peer
    pub fn resize(&mut self, size: Coord) -> Result<()> {
        trace!("resize_pseudo_console({:?})", size);
        Err(ConsoleError::NotSupported)
    }

    /// Release the pseudo console: signal the peer, wait for it to exit,
    /// then drop the session reference. Safe to call more than once.
    pub fn close(&mut self) {
        trace!("close_pseudo_console()");
        if let Some(signal) = self.signal.take() {
            let _ = self.kernel.close(signal);
        }
        if let Some(process) = self.process.take() {
            if let Err(status) = self.kernel.wait_any(&[process]) {
                debug!("wait for headless peer: {}", status);
            }
            let _ = self.kernel.close(process);
        }
        if let Some(reference) = self.reference.take() {
            let _ = self.kernel.close(reference);
        }
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::LoopbackHost;
    use crate::core::types::ProcessParams;

    fn setup() -> (Arc<LoopbackHost>, Console, Handle, Handle) {
        let host = Arc::new(LoopbackHost::new());
        let input = host.create_event(true, false, false).unwrap();
        let output = host.create_event(true, false, false).unwrap();
        let params = ProcessParams {
            tid: 0x2a,
            ..Default::default()
        };
        let console = Console::new(host.clone(), params);
        (host, console, input, output)
    }

    #[test]
    fn test_zero_size_spawns_nothing() {
        let (host, console, input, output) = setup();
        let err = PseudoConsole::create(&console, Coord::new(0, 10), input, output, PseudoConsoleFlags::empty())
            .unwrap_err();
        assert_eq!(err, ConsoleError::InvalidParameter);
        assert_eq!(err.hresult(), 0x8007_0057);
        assert!(host.spawn_requests().is_empty());
        assert_eq!(host.open_handle_count(), 2);
    }

    #[test]
    fn test_create_spawns_headless_peer() {
        let (host, console, input, output) = setup();
        let pty = PseudoConsole::create(
            &console,
            Coord::new(120, 30),
            input,
            output,
            PseudoConsoleFlags::INHERIT_CURSOR,
        )
        .unwrap();

        let requests = host.spawn_requests();
        assert_eq!(requests.len(), 1);
        let cmd = &requests[0].command_line;
        assert!(cmd.starts_with("\"C:\\windows\\system32\\conhost.exe\" --headless --inheritcursor --width 120 --height 30 --signal 0x"));
        assert!(cmd.contains(" --server 0x"));
        assert_eq!(requests[0].startup.std_input, Some(input));
        assert_eq!(requests[0].startup.std_error, Some(output));
        assert!(requests[0].detached);

        let screen = host.screen(pty.reference().unwrap()).unwrap();
        assert_eq!((screen.width, screen.height), (120, 30));
        assert_eq!(host.live_peer_count(), 1);
        // input, output, reference, signal, process
        assert_eq!(host.open_handle_count(), 5);
    }

    #[test]
    fn test_close_stops_peer_and_releases_handles() {
        let (host, console, input, output) = setup();
        let mut pty =
            PseudoConsole::create(&console, Coord::new(80, 25), input, output, PseudoConsoleFlags::empty()).unwrap();
        assert!(!host.spawned_command_lines()[0].contains("--inheritcursor"));

        pty.close();
        assert!(!pty.is_open());
        assert_eq!(host.live_peer_count(), 0);
        assert_eq!(host.open_handle_count(), 2);
        pty.close();
        assert_eq!(host.open_handle_count(), 2);
    }

    #[test]
    fn test_drop_closes() {
        let (host, console, input, output) = setup();
        {
            let _pty = PseudoConsole::create(&console, Coord::new(80, 25), input, output, PseudoConsoleFlags::empty())
                .unwrap();
            assert_eq!(host.live_peer_count(), 1);
        }
        assert_eq!(host.live_peer_count(), 0);
        assert_eq!(host.open_handle_count(), 2);
    }

    #[test]
    fn test_spawn_failure_releases_everything() {
        let (host, console, input, output) = setup();
        host.fail_spawn(true);
        let err = PseudoConsole::create(&console, Coord::new(80, 25), input, output, PseudoConsoleFlags::empty())
            .unwrap_err();
        assert_eq!(err, ConsoleError::Status(crate::core::kernel::NtStatus::OBJECT_NAME_NOT_FOUND));
        assert_eq!(host.open_handle_count(), 2);
    }

    #[test]
    fn test_resize_not_supported() {
        let (_host, console, input, output) = setup();
        let mut pty =
            PseudoConsole::create(&console, Coord::new(80, 25), input, output, PseudoConsoleFlags::empty()).unwrap();
        let err = pty.resize(Coord::new(100, 40)).unwrap_err();
        assert_eq!(err, ConsoleError::NotSupported);
        assert_eq!(err.hresult(), 0x8000_4001);
    }
}
