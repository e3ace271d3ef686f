//! Session lifecycle
//!
//! [`Console`] is the explicit per-process console context: the kernel-object
//! service, the session and connection handles, the standard channels and
//! their ownership flags, the ctrl-handler chain and the input-exe name.
//! Every state transition runs under one re-entrant guard.
//!
//! ```text
//! Detached ──attach/alloc/init──▶ Attaching ──▶ Attached
//!     ▲                              │ error        │
//!     └──────────── Detaching ◀──────┴──── free ────┘
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::{debug, error, trace, warn};

use crate::core::codepage::{CP_OEM_US, CP_WINDOWS_1252};
use crate::core::ctrl::{CtrlHandler, DebuggerHook, ExitHook};
use crate::core::ioctl::ioctl_in;
use crate::core::kernel::{AccessMask, Disposition, Kernel, OpenRequest, ShareMode, SpawnRequest};
use crate::core::protocol::IOCTL_CONDRV_BIND_PID;
use crate::core::types::{
    ChannelFlags, Handle, InheritedConsole, ProcessParams, StartupFlags, StartupInfo, StdChannel, Subsystem,
};
use crate::error::{ConsoleError, Result};

const CONNECTION_PATH: &str = r"\Device\ConDrv\Connection";
const CURRENT_IN_PATH: &str = r"\Device\ConDrv\CurrentIn";
const CURRENT_OUT_PATH: &str = r"\Device\ConDrv\CurrentOut";
const SCREEN_BUFFER_PATH: &str = r"\Device\ConDrv\ScreenBuffer";

/// Only text-mode screen buffers exist
pub const CONSOLE_TEXTMODE_BUFFER: u32 = 1;

/// Longest input-exe name kept, in UTF-16 units
pub const MAX_PATH: usize = 260;

/// Library-side settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleSettings {
    /// Hosting peer started by [`Console::alloc`]
    pub host_command: String,
    /// Directory holding `conhost.exe` for pseudo consoles
    pub system_dir: String,
    /// Codepage reported when the session has none set
    pub oem_cp: u32,
    /// Codepage of the input-exe name's narrow form
    pub ansi_cp: u32,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            host_command: "wineconsole".to_string(),
            system_dir: r"C:\windows\system32".to_string(),
            oem_cp: CP_OEM_US,
            ansi_cp: CP_WINDOWS_1252,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Detached,
    Attaching,
    Attached,
    Detaching,
}

pub(crate) struct ProcessState {
    pub(crate) params: ProcessParams,
    pub(crate) console: Option<Handle>,
    pub(crate) connection: Option<Handle>,
    pub(crate) flags: ChannelFlags,
    pub(crate) input_exe: Vec<u16>,
    pub(crate) wait_event: Option<Handle>,
    pub(crate) session: SessionState,
    /// Custom handlers in registration order
    pub(crate) handlers: Vec<CtrlHandler>,
    pub(crate) ignore_ctrl: bool,
}

/// Per-process console context
pub struct Console {
    pub(crate) kernel: Arc<dyn Kernel>,
    pub(crate) settings: ConsoleSettings,
    pub(crate) state: ReentrantMutex<RefCell<ProcessState>>,
    pub(crate) default_handler: CtrlHandler,
    pub(crate) exit_hook: ExitHook,
    pub(crate) debugger: Option<DebuggerHook>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("console", &self.console_handle())
            .finish_non_exhaustive()
    }
}

impl Console {
    pub fn new(kernel: Arc<dyn Kernel>, params: ProcessParams) -> Self {
        Self {
            kernel,
            settings: ConsoleSettings::default(),
            state: ReentrantMutex::new(RefCell::new(ProcessState {
                params,
                console: None,
                connection: None,
                flags: ChannelFlags::empty(),
                input_exe: Vec::new(),
                wait_event: None,
                session: SessionState::Detached,
                handlers: Vec::new(),
                ignore_ctrl: false,
            })),
            default_handler: Arc::new(|_| true),
            exit_hook: Arc::new(|status| std::process::exit(status as i32)),
            debugger: None,
        }
    }

    pub fn with_settings(mut self, settings: ConsoleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace process termination, e.g. to observe it in tests
    pub fn with_exit_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.exit_hook = Arc::new(hook);
        self
    }

    pub fn with_debugger<F>(mut self, debugger: F) -> Self
    where
        F: Fn(crate::core::types::CtrlEvent) -> bool + Send + Sync + 'static,
    {
        self.debugger = Some(Arc::new(debugger));
        self
    }

    pub fn kernel(&self) -> &dyn Kernel {
        &*self.kernel
    }

    pub fn settings(&self) -> &ConsoleSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().borrow().session
    }

    pub fn is_attached(&self) -> bool {
        self.console_handle().is_some()
    }

    /// Session handle, once attached
    pub fn console_handle(&self) -> Option<Handle> {
        self.state.lock().borrow().console
    }

    pub(crate) fn console_handle_or_null(&self) -> Handle {
        self.console_handle().unwrap_or(Handle::NULL)
    }

    pub fn connection(&self) -> Option<Handle> {
        self.state.lock().borrow().connection
    }

    pub fn owned_channels(&self) -> ChannelFlags {
        self.state.lock().borrow().flags
    }

    pub fn std_handle(&self, channel: StdChannel) -> Option<Handle> {
        self.state.lock().borrow().params.std_handles.get(channel)
    }

    /// Caller-supplied handles are never owned, so detach leaves them open
    pub fn set_std_handle(&self, channel: StdChannel, handle: Option<Handle>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.params.std_handles.set(channel, handle);
        state.flags.remove(channel.into());
    }

    pub fn process_params(&self) -> ProcessParams {
        self.state.lock().borrow().params.clone()
    }

    /// Bind to the console of process `pid`
    pub fn attach(&self, pid: u32) -> Result<()> {
        trace!("attach({:#x})", pid);
        let guard = self.state.lock();
        if guard.borrow().console.is_some() {
            warn!("console already attached");
            return Err(ConsoleError::AccessDenied);
        }

        guard.borrow_mut().session = SessionState::Attaching;
        match self.attach_locked(&guard, pid) {
            Ok(()) => {
                guard.borrow_mut().session = SessionState::Attached;
                Ok(())
            }
            Err(e) => {
                debug!("attach to {:#x} failed: {}", pid, e);
                let _ = self.free_locked(&guard);
                Err(e)
            }
        }
    }

    fn attach_locked(&self, state: &RefCell<ProcessState>, pid: u32) -> Result<()> {
        let connection = self.kernel.open(
            &OpenRequest::new(
                CONNECTION_PATH,
                AccessMask::WRITE_PROPERTIES | AccessMask::READ_PROPERTIES | AccessMask::SYNCHRONIZE,
            )
            .synchronous(false),
        )?;
        state.borrow_mut().connection = Some(connection);

        ioctl_in(&*self.kernel, connection, IOCTL_CONDRV_BIND_PID, &pid)?;

        let console = self.kernel.open(&reference_request(connection))?;
        state.borrow_mut().console = Some(console);

        let use_std = state.borrow().params.startup.flags.contains(StartupFlags::USESTDHANDLES);
        self.init_std_handles_locked(state, !use_std)
    }

    /// Start a hosting peer and bind to the console it creates
    pub fn alloc(&self) -> Result<()> {
        trace!("alloc()");
        let guard = self.state.lock();
        if guard.borrow().console.is_some() {
            warn!("console already attached");
            return Err(ConsoleError::AccessDenied);
        }

        guard.borrow_mut().session = SessionState::Attaching;
        match self.alloc_locked(&guard) {
            Ok(()) => {
                guard.borrow_mut().session = SessionState::Attached;
                Ok(())
            }
            Err(e) => {
                error!("can't allocate console: {}", e);
                let _ = self.free_locked(&guard);
                Err(e)
            }
        }
    }

    fn alloc_locked(&self, state: &RefCell<ProcessState>) -> Result<()> {
        let (startup, image_path) = {
            let state = state.borrow();
            (state.params.startup.clone(), state.params.image_path.clone())
        };

        let event = self.kernel.create_event(true, false, true)?;
        let request = SpawnRequest {
            application: None,
            command_line: format!("{} --use-event={}", self.settings.host_command, event.as_raw()),
            inherit_handles: true,
            detached: true,
            startup: peer_startup(&startup, &image_path),
        };

        let ready = match self.kernel.spawn(&request) {
            Ok(peer) => {
                let waited = self.kernel.wait_any(&[event, peer.process]);
                let _ = self.kernel.close(peer.thread);
                let _ = self.kernel.close(peer.process);
                if waited.is_ok() {
                    debug!("started {} pid={:#x} tid={:#x}", self.settings.host_command, peer.pid, peer.tid);
                }
                waited.map(|index| index == 0)
            }
            Err(status) => Err(status),
        };
        let _ = self.kernel.close(event);

        match ready {
            Ok(true) => {}
            Ok(false) => return Err(ConsoleError::PeerExited),
            Err(status) => return Err(status.into()),
        }

        self.init_std_handles_locked(state, !startup.flags.contains(StartupFlags::USESTDHANDLES))?;

        let console = self.kernel.open(
            &OpenRequest::new(
                "CONIN$",
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE | AccessMask::SYNCHRONIZE,
            )
            .synchronous(false),
        )?;
        state.borrow_mut().console = Some(console);
        Ok(())
    }

    /// Detach from the session.
    ///
    /// Always tears everything down; the result is the server's answer to
    /// the detach notification. Calling it again is harmless.
    pub fn free(&self) -> Result<()> {
        trace!("free()");
        let guard = self.state.lock();
        self.free_locked(&guard)
    }

    fn free_locked(&self, state: &RefCell<ProcessState>) -> Result<()> {
        let (handles, wait_event) = {
            let mut state = state.borrow_mut();
            state.session = SessionState::Detaching;

            let mut handles: Vec<Handle> = Vec::with_capacity(5);
            handles.extend(state.connection.take());
            handles.extend(state.console.take());

            let owned = std::mem::take(&mut state.flags);
            for channel in [StdChannel::Input, StdChannel::Output, StdChannel::Error] {
                if owned.contains(channel.into()) {
                    handles.extend(state.params.std_handles.get(channel));
                    state.params.std_handles.set(channel, None);
                }
            }
            (handles, state.wait_event.take())
        };

        for handle in handles {
            let _ = self.kernel.close(handle);
        }
        let notified = self.kernel.free_console();
        if let Some(event) = wait_event {
            let _ = self.kernel.close(event);
        }

        state.borrow_mut().session = SessionState::Detached;
        notified.map_err(ConsoleError::from)
    }

    /// Re-establish the console handed down at process start
    pub fn init(&self) -> Result<()> {
        trace!("init()");
        let (inherited, subsystem) = {
            let guard = self.state.lock();
            let state = guard.borrow();
            (state.params.console, state.params.subsystem)
        };

        match inherited {
            InheritedConsole::None => Ok(()),
            InheritedConsole::AutoAlloc => {
                if subsystem != Subsystem::Console {
                    return Ok(());
                }
                self.alloc().map_err(|e| {
                    warn!("console auto-allocation failed: {}", e);
                    e
                })
            }
            InheritedConsole::Inherited(reference) => {
                let guard = self.state.lock();
                if guard.borrow().console.is_some() {
                    return Err(ConsoleError::AccessDenied);
                }
                let connection = self.kernel.open(
                    &OpenRequest::new(
                        "Connection",
                        AccessMask::WRITE_PROPERTIES | AccessMask::READ_PROPERTIES | AccessMask::SYNCHRONIZE,
                    )
                    .root(reference)
                    .synchronous(false),
                )?;
                let mut state = guard.borrow_mut();
                state.connection = Some(connection);
                state.console = Some(reference);
                state.session = SessionState::Attached;
                Ok(())
            }
        }
    }

    /// Open the session's current input/output and install them as standard
    /// channels. With `override_all` every channel is replaced; otherwise
    /// only missing ones are filled in. The error channel is a duplicate of
    /// the output channel when both are created here.
    pub fn init_std_handles(&self, override_all: bool) -> Result<()> {
        trace!("init_std_handles({})", override_all);
        let guard = self.state.lock();
        self.init_std_handles_locked(&guard, override_all)
    }

    fn init_std_handles_locked(&self, state: &RefCell<ProcessState>, override_all: bool) -> Result<()> {
        let access = AccessMask::READ_DATA
            | AccessMask::WRITE_DATA
            | AccessMask::SYNCHRONIZE
            | AccessMask::READ_ATTRIBUTES
            | AccessMask::WRITE_ATTRIBUTES;
        let open_current = |name: &str| {
            self.kernel.open(
                &OpenRequest::new(name, access)
                    .share(ShareMode::all())
                    .disposition(Disposition::Create)
                    .inherit(true),
            )
        };

        if override_all || state.borrow().params.std_handles.input.is_none() {
            let input = open_current(CURRENT_IN_PATH)?;
            let mut state = state.borrow_mut();
            state.flags |= ChannelFlags::INPUT;
            state.params.std_handles.input = Some(input);
        }

        let (std_out, std_err) = if override_all {
            (None, None)
        } else {
            let state = state.borrow();
            (state.params.std_handles.output, state.params.std_handles.error)
        };
        if std_out.is_some() && std_err.is_some() {
            return Ok(());
        }

        let output = open_current(CURRENT_OUT_PATH)?;
        if std_out.is_none() {
            let mut state = state.borrow_mut();
            state.flags |= ChannelFlags::OUTPUT;
            state.params.std_handles.output = Some(output);
        }
        if std_err.is_none() {
            let error = if std_out.is_none() {
                self.kernel.duplicate(output, true)?
            } else {
                output
            };
            let mut state = state.borrow_mut();
            state.flags |= ChannelFlags::ERROR;
            state.params.std_handles.error = Some(error);
        }
        Ok(())
    }

    /// Handle to wait on for input on `handle`; the session's wait event once
    /// the server provides one, `handle` itself otherwise
    pub fn wait_handle(&self, handle: Handle) -> Handle {
        let event = match self.kernel.console_wait_event(handle) {
            Ok(Some(event)) => event,
            _ => return handle,
        };
        let guard = self.state.lock();
        let cached = {
            let mut state = guard.borrow_mut();
            match state.wait_event {
                Some(cached) => cached,
                None => {
                    state.wait_event = Some(event);
                    return event;
                }
            }
        };
        let _ = self.kernel.close(event);
        cached
    }

    /// Open an additional screen buffer on the current session
    pub fn create_screen_buffer(
        &self,
        access: AccessMask,
        share: ShareMode,
        inherit: bool,
        flags: u32,
    ) -> Result<Handle> {
        trace!("create_screen_buffer({:?}, {:?}, {}, {:#x})", access, share, inherit, flags);
        if flags != CONSOLE_TEXTMODE_BUFFER {
            return Err(ConsoleError::InvalidParameter);
        }
        let handle = self.kernel.open(
            &OpenRequest::new(SCREEN_BUFFER_PATH, access)
                .share(share)
                .inherit(inherit),
        )?;
        Ok(handle)
    }
}

/// Session reference opened relative to a connection or server handle
pub(crate) fn reference_request(root: Handle) -> OpenRequest<'static> {
    OpenRequest::new(
        "Reference",
        AccessMask::READ_DATA
            | AccessMask::WRITE_DATA
            | AccessMask::WRITE_PROPERTIES
            | AccessMask::READ_PROPERTIES
            | AccessMask::SYNCHRONIZE,
    )
    .root(root)
}

/// Startup hints forwarded to a new hosting peer
fn peer_startup(app: &StartupInfo, image_path: &str) -> StartupInfo {
    let mut peer = StartupInfo::default();
    if app.flags.contains(StartupFlags::USECOUNTCHARS) {
        peer.flags |= StartupFlags::USECOUNTCHARS;
        peer.count_chars = app.count_chars;
    }
    if app.flags.contains(StartupFlags::USEFILLATTRIBUTE) {
        peer.flags |= StartupFlags::USEFILLATTRIBUTE;
        peer.fill_attribute = app.fill_attribute;
    }
    if app.flags.contains(StartupFlags::USESHOWWINDOW) {
        peer.flags |= StartupFlags::USESHOWWINDOW;
        peer.show_window = app.show_window;
    }
    peer.title = match &app.title {
        Some(title) => Some(title.clone()),
        None if !image_path.is_empty() => Some(image_path.to_string()),
        None => None,
    };
    peer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::host::LoopbackHost;
    use crate::core::types::{Coord, StdHandles};

    fn setup() -> (Arc<LoopbackHost>, Console) {
        let host = Arc::new(LoopbackHost::new());
        let console = Console::new(host.clone(), ProcessParams::default()).with_exit_hook(|_| {});
        (host, console)
    }

    #[test]
    fn test_attach_populates_all_channels() {
        let (host, console) = setup();
        host.add_console_process(1234);

        console.attach(1234).unwrap();
        assert!(console.is_attached());
        assert!(console.connection().is_some());
        assert_eq!(console.state(), SessionState::Attached);
        assert_eq!(console.owned_channels(), ChannelFlags::all());

        let input = console.std_handle(StdChannel::Input).unwrap();
        let output = console.std_handle(StdChannel::Output).unwrap();
        let error = console.std_handle(StdChannel::Error).unwrap();
        assert_ne!(output, error);
        assert_eq!(host.session_of(input), host.session_of(output));
        assert_eq!(host.session_of(error), host.session_of(console.console_handle().unwrap()));
    }

    #[test]
    fn test_second_attach_is_rejected_without_side_effects() {
        let (host, console) = setup();
        host.add_console_process(1234);
        host.add_console_process(5678);
        console.attach(1234).unwrap();

        let before = (console.console_handle(), console.connection(), console.process_params().std_handles);
        let handles = host.open_handle_count();

        assert_eq!(console.attach(5678), Err(ConsoleError::AccessDenied));
        let after = (console.console_handle(), console.connection(), console.process_params().std_handles);
        assert_eq!(before, after);
        assert_eq!(host.open_handle_count(), handles);
        assert!(host.is_open(console.connection().unwrap()));
    }

    #[test]
    fn test_attach_failure_rolls_back() {
        let (host, console) = setup();
        assert_eq!(console.attach(99), Err(ConsoleError::InvalidHandle));
        assert!(!console.is_attached());
        assert_eq!(console.connection(), None);
        assert_eq!(console.state(), SessionState::Detached);
        assert_eq!(host.open_handle_count(), 0);
    }

    #[test]
    fn test_attach_keeps_supplied_channels() {
        let host = Arc::new(LoopbackHost::new());
        host.add_console_process(1234);
        let (_, _, supplied) = host.create_client_session(80, 25);
        let params = ProcessParams {
            startup: StartupInfo {
                flags: StartupFlags::USESTDHANDLES,
                ..Default::default()
            },
            std_handles: StdHandles {
                input: None,
                output: Some(supplied),
                error: None,
            },
            ..Default::default()
        };
        let console = Console::new(host.clone(), params);
        console.attach(1234).unwrap();

        assert_eq!(console.std_handle(StdChannel::Output), Some(supplied));
        assert_eq!(console.owned_channels(), ChannelFlags::INPUT | ChannelFlags::ERROR);

        console.free().unwrap();
        assert!(host.is_open(supplied));
        assert_eq!(console.std_handle(StdChannel::Output), Some(supplied));
        assert_eq!(console.std_handle(StdChannel::Input), None);
    }

    #[test]
    fn test_free_is_idempotent() {
        let (host, console) = setup();
        host.add_console_process(1234);
        console.attach(1234).unwrap();
        console.wait_handle(console.console_handle().unwrap());

        console.free().unwrap();
        assert_eq!(host.open_handle_count(), 0);
        assert_eq!(console.owned_channels(), ChannelFlags::empty());
        console.free().unwrap();
        assert_eq!(host.open_handle_count(), 0);
        assert_eq!(host.free_console_calls(), 2);
    }

    #[test]
    fn test_free_reports_notify_failure() {
        let (host, console) = setup();
        host.add_console_process(1234);
        console.attach(1234).unwrap();
        host.fail_free_console(true);

        assert!(console.free().is_err());
        assert!(!console.is_attached());
        assert_eq!(host.open_handle_count(), 0);
    }

    #[test]
    fn test_alloc_spawns_peer_and_binds() {
        let host = Arc::new(LoopbackHost::new());
        let params = ProcessParams {
            image_path: r"C:\apps\demo.exe".to_string(),
            startup: StartupInfo {
                flags: StartupFlags::USECOUNTCHARS | StartupFlags::USEFILLATTRIBUTE,
                count_chars: Coord::new(100, 40),
                fill_attribute: 0x1e,
                ..Default::default()
            },
            ..Default::default()
        };
        let console = Console::new(host.clone(), params);
        console.alloc().unwrap();

        let requests = host.spawn_requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].command_line.starts_with("wineconsole --use-event="));
        assert!(requests[0].detached && requests[0].inherit_handles);
        assert_eq!(requests[0].startup.title.as_deref(), Some(r"C:\apps\demo.exe"));
        assert_eq!(requests[0].startup.count_chars, Coord::new(100, 40));

        let output = console.std_handle(StdChannel::Output).unwrap();
        let screen = host.screen(output).unwrap();
        assert_eq!((screen.width, screen.height, screen.attr), (100, 40, 0x1e));
        assert_eq!(console.owned_channels(), ChannelFlags::all());
        // Event, peer process and peer thread handles are gone again
        assert_eq!(host.open_handle_count(), 4);
    }

    #[test]
    fn test_alloc_peer_exit_is_failure() {
        let (host, console) = setup();
        host.peer_exits_early(true);
        assert_eq!(console.alloc(), Err(ConsoleError::PeerExited));
        assert!(!console.is_attached());
        assert_eq!(host.open_handle_count(), 0);
    }

    #[test]
    fn test_alloc_rolls_back_when_input_open_fails() {
        let (host, console) = setup();
        host.fail_open("CONIN$");
        assert_eq!(console.alloc(), Err(ConsoleError::AccessDenied));
        assert_eq!(console.std_handle(StdChannel::Input), None);
        assert_eq!(console.owned_channels(), ChannelFlags::empty());
        assert_eq!(host.open_handle_count(), 0);
    }

    #[test]
    fn test_alloc_while_attached_is_denied() {
        let (host, console) = setup();
        console.alloc().unwrap();
        assert_eq!(console.alloc(), Err(ConsoleError::AccessDenied));
        assert_eq!(host.spawn_requests().len(), 1);
    }

    #[test]
    fn test_init_auto_alloc_follows_subsystem() {
        let host = Arc::new(LoopbackHost::new());
        let gui = Console::new(
            host.clone(),
            ProcessParams {
                console: InheritedConsole::AutoAlloc,
                subsystem: Subsystem::Windows,
                ..Default::default()
            },
        );
        gui.init().unwrap();
        assert!(!gui.is_attached());
        assert!(host.spawn_requests().is_empty());

        let cui = Console::new(
            host.clone(),
            ProcessParams {
                console: InheritedConsole::AutoAlloc,
                ..Default::default()
            },
        );
        cui.init().unwrap();
        assert!(cui.is_attached());
        assert_eq!(host.spawn_requests().len(), 1);
    }

    #[test]
    fn test_init_inherited_reference() {
        let host = Arc::new(LoopbackHost::new());
        let (reference, _, _) = host.create_client_session(80, 25);
        let console = Console::new(
            host.clone(),
            ProcessParams {
                console: InheritedConsole::Inherited(reference),
                ..Default::default()
            },
        );
        console.init().unwrap();
        assert_eq!(console.console_handle(), Some(reference));
        assert_eq!(host.session_of(console.connection().unwrap()), host.session_of(reference));
        assert_eq!(console.owned_channels(), ChannelFlags::empty());
    }

    #[test]
    fn test_wait_handle_caches_first_event() {
        let (host, console) = setup();
        host.add_console_process(1234);
        console.attach(1234).unwrap();
        let input = console.std_handle(StdChannel::Input).unwrap();

        let first = console.wait_handle(input);
        assert_ne!(first, input);
        let count = host.open_handle_count();
        assert_eq!(console.wait_handle(input), first);
        assert_eq!(host.open_handle_count(), count);
    }

    #[test]
    fn test_wait_handle_passthrough_for_plain_handles() {
        let (host, console) = setup();
        let event = host.create_event(true, false, false).unwrap();
        assert_eq!(console.wait_handle(event), event);
    }

    #[test]
    fn test_screen_buffer_requires_text_mode() {
        let (host, console) = setup();
        host.add_console_process(1234);
        console.attach(1234).unwrap();
        assert_eq!(
            console.create_screen_buffer(AccessMask::GENERIC_READ, ShareMode::empty(), false, 2),
            Err(ConsoleError::InvalidParameter)
        );
        let buffer = console
            .create_screen_buffer(AccessMask::GENERIC_READ, ShareMode::empty(), false, CONSOLE_TEXTMODE_BUFFER)
            .unwrap();
        assert!(host.screen(buffer).is_some());
        assert!(!host.is_inheritable(buffer));
        let inherited = console
            .create_screen_buffer(AccessMask::GENERIC_READ, ShareMode::empty(), true, CONSOLE_TEXTMODE_BUFFER)
            .unwrap();
        assert!(host.is_inheritable(inherited));
    }
}
