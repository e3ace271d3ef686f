//! In-process loopback host
//!
//! [`LoopbackHost`] implements [`Kernel`] entirely in memory: a handle table,
//! console sessions with real screen buffers, events, named pipes and the
//! two kinds of hosting peer the console client spawns. It never blocks; a
//! wait on handles none of which is signalled reports
//! `STATUS_POSSIBLE_DEADLOCK`.
//!
//! Peers are recognised by their command line:
//!
//! - `... --use-event=<n>` creates a session for the calling process, signals
//!   event `<n>` and stays alive.
//! - `... --headless ... --signal 0x<h> --server 0x<h>` serves the session
//!   behind the server handle and exits once every write end of the signal
//!   pipe is closed.
//!
//! Anything else exits immediately.

pub mod screen;
pub mod server;

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::kernel::{Disposition, Kernel, KernelResult, NtStatus, OpenRequest, ProcessInfo, SpawnRequest};
use crate::core::protocol::{CtrlEventParams, IOCTL_CONDRV_BIND_PID};
use crate::core::types::{Handle, StartupFlags};

pub use screen::ScreenBuffer;
pub use server::{BufferId, HostSession};

pub type SessionId = u32;

const PIPE_PREFIX: &str = r"\\.\pipe\";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Object {
    Connection { session: Option<SessionId> },
    Reference { session: SessionId },
    Server { session: SessionId },
    Input { session: SessionId },
    Output { session: SessionId, buffer: BufferId },
    Event { event: usize },
    Process { process: usize },
    Thread { process: usize },
    PipeServer { pipe: usize },
    PipeClient { pipe: usize },
}

#[derive(Clone, Copy, Debug)]
struct HandleEntry {
    object: Object,
    inherit: bool,
}

#[derive(Debug)]
struct EventRecord {
    signalled: bool,
    manual_reset: bool,
}

#[derive(Debug)]
struct ProcessRecord {
    exited: bool,
    signal_pipe: Option<usize>,
}

#[derive(Debug)]
struct PipeRecord {
    name: String,
    server_open: bool,
}

#[derive(Debug, Default)]
struct Failures {
    opens: HashSet<String>,
    spawn: bool,
    peer_exits_early: bool,
    free_console: bool,
}

#[derive(Default)]
struct HostState {
    next_handle: u64,
    handles: BTreeMap<Handle, HandleEntry>,
    next_session: SessionId,
    sessions: BTreeMap<SessionId, HostSession>,
    events: Vec<EventRecord>,
    processes: Vec<ProcessRecord>,
    pipes: Vec<PipeRecord>,
    console_pids: HashMap<u32, SessionId>,
    /// Session the calling process is bound to, as the server sees it
    current: Option<SessionId>,
    next_pid: u32,
    failures: Failures,
    spawned: Vec<SpawnRequest>,
    free_console_calls: usize,
}

impl HostState {
    fn insert(&mut self, object: Object, inherit: bool) -> Handle {
        // Handle values are multiples of 4, like the real handle table
        self.next_handle += 4;
        let handle = Handle(self.next_handle);
        self.handles.insert(handle, HandleEntry { object, inherit });
        handle
    }

    fn object(&self, handle: Handle) -> KernelResult<Object> {
        self.handles
            .get(&handle)
            .map(|entry| entry.object)
            .ok_or(NtStatus::INVALID_HANDLE)
    }

    fn new_session(&mut self, width: u16, height: u16) -> SessionId {
        self.next_session += 1;
        let id = self.next_session;
        self.sessions.insert(id, HostSession::new(width, height));
        id
    }

    fn current(&self) -> KernelResult<SessionId> {
        self.current.ok_or(NtStatus::INVALID_HANDLE)
    }

    fn session_of(&self, object: Object) -> Option<SessionId> {
        match object {
            Object::Reference { session }
            | Object::Server { session }
            | Object::Input { session }
            | Object::Output { session, .. } => Some(session),
            Object::Connection { session } => session,
            _ => None,
        }
    }

    fn new_process(&mut self, exited: bool, signal_pipe: Option<usize>) -> ProcessInfo {
        self.processes.push(ProcessRecord { exited, signal_pipe });
        let index = self.processes.len() - 1;
        self.next_pid += 4;
        let pid = 0x100 + self.next_pid;
        ProcessInfo {
            process: self.insert(Object::Process { process: index }, false),
            thread: self.insert(Object::Thread { process: index }, false),
            pid,
            tid: pid + 1,
        }
    }

    /// Peer reached through `--use-event=<n>`
    fn spawn_console_peer(&mut self, request: &SpawnRequest, event: Option<Handle>) -> ProcessInfo {
        if self.failures.peer_exits_early {
            debug!("peer exits before signalling");
            return self.new_process(true, None);
        }
        let event = match event.map(|h| self.object(h)) {
            Some(Ok(Object::Event { event })) => event,
            _ => return self.new_process(true, None),
        };

        let startup = &request.startup;
        let (width, height) = if startup.flags.contains(StartupFlags::USECOUNTCHARS)
            && startup.count_chars.x > 0
            && startup.count_chars.y > 0
        {
            (startup.count_chars.x as u16, startup.count_chars.y as u16)
        } else {
            (80, 25)
        };
        let id = self.new_session(width, height);
        if let Some(session) = self.sessions.get_mut(&id) {
            if let Some(title) = &startup.title {
                session.title = title.encode_utf16().collect();
            }
            if startup.flags.contains(StartupFlags::USEFILLATTRIBUTE) {
                if let Some(buffer) = session.active_buffer_mut() {
                    buffer.attr = startup.fill_attribute;
                }
            }
        }
        self.current = Some(id);
        self.events[event].signalled = true;
        self.new_process(false, None)
    }

    /// Peer reached through `--headless ... --server`
    fn spawn_headless_peer(&mut self, command_line: &str) -> ProcessInfo {
        let server = arg_value(command_line, "--server").and_then(parse_handle);
        let signal = arg_value(command_line, "--signal").and_then(parse_handle);
        let width = arg_value(command_line, "--width").and_then(|v| v.parse::<u16>().ok());
        let height = arg_value(command_line, "--height").and_then(|v| v.parse::<u16>().ok());

        let session = match server.map(|h| self.object(h)) {
            Some(Ok(Object::Server { session })) => session,
            _ => return self.new_process(true, None),
        };
        let pipe = match signal.map(|h| self.object(h)) {
            Some(Ok(Object::PipeServer { pipe })) => pipe,
            _ => return self.new_process(true, None),
        };
        if let (Some(w), Some(h)) = (width, height) {
            if let Some(buffer) = self.sessions.get_mut(&session).and_then(|s| s.active_buffer_mut()) {
                if w > 0 && h > 0 {
                    buffer.resize(w, h);
                }
            }
        }
        self.new_process(false, Some(pipe))
    }

    fn on_handle_closed(&mut self, object: Object) {
        match object {
            Object::PipeClient { pipe } => {
                let still_open = self
                    .handles
                    .values()
                    .any(|entry| entry.object == Object::PipeClient { pipe });
                if !still_open {
                    for process in self.processes.iter_mut().filter(|p| p.signal_pipe == Some(pipe)) {
                        process.exited = true;
                    }
                }
            }
            Object::PipeServer { pipe } => self.pipes[pipe].server_open = false,
            _ => {}
        }
    }
}

/// In-memory kernel-object service and hosting peer
#[derive(Default)]
pub struct LoopbackHost {
    state: Mutex<HostState>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process that owns an 80x25 console others may attach to
    pub fn add_console_process(&self, pid: u32) -> SessionId {
        let mut state = self.state.lock();
        let id = state.new_session(80, 25);
        state.console_pids.insert(pid, id);
        id
    }

    /// Create a session, bind the calling process to it and return
    /// `(reference, input, output)` handles
    pub fn create_client_session(&self, width: u16, height: u16) -> (Handle, Handle, Handle) {
        let mut state = self.state.lock();
        let session = state.new_session(width, height);
        state.current = Some(session);
        (
            state.insert(Object::Reference { session }, false),
            state.insert(Object::Input { session }, false),
            state.insert(Object::Output { session, buffer: 1 }, false),
        )
    }

    pub fn fail_open(&self, name: &str) {
        self.state.lock().failures.opens.insert(name.to_string());
    }

    pub fn fail_spawn(&self, fail: bool) {
        self.state.lock().failures.spawn = fail;
    }

    pub fn peer_exits_early(&self, exits: bool) {
        self.state.lock().failures.peer_exits_early = exits;
    }

    pub fn fail_free_console(&self, fail: bool) {
        self.state.lock().failures.free_console = fail;
    }

    pub fn open_handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.state.lock().handles.contains_key(&handle)
    }

    pub fn is_inheritable(&self, handle: Handle) -> bool {
        self.state
            .lock()
            .handles
            .get(&handle)
            .is_some_and(|entry| entry.inherit)
    }

    pub fn spawn_requests(&self) -> Vec<SpawnRequest> {
        self.state.lock().spawned.clone()
    }

    pub fn spawned_command_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .spawned
            .iter()
            .map(|r| r.command_line.clone())
            .collect()
    }

    /// Peers that have not exited yet
    pub fn live_peer_count(&self) -> usize {
        self.state.lock().processes.iter().filter(|p| !p.exited).count()
    }

    pub fn has_client_session(&self) -> bool {
        self.state.lock().current.is_some()
    }

    pub fn free_console_calls(&self) -> usize {
        self.state.lock().free_console_calls
    }

    /// Session a handle refers to
    pub fn session_of(&self, handle: Handle) -> Option<SessionId> {
        let state = self.state.lock();
        state.object(handle).ok().and_then(|o| state.session_of(o))
    }

    pub fn session_title(&self, session: SessionId) -> Option<String> {
        let state = self.state.lock();
        let title = &state.sessions.get(&session)?.title;
        Some(String::from_utf16_lossy(title))
    }

    pub fn ctrl_events(&self, session: SessionId) -> Vec<CtrlEventParams> {
        let state = self.state.lock();
        state
            .sessions
            .get(&session)
            .map(|s| s.ctrl_events.clone())
            .unwrap_or_default()
    }

    /// Copy of the screen buffer behind an output handle, or the session's
    /// active buffer for any other console handle
    pub fn screen(&self, handle: Handle) -> Option<ScreenBuffer> {
        let state = self.state.lock();
        match state.object(handle).ok()? {
            Object::Output { session, buffer } => state.sessions.get(&session)?.buffers.get(&buffer).cloned(),
            other => {
                let session = state.session_of(other)?;
                state.sessions.get(&session)?.active_buffer().cloned()
            }
        }
    }
}

impl Kernel for LoopbackHost {
    fn open(&self, request: &OpenRequest<'_>) -> KernelResult<Handle> {
        trace!("open {:?} root={:?}", request.name, request.root);
        let mut state = self.state.lock();
        if state.failures.opens.contains(request.name) {
            return Err(NtStatus::ACCESS_DENIED);
        }
        let root = match request.root {
            Some(handle) => Some(state.object(handle)?),
            None => None,
        };

        let object = match (request.name, root) {
            (r"\Device\ConDrv\Connection", None) => Object::Connection { session: None },
            ("Connection", Some(root)) => {
                let session = match root {
                    Object::Reference { session } | Object::Input { session } => session,
                    _ => return Err(NtStatus::INVALID_HANDLE),
                };
                state.current = Some(session);
                Object::Connection { session: Some(session) }
            }
            ("Reference", Some(root)) => match root {
                Object::Connection { session: Some(session) } | Object::Server { session } => {
                    Object::Reference { session }
                }
                _ => return Err(NtStatus::INVALID_HANDLE),
            },
            (r"\Device\ConDrv\Server", None) => Object::Server {
                session: state.new_session(80, 25),
            },
            (r"\Device\ConDrv\CurrentIn", None) | ("CONIN$", None) => Object::Input {
                session: state.current()?,
            },
            (r"\Device\ConDrv\CurrentOut", None) => {
                let session = state.current()?;
                let buffer = state.sessions.get(&session).map(|s| s.active).ok_or(NtStatus::INVALID_HANDLE)?;
                Object::Output { session, buffer }
            }
            (r"\Device\ConDrv\ScreenBuffer", None) => {
                let session = state.current()?;
                let buffer = state
                    .sessions
                    .get_mut(&session)
                    .map(|s| s.new_buffer())
                    .ok_or(NtStatus::INVALID_HANDLE)?;
                Object::Output { session, buffer }
            }
            (name, None) if name.starts_with(PIPE_PREFIX) => {
                if request.disposition == Disposition::Create {
                    return Err(NtStatus::INVALID_PARAMETER);
                }
                let pipe = state
                    .pipes
                    .iter()
                    .position(|p| p.server_open && p.name == name)
                    .ok_or(NtStatus::OBJECT_NAME_NOT_FOUND)?;
                Object::PipeClient { pipe }
            }
            _ => return Err(NtStatus::OBJECT_NAME_NOT_FOUND),
        };
        Ok(state.insert(object, request.inherit))
    }

    fn close(&self, handle: Handle) -> KernelResult<()> {
        let mut state = self.state.lock();
        let entry = state.handles.remove(&handle).ok_or(NtStatus::INVALID_HANDLE)?;
        state.on_handle_closed(entry.object);
        Ok(())
    }

    fn duplicate(&self, handle: Handle, inherit: bool) -> KernelResult<Handle> {
        let mut state = self.state.lock();
        let object = state.object(handle)?;
        Ok(state.insert(object, inherit))
    }

    fn control(&self, handle: Handle, code: u32, input: &[u8], output: &mut [u8]) -> KernelResult<usize> {
        let mut state = self.state.lock();
        match state.object(handle)? {
            Object::Connection { session } => {
                if code != IOCTL_CONDRV_BIND_PID {
                    return Err(NtStatus::NOT_SUPPORTED);
                }
                if session.is_some() {
                    return Err(NtStatus::ACCESS_DENIED);
                }
                let pid_bytes: [u8; 4] = input.try_into().map_err(|_| NtStatus::INVALID_PARAMETER)?;
                let pid = u32::from_le_bytes(pid_bytes);
                let target = *state.console_pids.get(&pid).ok_or(NtStatus::INVALID_HANDLE)?;
                if let Some(entry) = state.handles.get_mut(&handle) {
                    entry.object = Object::Connection { session: Some(target) };
                }
                state.current = Some(target);
                Ok(0)
            }
            Object::Reference { session } | Object::Input { session } => state
                .sessions
                .get_mut(&session)
                .ok_or(NtStatus::INVALID_HANDLE)?
                .control_input(code, input, output),
            Object::Output { session, buffer } => state
                .sessions
                .get_mut(&session)
                .ok_or(NtStatus::INVALID_HANDLE)?
                .control_output(buffer, code, input, output),
            _ => Err(NtStatus::INVALID_HANDLE),
        }
    }

    fn create_event(&self, manual_reset: bool, initial_state: bool, inherit: bool) -> KernelResult<Handle> {
        let mut state = self.state.lock();
        state.events.push(EventRecord {
            signalled: initial_state,
            manual_reset,
        });
        let event = state.events.len() - 1;
        Ok(state.insert(Object::Event { event }, inherit))
    }

    fn create_named_pipe(&self, name: &str, inherit: bool) -> KernelResult<Handle> {
        let mut state = self.state.lock();
        if state.pipes.iter().any(|p| p.server_open && p.name == name) {
            return Err(NtStatus::OBJECT_NAME_COLLISION);
        }
        state.pipes.push(PipeRecord {
            name: name.to_string(),
            server_open: true,
        });
        let pipe = state.pipes.len() - 1;
        Ok(state.insert(Object::PipeServer { pipe }, inherit))
    }

    fn spawn(&self, request: &SpawnRequest) -> KernelResult<ProcessInfo> {
        debug!("spawn {:?}", request.command_line);
        let mut state = self.state.lock();
        if state.failures.spawn {
            return Err(NtStatus::OBJECT_NAME_NOT_FOUND);
        }
        state.spawned.push(request.clone());

        let command_line = request.command_line.as_str();
        let info = if let Some(event) = arg_value(command_line, "--use-event") {
            let event = event.parse::<u64>().ok().map(Handle);
            state.spawn_console_peer(request, event)
        } else if command_line.split_whitespace().any(|arg| arg == "--headless") {
            state.spawn_headless_peer(command_line)
        } else {
            state.new_process(true, None)
        };
        Ok(info)
    }

    fn wait_any(&self, handles: &[Handle]) -> KernelResult<usize> {
        let mut state = self.state.lock();
        for (index, &handle) in handles.iter().enumerate() {
            match state.object(handle)? {
                Object::Event { event } => {
                    let record = &mut state.events[event];
                    if record.signalled {
                        if !record.manual_reset {
                            record.signalled = false;
                        }
                        return Ok(index);
                    }
                }
                Object::Process { process } => {
                    if state.processes[process].exited {
                        return Ok(index);
                    }
                }
                _ => return Err(NtStatus::INVALID_HANDLE),
            }
        }
        Err(NtStatus::POSSIBLE_DEADLOCK)
    }

    fn free_console(&self) -> KernelResult<()> {
        let mut state = self.state.lock();
        state.free_console_calls += 1;
        if state.failures.free_console {
            return Err(NtStatus::ACCESS_DENIED);
        }
        state.current = None;
        Ok(())
    }

    fn console_wait_event(&self, handle: Handle) -> KernelResult<Option<Handle>> {
        let mut state = self.state.lock();
        match state.object(handle)? {
            Object::Reference { .. } | Object::Input { .. } | Object::Output { .. } => {
                state.events.push(EventRecord {
                    signalled: false,
                    manual_reset: true,
                });
                let event = state.events.len() - 1;
                Ok(Some(state.insert(Object::Event { event }, false)))
            }
            _ => Ok(None),
        }
    }
}

/// Value of `--flag value` or `--flag=value`
fn arg_value<'a>(command_line: &'a str, flag: &str) -> Option<&'a str> {
    let mut args = command_line.split_whitespace();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
        if let Some(value) = arg.strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(value);
        }
    }
    None
}

fn parse_handle(value: &str) -> Option<Handle> {
    let raw = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => value.parse().ok()?,
    };
    Some(Handle(raw))
}
