//! Control-event dispatch
//!
//! Handlers are kept in registration order and walked most-recent-first.
//! The default handler is a sentinel that always sits conceptually at the
//! tail: reaching it, or running out of handlers, terminates the process
//! through the console's exit hook.
//!
//! Dispatch holds the process-wide guard while it walks a snapshot of the
//! chain, but never a `RefCell` borrow, so a handler may register or remove
//! handlers. Such changes take effect from the next dispatch.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, trace, warn};

use crate::core::ioctl::ioctl_in;
use crate::core::protocol::{CtrlEventParams, IOCTL_CONDRV_CTRL_EVENT};
use crate::core::session::Console;
use crate::core::types::CtrlEvent;
use crate::error::{ConsoleError, Result};

/// Control handler; returns `true` when it handled the event
pub type CtrlHandler = Arc<dyn Fn(CtrlEvent) -> bool + Send + Sync>;

/// Process termination, called with the exit status
pub type ExitHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Attached-debugger stand-in; returns `true` when it swallowed a Ctrl-C
pub type DebuggerHook = Arc<dyn Fn(CtrlEvent) -> bool + Send + Sync>;

/// Outcome of intercepting an interrupt signal
#[derive(Debug)]
pub enum Interception {
    /// No console: the interrupt is not ours to handle
    NotAttached,
    /// Ctrl handling is switched off for this process
    Ignored,
    /// Handlers run on this thread
    Dispatched(JoinHandle<bool>),
}

impl Console {
    /// Identity of the permanent default handler
    pub fn default_ctrl_handler(&self) -> CtrlHandler {
        Arc::clone(&self.default_handler)
    }

    /// Register or remove a handler.
    ///
    /// With no handler, `add == false` switches ctrl handling off for this
    /// process and `add == true` switches it back on; the chain is untouched.
    /// Adding the default handler changes nothing. Removing a handler that is
    /// not registered fails with [`ConsoleError::InvalidParameter`], and so
    /// does removing the default.
    pub fn set_ctrl_handler(&self, handler: Option<&CtrlHandler>, add: bool) -> Result<()> {
        trace!("set_ctrl_handler({}, {})", handler.is_some(), add);
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        match handler {
            None => {
                state.ignore_ctrl = !add;
                Ok(())
            }
            // The default handler already terminates the chain
            Some(handler) if add && Arc::ptr_eq(handler, &self.default_handler) => Ok(()),
            Some(handler) if add => {
                state.handlers.push(Arc::clone(handler));
                Ok(())
            }
            Some(handler) => match state.handlers.iter().rposition(|h| Arc::ptr_eq(h, handler)) {
                Some(index) => {
                    state.handlers.remove(index);
                    Ok(())
                }
                None => Err(ConsoleError::InvalidParameter),
            },
        }
    }

    /// Number of registered handlers, not counting the default
    pub fn ctrl_handler_count(&self) -> usize {
        self.state.lock().borrow().handlers.len()
    }

    pub fn ctrl_handling_enabled(&self) -> bool {
        !self.state.lock().borrow().ignore_ctrl
    }

    /// Deliver `event` synchronously; returns `false` when it was swallowed
    /// by the debugger or ctrl handling is off
    pub fn ctrl_routine(&self, event: CtrlEvent) -> bool {
        if event == CtrlEvent::CtrlC {
            if let Some(debugger) = &self.debugger {
                if debugger(event) {
                    return false;
                }
            }
        }

        let guard = self.state.lock();
        let handlers: Vec<CtrlHandler> = {
            let state = guard.borrow();
            if state.ignore_ctrl {
                return false;
            }
            state.handlers.iter().rev().cloned().collect()
        };

        for handler in handlers {
            if Arc::ptr_eq(&handler, &self.default_handler) {
                break;
            }
            if handler(event) {
                return true;
            }
        }
        self.terminate(event);
        true
    }

    fn terminate(&self, event: CtrlEvent) {
        warn!("terminating process on {:?}", event);
        (self.exit_hook)(0);
    }

    /// Turn a synchronous interrupt into an asynchronous Ctrl-C dispatch.
    ///
    /// Handlers never run on the calling thread.
    pub fn handle_interrupt(self: &Arc<Self>) -> Interception {
        {
            let guard = self.state.lock();
            let state = guard.borrow();
            if state.console.is_none() {
                return Interception::NotAttached;
            }
            if state.ignore_ctrl {
                return Interception::Ignored;
            }
        }

        let console = Arc::clone(self);
        match thread::Builder::new()
            .name("ctrl-dispatch".into())
            .spawn(move || console.ctrl_routine(CtrlEvent::CtrlC))
        {
            Ok(thread) => Interception::Dispatched(thread),
            Err(e) => {
                error!("can't start ctrl dispatch thread: {}", e);
                Interception::Ignored
            }
        }
    }

    /// Ask the session to deliver Ctrl-C or Ctrl-Break to a process group
    pub fn generate_ctrl_event(&self, event: CtrlEvent, group: u32) -> Result<()> {
        trace!("generate_ctrl_event({:?}, {:#x})", event, group);
        if !matches!(event, CtrlEvent::CtrlC | CtrlEvent::CtrlBreak) {
            error!("invalid event {:?} for group {:#x}", event, group);
            return Err(ConsoleError::InvalidParameter);
        }
        let params = CtrlEventParams {
            event: event.code() as i32,
            group_id: group,
        };
        ioctl_in(&*self.kernel, self.console_handle_or_null(), IOCTL_CONDRV_CTRL_EVENT, &params)
    }

    /// Route an unhandled interrupt to process exit
    pub(crate) fn exit_on_interrupt(&self) {
        (self.exit_hook)(crate::core::kernel::NtStatus::CONTROL_C_EXIT.0);
    }
}

/// SIGINT forwarder; unregisters and joins its thread on drop
#[cfg(unix)]
pub struct InterruptGuard {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Route SIGINT into [`Console::handle_interrupt`]. An interrupt arriving
/// while no console is attached ends the process with `STATUS_CONTROL_C_EXIT`.
#[cfg(unix)]
pub fn install_interrupt_handler(console: Arc<Console>) -> std::io::Result<InterruptGuard> {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT])?;
    let handle = signals.handle();

    let thread = thread::Builder::new().name("sigint".into()).spawn(move || {
        for _ in signals.forever() {
            match console.handle_interrupt() {
                Interception::NotAttached => console.exit_on_interrupt(),
                Interception::Ignored => {}
                Interception::Dispatched(_) => {}
            }
        }
    })?;

    Ok(InterruptGuard {
        handle,
        thread: Some(thread),
    })
}
