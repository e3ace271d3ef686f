//! Shared console data model
//!
//! Everything here that crosses the control channel is `#[repr(C)]` and
//! `Pod`, so it can be copied into and out of staging buffers verbatim.

use std::fmt;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Opaque reference to a kernel object (session, channel, event, process...)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Cell coordinate or size
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Inclusive rectangle
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct SmallRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl SmallRect {
    pub const fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self { left, top, right, bottom }
    }

    /// Left > right or top > bottom
    pub fn is_inverted(&self) -> bool {
        self.left > self.right || self.top > self.bottom
    }

    /// Zero-area results are reported as right < left / bottom < top
    pub fn is_empty(&self) -> bool {
        self.is_inverted()
    }

    pub fn width(&self) -> i32 {
        self.right as i32 - self.left as i32 + 1
    }

    pub fn height(&self) -> i32 {
        self.bottom as i32 - self.top as i32 + 1
    }

    /// Mark the rectangle as empty, anchored at its current origin
    pub fn set_empty(&mut self) {
        self.right = self.left.wrapping_sub(1);
        self.bottom = self.top.wrapping_sub(1);
    }
}

/// One screen-buffer cell: UTF-16 unit (or narrow byte) plus attribute
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct CharInfo {
    pub ch: u16,
    pub attr: u16,
}

impl CharInfo {
    pub const fn new(ch: u16, attr: u16) -> Self {
        Self { ch, attr }
    }
}

impl Default for CharInfo {
    fn default() -> Self {
        Self {
            ch: b' ' as u16,
            attr: FOREGROUND_WHITE,
        }
    }
}

pub const FOREGROUND_BLUE: u16 = 0x0001;
pub const FOREGROUND_GREEN: u16 = 0x0002;
pub const FOREGROUND_RED: u16 = 0x0004;
pub const FOREGROUND_INTENSITY: u16 = 0x0008;
pub const BACKGROUND_BLUE: u16 = 0x0010;
pub const BACKGROUND_GREEN: u16 = 0x0020;
pub const BACKGROUND_RED: u16 = 0x0040;
pub const BACKGROUND_INTENSITY: u16 = 0x0080;
pub const FOREGROUND_WHITE: u16 = FOREGROUND_RED | FOREGROUND_GREEN | FOREGROUND_BLUE;

pub const KEY_EVENT: u16 = 0x0001;
pub const MOUSE_EVENT: u16 = 0x0002;
pub const WINDOW_BUFFER_SIZE_EVENT: u16 = 0x0004;
pub const MENU_EVENT: u16 = 0x0008;
pub const FOCUS_EVENT: u16 = 0x0010;

/// Key-press payload of an input record
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KeyEventRecord {
    pub key_down: i32,
    pub repeat_count: u16,
    pub virtual_key_code: u16,
    pub virtual_scan_code: u16,
    /// UTF-16 unit, or a narrow byte in the low half for narrow records
    pub uchar: u16,
    pub control_key_state: u32,
}

/// Offset of `KeyEventRecord::uchar` inside the event payload
const KEY_CHAR_OFFSET: usize = 10;

/// Console input record; only key events are interpreted, the rest are
/// carried as an opaque 16-byte payload
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InputRecord {
    pub event_type: u16,
    reserved: u16,
    payload: [u8; 16],
}

impl InputRecord {
    pub fn key(event: KeyEventRecord) -> Self {
        let mut payload = [0u8; 16];
        payload.copy_from_slice(bytemuck::bytes_of(&event));
        Self {
            event_type: KEY_EVENT,
            reserved: 0,
            payload,
        }
    }

    pub fn raw(event_type: u16, payload: [u8; 16]) -> Self {
        Self {
            event_type,
            reserved: 0,
            payload,
        }
    }

    pub fn is_key_event(&self) -> bool {
        self.event_type == KEY_EVENT
    }

    pub fn key_event(&self) -> Option<KeyEventRecord> {
        self.is_key_event()
            .then(|| bytemuck::pod_read_unaligned(&self.payload))
    }

    pub fn payload(&self) -> &[u8; 16] {
        &self.payload
    }

    /// Character field of a key event
    pub fn key_char(&self) -> Option<u16> {
        self.is_key_event().then(|| {
            u16::from_le_bytes([self.payload[KEY_CHAR_OFFSET], self.payload[KEY_CHAR_OFFSET + 1]])
        })
    }

    /// Rewrite only the character field; no-op for non-key events
    pub fn set_key_char(&mut self, ch: u16) {
        if self.is_key_event() {
            self.payload[KEY_CHAR_OFFSET..KEY_CHAR_OFFSET + 2].copy_from_slice(&ch.to_le_bytes());
        }
    }
}

/// Cursor geometry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorInfo {
    /// Percentage of the cell filled (1..=100)
    pub size: u32,
    pub visible: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenBufferInfo {
    pub size: Coord,
    pub cursor_position: Coord,
    pub attributes: u16,
    pub window: SmallRect,
    pub maximum_window_size: Coord,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenBufferInfoEx {
    pub size: Coord,
    pub cursor_position: Coord,
    pub attributes: u16,
    pub window: SmallRect,
    pub maximum_window_size: Coord,
    pub popup_attributes: u16,
    pub fullscreen_supported: bool,
    pub color_table: [u32; 16],
}

/// Interrupt-style notification delivered to control handlers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CtrlEvent {
    CtrlC,
    CtrlBreak,
    Close,
    Logoff,
    Shutdown,
}

impl CtrlEvent {
    pub fn code(self) -> u32 {
        match self {
            CtrlEvent::CtrlC => 0,
            CtrlEvent::CtrlBreak => 1,
            CtrlEvent::Close => 2,
            CtrlEvent::Logoff => 5,
            CtrlEvent::Shutdown => 6,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(CtrlEvent::CtrlC),
            1 => Some(CtrlEvent::CtrlBreak),
            2 => Some(CtrlEvent::Close),
            5 => Some(CtrlEvent::Logoff),
            6 => Some(CtrlEvent::Shutdown),
            _ => None,
        }
    }
}

/// One of the three conventional I/O channels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StdChannel {
    Input,
    Output,
    Error,
}

bitflags! {
    /// Standard channels this subsystem created and must close on detach
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ChannelFlags: u32 {
        const INPUT  = 0x01;
        const OUTPUT = 0x02;
        const ERROR  = 0x04;
    }
}

impl From<StdChannel> for ChannelFlags {
    fn from(channel: StdChannel) -> Self {
        match channel {
            StdChannel::Input => ChannelFlags::INPUT,
            StdChannel::Output => ChannelFlags::OUTPUT,
            StdChannel::Error => ChannelFlags::ERROR,
        }
    }
}

bitflags! {
    /// Which startup fields are meaningful
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct StartupFlags: u32 {
        const USESHOWWINDOW    = 0x0001;
        const USECOUNTCHARS    = 0x0008;
        const USEFILLATTRIBUTE = 0x0010;
        const USESTDHANDLES    = 0x0100;
    }
}

/// Startup configuration of a process image
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartupInfo {
    pub flags: StartupFlags,
    pub count_chars: Coord,
    pub fill_attribute: u16,
    pub show_window: u16,
    pub title: Option<String>,
    pub std_input: Option<Handle>,
    pub std_output: Option<Handle>,
    pub std_error: Option<Handle>,
}

/// Subsystem classification of the running image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Subsystem {
    /// Character-mode image; wants an interactive console
    #[default]
    Console,
    /// GUI image
    Windows,
}

/// Console reference handed down by the process that created us
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InheritedConsole {
    #[default]
    None,
    /// Allocate a fresh console if the subsystem asks for one
    AutoAlloc,
    /// Re-bind to an existing session reference
    Inherited(Handle),
}

/// Current standard handles of the process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StdHandles {
    pub input: Option<Handle>,
    pub output: Option<Handle>,
    pub error: Option<Handle>,
}

impl StdHandles {
    pub fn get(&self, channel: StdChannel) -> Option<Handle> {
        match channel {
            StdChannel::Input => self.input,
            StdChannel::Output => self.output,
            StdChannel::Error => self.error,
        }
    }

    pub fn set(&mut self, channel: StdChannel, handle: Option<Handle>) {
        match channel {
            StdChannel::Input => self.input = handle,
            StdChannel::Output => self.output = handle,
            StdChannel::Error => self.error = handle,
        }
    }
}

/// Per-process parameters the console subsystem reads at startup
#[derive(Clone, Debug, Default)]
pub struct ProcessParams {
    pub pid: u32,
    pub tid: u32,
    pub image_path: String,
    pub subsystem: Subsystem,
    pub console: InheritedConsole,
    pub startup: StartupInfo,
    pub std_handles: StdHandles,
}
