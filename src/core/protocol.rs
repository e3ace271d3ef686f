//! Console control protocol
//!
//! Opcodes and fixed-layout request/response structs exchanged with the
//! hosting peer. Write-class requests carry their variable-length payload
//! immediately after the fixed header; read-class responses lead with a
//! rectangle or count and trail the payload.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::core::types::{CharInfo, Coord, SmallRect};
use crate::error::{ConsoleError, Result};

const FILE_DEVICE_CONSOLE: u32 = 0x0050;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;
const FILE_READ_ACCESS: u32 = 1;
const FILE_WRITE_ACCESS: u32 = 2;

const fn ctl_code(function: u32, access: u32) -> u32 {
    (FILE_DEVICE_CONSOLE << 16) | (access << 14) | (function << 2) | METHOD_BUFFERED
}

pub const IOCTL_CONDRV_GET_MODE: u32 = ctl_code(0, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_SET_MODE: u32 = ctl_code(1, FILE_ANY_ACCESS);

pub const IOCTL_CONDRV_READ_INPUT: u32 = ctl_code(10, FILE_READ_ACCESS);
pub const IOCTL_CONDRV_WRITE_INPUT: u32 = ctl_code(11, FILE_WRITE_ACCESS);
pub const IOCTL_CONDRV_PEEK: u32 = ctl_code(12, FILE_READ_ACCESS);
pub const IOCTL_CONDRV_GET_INPUT_INFO: u32 = ctl_code(13, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_SET_INPUT_INFO: u32 = ctl_code(14, FILE_WRITE_ACCESS);
pub const IOCTL_CONDRV_GET_TITLE: u32 = ctl_code(15, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_SET_TITLE: u32 = ctl_code(16, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_CTRL_EVENT: u32 = ctl_code(17, FILE_ANY_ACCESS);

pub const IOCTL_CONDRV_READ_OUTPUT: u32 = ctl_code(30, FILE_READ_ACCESS);
pub const IOCTL_CONDRV_WRITE_OUTPUT: u32 = ctl_code(31, FILE_WRITE_ACCESS);
pub const IOCTL_CONDRV_GET_OUTPUT_INFO: u32 = ctl_code(32, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_SET_OUTPUT_INFO: u32 = ctl_code(33, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_ACTIVATE: u32 = ctl_code(34, FILE_ANY_ACCESS);
pub const IOCTL_CONDRV_FILL_OUTPUT: u32 = ctl_code(35, FILE_WRITE_ACCESS);
pub const IOCTL_CONDRV_SCROLL: u32 = ctl_code(36, FILE_WRITE_ACCESS);

pub const IOCTL_CONDRV_BIND_PID: u32 = ctl_code(51, FILE_ANY_ACCESS);

/// Which cell field a read/write/fill addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CharInfoMode {
    /// Characters only
    Text = 0,
    /// Attributes only
    Attr = 1,
    /// Full `CharInfo` cells over a rectangle
    TextAttr = 2,
    /// Characters written with the buffer's current attribute
    TextStdAttr = 3,
}

impl CharInfoMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CharInfoMode::Text),
            1 => Some(CharInfoMode::Attr),
            2 => Some(CharInfoMode::TextAttr),
            3 => Some(CharInfoMode::TextStdAttr),
            _ => None,
        }
    }
}

/// Read/write output request header
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OutputParams {
    pub mode: u32,
    pub x: u32,
    pub y: u32,
    /// Rectangle width for `TextAttr`, 0 for linear access
    pub width: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FillOutputParams {
    pub mode: u32,
    pub x: i32,
    pub y: i32,
    pub count: u32,
    pub wrap: i32,
    pub ch: u16,
    pub attr: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ScrollParams {
    pub scroll: SmallRect,
    pub origin: Coord,
    pub clip: SmallRect,
    pub fill: CharInfo,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CtrlEventParams {
    pub event: i32,
    pub group_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InputInfo {
    pub input_cp: u32,
    pub output_cp: u32,
    pub input_count: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InputInfoMask: u32 {
        const INPUT_CODEPAGE  = 0x08;
        const OUTPUT_CODEPAGE = 0x10;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InputInfoParams {
    pub mask: u32,
    pub info: InputInfo,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OutputInfo {
    pub cursor_size: i16,
    pub cursor_visible: i16,
    pub cursor_x: i16,
    pub cursor_y: i16,
    pub width: i16,
    pub height: i16,
    pub attr: i16,
    pub popup_attr: i16,
    pub win_left: i16,
    pub win_top: i16,
    pub win_right: i16,
    pub win_bottom: i16,
    pub max_width: i16,
    pub max_height: i16,
    pub font_width: i16,
    pub font_height: i16,
    pub color_map: [u32; 16],
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct OutputInfoMask: u32 {
        const CURSOR_GEOM    = 0x0001;
        const CURSOR_POS     = 0x0002;
        const SIZE           = 0x0004;
        const ATTR           = 0x0008;
        const DISPLAY_WINDOW = 0x0010;
        const MAX_SIZE       = 0x0020;
        const POPUP_ATTR     = 0x0040;
        const FONT           = 0x0080;
        const COLORTABLE     = 0x0100;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OutputInfoParams {
    pub mask: u32,
    pub info: OutputInfo,
}

impl OutputInfoParams {
    pub fn new(mask: OutputInfoMask) -> Self {
        Self {
            mask: mask.bits(),
            info: OutputInfo::default(),
        }
    }
}

/// Allocate a zeroed staging buffer, reporting exhaustion instead of aborting
pub fn staging_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| ConsoleError::NotEnoughMemory)?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Fixed header followed by a payload slice
pub fn encode_with_payload<H: Pod, P: Pod>(header: &H, payload: &[P]) -> Result<Vec<u8>> {
    let head = bytemuck::bytes_of(header);
    let body: &[u8] = bytemuck::cast_slice(payload);
    let mut buffer = staging_buffer(head.len() + body.len())?;
    buffer[..head.len()].copy_from_slice(head);
    buffer[head.len()..].copy_from_slice(body);
    Ok(buffer)
}

/// Split a message into its fixed header and trailing bytes
pub fn decode_header<H: Pod>(bytes: &[u8]) -> Option<(H, &[u8])> {
    let size = std::mem::size_of::<H>();
    if bytes.len() < size {
        return None;
    }
    Some((bytemuck::pod_read_unaligned(&bytes[..size]), &bytes[size..]))
}

/// Decode a packed array of `T`, ignoring a trailing partial element
pub fn decode_slice<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Copy `items` into `out` as raw bytes; returns the byte count written
pub fn encode_into<T: Pod>(items: &[T], out: &mut [u8]) -> usize {
    let bytes: &[u8] = bytemuck::cast_slice(items);
    let len = bytes.len().min(out.len());
    out[..len].copy_from_slice(&bytes[..len]);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layouts() {
        assert_eq!(std::mem::size_of::<OutputParams>(), 16);
        assert_eq!(std::mem::size_of::<FillOutputParams>(), 24);
        assert_eq!(std::mem::size_of::<ScrollParams>(), 24);
        assert_eq!(std::mem::size_of::<CtrlEventParams>(), 8);
        assert_eq!(std::mem::size_of::<InputInfo>(), 12);
        assert_eq!(std::mem::size_of::<InputInfoParams>(), 16);
        assert_eq!(std::mem::size_of::<OutputInfo>(), 96);
        assert_eq!(std::mem::size_of::<OutputInfoParams>(), 100);
    }

    #[test]
    fn test_opcodes_are_distinct() {
        let codes = [
            IOCTL_CONDRV_GET_MODE,
            IOCTL_CONDRV_SET_MODE,
            IOCTL_CONDRV_READ_INPUT,
            IOCTL_CONDRV_WRITE_INPUT,
            IOCTL_CONDRV_PEEK,
            IOCTL_CONDRV_GET_INPUT_INFO,
            IOCTL_CONDRV_SET_INPUT_INFO,
            IOCTL_CONDRV_GET_TITLE,
            IOCTL_CONDRV_SET_TITLE,
            IOCTL_CONDRV_CTRL_EVENT,
            IOCTL_CONDRV_READ_OUTPUT,
            IOCTL_CONDRV_WRITE_OUTPUT,
            IOCTL_CONDRV_GET_OUTPUT_INFO,
            IOCTL_CONDRV_SET_OUTPUT_INFO,
            IOCTL_CONDRV_ACTIVATE,
            IOCTL_CONDRV_FILL_OUTPUT,
            IOCTL_CONDRV_SCROLL,
            IOCTL_CONDRV_BIND_PID,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert_eq!(IOCTL_CONDRV_READ_OUTPUT >> 16, FILE_DEVICE_CONSOLE);
    }

    #[test]
    fn test_header_payload_layout() {
        let header = OutputParams {
            mode: CharInfoMode::Text as u32,
            x: 2,
            y: 3,
            width: 0,
        };
        let bytes = encode_with_payload(&header, &[0x41u16, 0x42]).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[16..], &[0x41, 0, 0x42, 0]);

        let (decoded, rest) = decode_header::<OutputParams>(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decode_slice::<u16>(rest), vec![0x41, 0x42]);
    }

    #[test]
    fn test_short_header_rejected() {
        assert!(decode_header::<FillOutputParams>(&[0u8; 8]).is_none());
    }
}
