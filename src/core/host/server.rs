//! Peer side of the control protocol
//!
//! One [`HostSession`] per console: its screen buffers, input queue, title,
//! modes and codepages. Requests arrive already routed by handle kind.

use std::collections::{BTreeMap, VecDeque};

use bytemuck::Pod;

use crate::core::host::screen::ScreenBuffer;
use crate::core::kernel::{KernelResult, NtStatus};
use crate::core::protocol::*;
use crate::core::types::{CharInfo, InputRecord, SmallRect};

pub type BufferId = u32;

/// Console mode of a fresh input channel: processed, line and echo input
const DEFAULT_INPUT_MODE: u32 = 0x7;

#[derive(Clone, Debug)]
pub struct HostSession {
    pub buffers: BTreeMap<BufferId, ScreenBuffer>,
    pub active: BufferId,
    next_buffer: BufferId,
    pub input: VecDeque<InputRecord>,
    pub title: Vec<u16>,
    pub input_mode: u32,
    pub input_cp: u32,
    pub output_cp: u32,
    pub ctrl_events: Vec<CtrlEventParams>,
}

impl HostSession {
    pub fn new(width: u16, height: u16) -> Self {
        let mut buffers = BTreeMap::new();
        buffers.insert(1, ScreenBuffer::new(width, height));
        Self {
            buffers,
            active: 1,
            next_buffer: 2,
            input: VecDeque::new(),
            title: Vec::new(),
            input_mode: DEFAULT_INPUT_MODE,
            input_cp: 0,
            output_cp: 0,
            ctrl_events: Vec::new(),
        }
    }

    /// New screen buffer sized like the active one
    pub fn new_buffer(&mut self) -> BufferId {
        let (width, height) = self
            .buffers
            .get(&self.active)
            .map(|b| (b.width, b.height))
            .unwrap_or((80, 25));
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(id, ScreenBuffer::new(width, height));
        id
    }

    pub fn active_buffer(&self) -> Option<&ScreenBuffer> {
        self.buffers.get(&self.active)
    }

    pub fn active_buffer_mut(&mut self) -> Option<&mut ScreenBuffer> {
        self.buffers.get_mut(&self.active)
    }

    /// Requests on the console reference or an input channel
    pub fn control_input(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> KernelResult<usize> {
        match code {
            IOCTL_CONDRV_GET_MODE => reply(&self.input_mode, output),
            IOCTL_CONDRV_SET_MODE => {
                self.input_mode = request::<u32>(input)?;
                Ok(0)
            }
            IOCTL_CONDRV_READ_INPUT | IOCTL_CONDRV_PEEK => {
                let count = (output.len() / std::mem::size_of::<InputRecord>()).min(self.input.len());
                let records: Vec<InputRecord> = if code == IOCTL_CONDRV_READ_INPUT {
                    self.input.drain(..count).collect()
                } else {
                    self.input.iter().take(count).copied().collect()
                };
                Ok(encode_into(&records, output))
            }
            IOCTL_CONDRV_WRITE_INPUT => {
                if input.len() % std::mem::size_of::<InputRecord>() != 0 {
                    return Err(NtStatus::INVALID_PARAMETER);
                }
                self.input.extend(decode_slice::<InputRecord>(input));
                Ok(0)
            }
            IOCTL_CONDRV_GET_INPUT_INFO => {
                let info = InputInfo {
                    input_cp: self.input_cp,
                    output_cp: self.output_cp,
                    input_count: self.input.len() as u32,
                };
                reply(&info, output)
            }
            IOCTL_CONDRV_SET_INPUT_INFO => {
                let params = request::<InputInfoParams>(input)?;
                let mask = InputInfoMask::from_bits_truncate(params.mask);
                if mask.contains(InputInfoMask::INPUT_CODEPAGE) {
                    self.input_cp = params.info.input_cp;
                }
                if mask.contains(InputInfoMask::OUTPUT_CODEPAGE) {
                    self.output_cp = params.info.output_cp;
                }
                Ok(0)
            }
            IOCTL_CONDRV_GET_TITLE => {
                let units = (output.len() / 2).min(self.title.len());
                Ok(encode_into(&self.title[..units], output))
            }
            IOCTL_CONDRV_SET_TITLE => {
                if input.len() % 2 != 0 {
                    return Err(NtStatus::INVALID_PARAMETER);
                }
                self.title = decode_slice::<u16>(input);
                Ok(0)
            }
            IOCTL_CONDRV_CTRL_EVENT => {
                let params = request::<CtrlEventParams>(input)?;
                self.ctrl_events.push(params);
                Ok(0)
            }
            _ => Err(NtStatus::NOT_SUPPORTED),
        }
    }

    /// Requests on a screen-buffer channel
    pub fn control_output(
        &mut self,
        id: BufferId,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> KernelResult<usize> {
        if code == IOCTL_CONDRV_ACTIVATE {
            if !self.buffers.contains_key(&id) {
                return Err(NtStatus::INVALID_HANDLE);
            }
            self.active = id;
            return Ok(0);
        }

        let buffer = self.buffers.get_mut(&id).ok_or(NtStatus::INVALID_HANDLE)?;
        match code {
            IOCTL_CONDRV_GET_MODE => reply(&buffer.mode, output),
            IOCTL_CONDRV_SET_MODE => {
                buffer.mode = request::<u32>(input)?;
                Ok(0)
            }
            IOCTL_CONDRV_READ_OUTPUT => read_output(buffer, input, output),
            IOCTL_CONDRV_WRITE_OUTPUT => write_output(buffer, input, output),
            IOCTL_CONDRV_GET_OUTPUT_INFO => reply(&buffer.info(), output),
            IOCTL_CONDRV_SET_OUTPUT_INFO => {
                let params = request::<OutputInfoParams>(input)?;
                buffer.set_info(OutputInfoMask::from_bits_truncate(params.mask), &params.info)?;
                Ok(0)
            }
            IOCTL_CONDRV_FILL_OUTPUT => {
                let params = request::<FillOutputParams>(input)?;
                let mode = CharInfoMode::from_raw(params.mode).ok_or(NtStatus::INVALID_PARAMETER)?;
                let written = buffer.fill(
                    mode,
                    params.x,
                    params.y,
                    params.count,
                    params.wrap != 0,
                    CharInfo::new(params.ch, params.attr),
                );
                reply(&written, output)
            }
            IOCTL_CONDRV_SCROLL => {
                let params = request::<ScrollParams>(input)?;
                buffer.scroll(&params)?;
                Ok(0)
            }
            _ => Err(NtStatus::NOT_SUPPORTED),
        }
    }
}

fn read_output(buffer: &ScreenBuffer, input: &[u8], output: &mut [u8]) -> KernelResult<usize> {
    let params = request::<OutputParams>(input)?;
    match CharInfoMode::from_raw(params.mode) {
        Some(CharInfoMode::TextAttr) => {
            let header = std::mem::size_of::<SmallRect>();
            let row_bytes = params.width as usize * std::mem::size_of::<CharInfo>();
            if params.width == 0 || output.len() < header {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            let height = ((output.len() - header) / row_bytes) as u32;
            let (rect, cells) = buffer.read_rect(params.x as i32, params.y as i32, params.width, height);
            let (head, body) = output.split_at_mut(header);
            head.copy_from_slice(bytemuck::bytes_of(&rect));
            Ok(header + encode_into(&cells, body))
        }
        Some(mode @ (CharInfoMode::Text | CharInfoMode::Attr)) => {
            let values = buffer.read_linear(mode, params.x, params.y, output.len() / 2);
            Ok(encode_into(&values, output))
        }
        _ => Err(NtStatus::INVALID_PARAMETER),
    }
}

fn write_output(buffer: &mut ScreenBuffer, input: &[u8], output: &mut [u8]) -> KernelResult<usize> {
    let (params, payload) = decode_header::<OutputParams>(input).ok_or(NtStatus::INVALID_PARAMETER)?;
    match CharInfoMode::from_raw(params.mode) {
        Some(CharInfoMode::TextAttr) => {
            if params.width == 0 {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            let cells = decode_slice::<CharInfo>(payload);
            let rect = buffer.write_rect(params.x as i32, params.y as i32, params.width, &cells);
            reply(&rect, output)
        }
        Some(mode) => {
            let values = decode_slice::<u16>(payload);
            let written = buffer.write_linear(mode, params.x, params.y, &values);
            reply(&written, output)
        }
        None => Err(NtStatus::INVALID_PARAMETER),
    }
}

/// Fixed-size request body; any other length is malformed
fn request<T: Pod>(input: &[u8]) -> KernelResult<T> {
    if input.len() != std::mem::size_of::<T>() {
        return Err(NtStatus::INVALID_PARAMETER);
    }
    Ok(bytemuck::pod_read_unaligned(input))
}

/// Copy a fixed-size reply if the caller asked for one
fn reply<T: Pod>(value: &T, output: &mut [u8]) -> KernelResult<usize> {
    if output.is_empty() {
        return Ok(0);
    }
    let bytes = bytemuck::bytes_of(value);
    if output.len() < bytes.len() {
        return Err(NtStatus::BUFFER_TOO_SMALL);
    }
    output[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::KeyEventRecord;

    #[test]
    fn test_peek_does_not_consume() {
        let mut session = HostSession::new(80, 25);
        let record = InputRecord::key(KeyEventRecord {
            key_down: 1,
            uchar: b'q' as u16,
            ..Default::default()
        });
        let bytes = bytemuck::bytes_of(&record).to_vec();
        session.control_input(IOCTL_CONDRV_WRITE_INPUT, &bytes, &mut []).unwrap();

        let mut out = [0u8; 40];
        assert_eq!(session.control_input(IOCTL_CONDRV_PEEK, &[], &mut out).unwrap(), 20);
        assert_eq!(session.input.len(), 1);
        assert_eq!(session.control_input(IOCTL_CONDRV_READ_INPUT, &[], &mut out).unwrap(), 20);
        assert!(session.input.is_empty());
    }

    #[test]
    fn test_read_output_reports_clipped_rect() {
        let mut session = HostSession::new(10, 4);
        let params = OutputParams {
            mode: CharInfoMode::TextAttr as u32,
            x: 8,
            y: 0,
            width: 4,
        };
        let mut out = vec![0u8; 8 + 4 * 4 * 2];
        let len = session
            .control_output(1, IOCTL_CONDRV_READ_OUTPUT, bytemuck::bytes_of(&params), &mut out)
            .unwrap();
        let (rect, _) = decode_header::<SmallRect>(&out[..len]).unwrap();
        assert_eq!(rect, SmallRect::new(8, 0, 9, 1));
        assert_eq!(len, 8 + 4 * 4);
    }

    #[test]
    fn test_activate_switches_buffer() {
        let mut session = HostSession::new(80, 25);
        let id = session.new_buffer();
        session.control_output(id, IOCTL_CONDRV_ACTIVATE, &[], &mut []).unwrap();
        assert_eq!(session.active, id);
        assert_eq!(
            session.control_output(99, IOCTL_CONDRV_ACTIVATE, &[], &mut []),
            Err(NtStatus::INVALID_HANDLE)
        );
    }

    #[test]
    fn test_unknown_request_not_supported() {
        let mut session = HostSession::new(80, 25);
        assert_eq!(
            session.control_input(IOCTL_CONDRV_SCROLL, &[], &mut []),
            Err(NtStatus::NOT_SUPPORTED)
        );
    }
}
