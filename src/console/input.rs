//! Input queue

use tracing::trace;

use crate::core::codepage::{input_records_to_narrow, input_records_to_wide, Codepage};
use crate::core::ioctl::{console_ioctl, ioctl_out};
use crate::core::protocol::{InputInfo, IOCTL_CONDRV_GET_INPUT_INFO, IOCTL_CONDRV_PEEK, IOCTL_CONDRV_WRITE_INPUT};
use crate::core::session::Console;
use crate::core::types::{Handle, InputRecord};
use crate::error::{ConsoleError, Result};

impl Console {
    /// Records waiting in the input queue
    pub fn number_of_input_events(&self, handle: Handle) -> Result<u32> {
        trace!("number_of_input_events({})", handle);
        let info: InputInfo = ioctl_out(&*self.kernel, handle, IOCTL_CONDRV_GET_INPUT_INFO)?;
        Ok(info.input_count)
    }

    /// Copy queued records into `buffer` without consuming them; returns
    /// the number copied
    pub fn peek_input(&self, handle: Handle, buffer: &mut [InputRecord]) -> Result<u32> {
        trace!("peek_input({}, {})", handle, buffer.len());
        let read = console_ioctl(
            &*self.kernel,
            handle,
            IOCTL_CONDRV_PEEK,
            &[],
            bytemuck::cast_slice_mut(buffer),
        )?;
        Ok((read / std::mem::size_of::<InputRecord>()) as u32)
    }

    /// Like [`peek_input`](Self::peek_input), key characters in the input
    /// codepage
    pub fn peek_input_narrow(&self, handle: Handle, buffer: &mut [InputRecord]) -> Result<u32> {
        let count = self.peek_input(handle, buffer)?;
        input_records_to_narrow(Codepage::or_ansi(self.input_cp()), &mut buffer[..count as usize]);
        Ok(count)
    }

    /// Append records to the input queue; returns the number written
    pub fn write_input(&self, handle: Handle, records: &[InputRecord]) -> Result<u32> {
        trace!("write_input({}, {})", handle, records.len());
        console_ioctl(
            &*self.kernel,
            handle,
            IOCTL_CONDRV_WRITE_INPUT,
            bytemuck::cast_slice(records),
            &mut [],
        )?;
        Ok(records.len() as u32)
    }

    pub fn write_input_narrow(&self, handle: Handle, records: &[InputRecord]) -> Result<u32> {
        let mut wide = Vec::new();
        wide.try_reserve_exact(records.len())
            .map_err(|_| ConsoleError::NotEnoughMemory)?;
        wide.extend_from_slice(records);
        input_records_to_wide(Codepage::or_ansi(self.input_cp()), &mut wide);
        self.write_input(handle, &wide)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::attached;
    use crate::core::codepage::CP_OEM_US;
    use crate::core::types::{KeyEventRecord, FOCUS_EVENT};

    fn key(ch: u16) -> InputRecord {
        InputRecord::key(KeyEventRecord {
            key_down: 1,
            repeat_count: 1,
            virtual_key_code: 0x41,
            uchar: ch,
            ..Default::default()
        })
    }

    #[test]
    fn test_write_peek_count() {
        let (_host, console, _, input) = attached();
        assert_eq!(console.number_of_input_events(input).unwrap(), 0);

        let records = [key('a' as u16), key('b' as u16), InputRecord::raw(FOCUS_EVENT, [1; 16])];
        assert_eq!(console.write_input(input, &records).unwrap(), 3);
        assert_eq!(console.number_of_input_events(input).unwrap(), 3);

        let mut peeked = [InputRecord::default(); 2];
        assert_eq!(console.peek_input(input, &mut peeked).unwrap(), 2);
        assert_eq!(peeked, [records[0], records[1]]);
        assert_eq!(console.number_of_input_events(input).unwrap(), 3);

        let mut all = [InputRecord::default(); 8];
        assert_eq!(console.peek_input(input, &mut all).unwrap(), 3);
        assert_eq!(all[2], records[2]);
    }

    #[test]
    fn test_narrow_records_transcode_key_chars_only() {
        let (_host, console, _, input) = attached();
        assert_eq!(console.input_cp(), CP_OEM_US);

        // 0x81 is u-umlaut in CP437
        let focus = InputRecord::raw(FOCUS_EVENT, [0x81; 16]);
        console.write_input_narrow(input, &[key(0x81), focus]).unwrap();

        let mut wide = [InputRecord::default(); 2];
        console.peek_input(input, &mut wide).unwrap();
        assert_eq!(wide[0].key_char(), Some(0x00FC));
        assert_eq!(wide[1], focus);

        let mut narrow = [InputRecord::default(); 2];
        console.peek_input_narrow(input, &mut narrow).unwrap();
        assert_eq!(narrow[0].key_char(), Some(0x81));
        assert_eq!(narrow[0].key_event().map(|k| k.virtual_key_code), Some(0x41));
    }

    #[test]
    fn test_empty_peek() {
        let (_host, console, _, input) = attached();
        let mut buffer = [InputRecord::default(); 4];
        assert_eq!(console.peek_input(input, &mut buffer).unwrap(), 0);
        assert_eq!(console.peek_input(input, &mut []).unwrap(), 0);
    }
}
