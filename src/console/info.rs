//! Modes, codepages, cursor and window geometry, title, input-exe name

use tracing::trace;

use crate::core::codepage::{self, Codepage};
use crate::core::ioctl::{console_ioctl, ioctl_in, ioctl_out};
use crate::core::protocol::{
    InputInfo, InputInfoMask, InputInfoParams, OutputInfo, OutputInfoMask, OutputInfoParams, IOCTL_CONDRV_GET_INPUT_INFO,
    IOCTL_CONDRV_GET_MODE, IOCTL_CONDRV_GET_OUTPUT_INFO, IOCTL_CONDRV_GET_TITLE, IOCTL_CONDRV_SET_INPUT_INFO,
    IOCTL_CONDRV_SET_MODE, IOCTL_CONDRV_SET_OUTPUT_INFO, IOCTL_CONDRV_SET_TITLE,
};
use crate::core::session::{Console, MAX_PATH};
use crate::core::types::{Coord, CursorInfo, Handle, ScreenBufferInfo, ScreenBufferInfoEx, SmallRect};
use crate::error::{ConsoleError, Result};

/// Longest title [`Console::title`] returns, in UTF-16 units
const MAX_TITLE: usize = 1024;

fn window_of(info: &OutputInfo) -> SmallRect {
    SmallRect::new(info.win_left, info.win_top, info.win_right, info.win_bottom)
}

impl Console {
    fn output_info(&self, handle: Handle) -> Result<OutputInfo> {
        ioctl_out(&*self.kernel, handle, IOCTL_CONDRV_GET_OUTPUT_INFO)
    }

    fn set_output_info(&self, handle: Handle, params: &OutputInfoParams) -> Result<()> {
        ioctl_in(&*self.kernel, handle, IOCTL_CONDRV_SET_OUTPUT_INFO, params)
    }

    pub fn mode(&self, handle: Handle) -> Result<u32> {
        trace!("mode({})", handle);
        ioctl_out(&*self.kernel, handle, IOCTL_CONDRV_GET_MODE)
    }

    pub fn set_mode(&self, handle: Handle, mode: u32) -> Result<()> {
        trace!("set_mode({}, {:#x})", handle, mode);
        ioctl_in(&*self.kernel, handle, IOCTL_CONDRV_SET_MODE, &mode)
    }

    fn input_info(&self) -> Option<InputInfo> {
        ioctl_out(&*self.kernel, self.console_handle_or_null(), IOCTL_CONDRV_GET_INPUT_INFO).ok()
    }

    /// Session input codepage; the OEM codepage when the session has none,
    /// 0 when there is no session
    pub fn input_cp(&self) -> u32 {
        match self.input_info() {
            Some(info) if info.input_cp != 0 => info.input_cp,
            Some(_) => self.settings.oem_cp,
            None => 0,
        }
    }

    /// Session output codepage, defaulting like [`input_cp`](Self::input_cp)
    pub fn output_cp(&self) -> u32 {
        match self.input_info() {
            Some(info) if info.output_cp != 0 => info.output_cp,
            Some(_) => self.settings.oem_cp,
            None => 0,
        }
    }

    fn set_codepage(&self, mask: InputInfoMask, cp: u32) -> Result<()> {
        if !codepage::is_valid(cp) {
            return Err(ConsoleError::InvalidParameter);
        }
        let params = InputInfoParams {
            mask: mask.bits(),
            info: InputInfo {
                input_cp: cp,
                output_cp: cp,
                input_count: 0,
            },
        };
        ioctl_in(&*self.kernel, self.console_handle_or_null(), IOCTL_CONDRV_SET_INPUT_INFO, &params)
    }

    pub fn set_input_cp(&self, cp: u32) -> Result<()> {
        trace!("set_input_cp({})", cp);
        self.set_codepage(InputInfoMask::INPUT_CODEPAGE, cp)
    }

    pub fn set_output_cp(&self, cp: u32) -> Result<()> {
        trace!("set_output_cp({})", cp);
        self.set_codepage(InputInfoMask::OUTPUT_CODEPAGE, cp)
    }

    pub fn cursor_info(&self, handle: Handle) -> Result<CursorInfo> {
        trace!("cursor_info({})", handle);
        let info = self.output_info(handle)?;
        Ok(CursorInfo {
            size: info.cursor_size.max(0) as u32,
            visible: info.cursor_visible != 0,
        })
    }

    pub fn set_cursor_info(&self, handle: Handle, cursor: &CursorInfo) -> Result<()> {
        trace!("set_cursor_info({}, {:?})", handle, cursor);
        let mut params = OutputInfoParams::new(OutputInfoMask::CURSOR_GEOM);
        params.info.cursor_size = cursor.size.min(i16::MAX as u32) as i16;
        params.info.cursor_visible = cursor.visible as i16;
        self.set_output_info(handle, &params)
    }

    /// Move the cursor, scrolling the display window just enough to keep
    /// it visible
    pub fn set_cursor_position(&self, handle: Handle, pos: Coord) -> Result<()> {
        trace!("set_cursor_position({}, {:?})", handle, pos);
        let info = self.output_info(handle)?;
        let mut window = window_of(&info);

        let mut params = OutputInfoParams::new(OutputInfoMask::CURSOR_POS);
        params.info.cursor_x = pos.x;
        params.info.cursor_y = pos.y;

        if pos.x < window.left || pos.x > window.right || pos.y < window.top || pos.y > window.bottom {
            let w = window.width();
            let h = window.height();
            if pos.x < window.left {
                window.left = pos.x;
            } else if pos.x > window.right {
                window.left = (pos.x as i32 - w + 1) as i16;
            }
            if pos.y < window.top {
                window.top = pos.y;
            } else if pos.y > window.bottom {
                window.top = (pos.y as i32 - h + 1) as i16;
            }
            params.mask |= OutputInfoMask::DISPLAY_WINDOW.bits();
            params.info.win_left = window.left;
            params.info.win_top = window.top;
            params.info.win_right = (window.left as i32 + w - 1) as i16;
            params.info.win_bottom = (window.top as i32 + h - 1) as i16;
        }
        self.set_output_info(handle, &params)
    }

    /// Buffer geometry; the maximum window never exceeds the buffer
    pub fn screen_buffer_info(&self, handle: Handle) -> Result<ScreenBufferInfo> {
        trace!("screen_buffer_info({})", handle);
        let info = self.output_info(handle)?;
        Ok(ScreenBufferInfo {
            size: Coord::new(info.width, info.height),
            cursor_position: Coord::new(info.cursor_x, info.cursor_y),
            attributes: info.attr as u16,
            window: window_of(&info),
            maximum_window_size: Coord::new(info.width.min(info.max_width), info.height.min(info.max_height)),
        })
    }

    pub fn screen_buffer_info_ex(&self, handle: Handle) -> Result<ScreenBufferInfoEx> {
        trace!("screen_buffer_info_ex({})", handle);
        let info = self.output_info(handle)?;
        Ok(ScreenBufferInfoEx {
            size: Coord::new(info.width, info.height),
            cursor_position: Coord::new(info.cursor_x, info.cursor_y),
            attributes: info.attr as u16,
            window: window_of(&info),
            maximum_window_size: Coord::new(info.width.min(info.max_width), info.height.min(info.max_height)),
            popup_attributes: info.popup_attr as u16,
            fullscreen_supported: false,
            color_table: info.color_map,
        })
    }

    pub fn set_screen_buffer_info_ex(&self, handle: Handle, info: &ScreenBufferInfoEx) -> Result<()> {
        trace!("set_screen_buffer_info_ex({}, {:?})", handle, info);
        let mut params = OutputInfoParams::new(
            OutputInfoMask::CURSOR_POS
                | OutputInfoMask::SIZE
                | OutputInfoMask::ATTR
                | OutputInfoMask::POPUP_ATTR
                | OutputInfoMask::DISPLAY_WINDOW
                | OutputInfoMask::MAX_SIZE
                | OutputInfoMask::COLORTABLE,
        );
        params.info.cursor_x = info.cursor_position.x;
        params.info.cursor_y = info.cursor_position.y;
        params.info.width = info.size.x;
        params.info.height = info.size.y;
        params.info.attr = info.attributes as i16;
        params.info.popup_attr = info.popup_attributes as i16;
        params.info.win_left = info.window.left;
        params.info.win_top = info.window.top;
        params.info.win_right = info.window.right;
        params.info.win_bottom = info.window.bottom;
        params.info.max_width = info.maximum_window_size.x.min(info.size.x);
        params.info.max_height = info.maximum_window_size.y.min(info.size.y);
        params.info.color_map = info.color_table;
        self.set_output_info(handle, &params)
    }

    pub fn set_screen_buffer_size(&self, handle: Handle, size: Coord) -> Result<()> {
        trace!("set_screen_buffer_size({}, {:?})", handle, size);
        let mut params = OutputInfoParams::new(OutputInfoMask::SIZE);
        params.info.width = size.x;
        params.info.height = size.y;
        self.set_output_info(handle, &params)
    }

    /// Attribute used by subsequent standard-attribute writes
    pub fn set_text_attribute(&self, handle: Handle, attr: u16) -> Result<()> {
        trace!("set_text_attribute({}, {:#x})", handle, attr);
        let mut params = OutputInfoParams::new(OutputInfoMask::ATTR);
        params.info.attr = attr as i16;
        self.set_output_info(handle, &params)
    }

    /// Set the display window; when not `absolute`, `window` is added to the
    /// current window edge by edge
    pub fn set_window_info(&self, handle: Handle, absolute: bool, window: &SmallRect) -> Result<()> {
        trace!("set_window_info({}, {}, {:?})", handle, absolute, window);
        let mut rect = *window;
        if !absolute {
            let current = self.screen_buffer_info(handle)?.window;
            rect.left = rect.left.wrapping_add(current.left);
            rect.top = rect.top.wrapping_add(current.top);
            rect.right = rect.right.wrapping_add(current.right);
            rect.bottom = rect.bottom.wrapping_add(current.bottom);
        }
        let mut params = OutputInfoParams::new(OutputInfoMask::DISPLAY_WINDOW);
        params.info.win_left = rect.left;
        params.info.win_top = rect.top;
        params.info.win_right = rect.right;
        params.info.win_bottom = rect.bottom;
        self.set_output_info(handle, &params)
    }

    /// Largest window the buffer could show, (0, 0) when unknown
    pub fn largest_window_size(&self, handle: Handle) -> Coord {
        trace!("largest_window_size({})", handle);
        match self.output_info(handle) {
            Ok(info) => Coord::new(info.max_width, info.max_height),
            Err(_) => Coord::default(),
        }
    }

    /// Copy the title into `buffer`, NUL-terminated; returns its length
    /// without the terminator
    pub fn title_into(&self, buffer: &mut [u16]) -> Result<usize> {
        trace!("title_into({})", buffer.len());
        let Some(capacity) = buffer.len().checked_sub(1) else {
            return Ok(0);
        };
        let bytes = {
            let out: &mut [u8] = bytemuck::cast_slice_mut(&mut buffer[..capacity]);
            console_ioctl(&*self.kernel, self.console_handle_or_null(), IOCTL_CONDRV_GET_TITLE, &[], out)?
        };
        let len = bytes / 2;
        buffer[len] = 0;
        Ok(len)
    }

    pub fn title(&self) -> Result<String> {
        let mut buffer = vec![0u16; MAX_TITLE + 1];
        let len = self.title_into(&mut buffer)?;
        Ok(String::from_utf16_lossy(&buffer[..len]))
    }

    pub fn set_title(&self, title: &str) -> Result<()> {
        trace!("set_title({:?})", title);
        let units: Vec<u16> = title.encode_utf16().collect();
        console_ioctl(
            &*self.kernel,
            self.console_handle_or_null(),
            IOCTL_CONDRV_SET_TITLE,
            bytemuck::cast_slice(&units),
            &mut [],
        )?;
        Ok(())
    }

    /// Registered input-exe name. Fails with
    /// [`ConsoleError::BufferOverflow`] unless `capacity` also leaves room
    /// for a terminator.
    pub fn input_exe_name(&self, capacity: usize) -> Result<String> {
        let guard = self.state.lock();
        let state = guard.borrow();
        if capacity <= state.input_exe.len() {
            return Err(ConsoleError::BufferOverflow);
        }
        Ok(String::from_utf16_lossy(&state.input_exe))
    }

    /// Input-exe name in the ANSI codepage
    pub fn input_exe_name_narrow(&self, capacity: usize) -> Result<Vec<u8>> {
        let guard = self.state.lock();
        let narrow = Codepage::or_ansi(self.settings.ansi_cp).encode(&guard.borrow().input_exe);
        if capacity <= narrow.len() {
            return Err(ConsoleError::BufferOverflow);
        }
        Ok(narrow)
    }

    /// Register the name reported as the input-exe name; overlong names are
    /// truncated
    pub fn set_input_exe_name(&self, name: &str) -> Result<()> {
        trace!("set_input_exe_name({:?})", name);
        let units: Vec<u16> = name.encode_utf16().collect();
        self.store_input_exe(units)
    }

    pub fn set_input_exe_name_narrow(&self, name: &[u8]) -> Result<()> {
        let units = Codepage::or_ansi(self.settings.ansi_cp).decode(name);
        self.store_input_exe(units)
    }

    fn store_input_exe(&self, mut units: Vec<u16>) -> Result<()> {
        if units.is_empty() {
            return Err(ConsoleError::InvalidParameter);
        }
        units.truncate(MAX_PATH);
        let guard = self.state.lock();
        guard.borrow_mut().input_exe = units;
        Ok(())
    }
}
