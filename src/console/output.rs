//! Screen-buffer operations
//!
//! Rectangle operations address a caller buffer of `size` cells (row-major,
//! `size.x` per row) at `coord`, and a buffer region `region` on the peer.
//! The region is clamped to what fits in the caller buffer before the
//! exchange and replaced by what the peer actually transferred after it.
//! An inverted region fails with [`ConsoleError::InvalidParameter`]; a
//! `coord` outside `size` fails with [`ConsoleError::InvalidFunction`] and
//! reports the region as empty (`right = left - 1`, `bottom = top - 1`).

use tracing::trace;

use crate::core::codepage::{char_infos_to_narrow, char_infos_to_wide, Codepage};
use crate::core::ioctl::{console_ioctl, ioctl_in, ioctl_in_out};
use crate::core::protocol::{
    decode_header, decode_slice, encode_with_payload, staging_buffer, CharInfoMode, FillOutputParams, OutputParams,
    ScrollParams, IOCTL_CONDRV_ACTIVATE, IOCTL_CONDRV_FILL_OUTPUT, IOCTL_CONDRV_READ_OUTPUT, IOCTL_CONDRV_SCROLL,
    IOCTL_CONDRV_WRITE_OUTPUT,
};
use crate::core::session::Console;
use crate::core::types::{CharInfo, Coord, Handle, SmallRect};
use crate::error::{ConsoleError, Result};

/// Clip rectangle used when the caller supplies none
const FULL_CLIP: SmallRect = SmallRect::new(0, 0, i16::MAX, i16::MAX);

/// Clamp `region` to the part of a `size` caller buffer left of and below
/// `coord`; returns the clamped width and height
fn clamp_region(buffer_len: usize, size: Coord, coord: Coord, region: &mut SmallRect) -> Result<(i32, i32)> {
    if region.is_inverted() {
        return Err(ConsoleError::InvalidParameter);
    }
    if coord.x >= size.x || coord.y >= size.y {
        region.set_empty();
        return Err(ConsoleError::InvalidFunction);
    }
    if coord.x < 0 || coord.y < 0 || buffer_len < size.x as usize * size.y as usize {
        return Err(ConsoleError::InvalidAccess);
    }

    let width = region.width().min(size.x as i32 - coord.x as i32);
    let height = region.height().min(size.y as i32 - coord.y as i32);
    region.right = (region.left as i32 + width - 1) as i16;
    region.bottom = (region.top as i32 + height - 1) as i16;
    Ok((width, height))
}

/// Offset of (x, y) of the caller buffer
fn buffer_index(size: Coord, coord: Coord, x: i32, y: i32) -> usize {
    (y + coord.y as i32) as usize * size.x as usize + (x + coord.x as i32) as usize
}

/// Peer-side coordinates travel as unsigned 32-bit values
fn wire(v: i16) -> u32 {
    v as i32 as u32
}

impl Console {
    /// Read a region of cells into `buffer`
    pub fn read_output(
        &self,
        handle: Handle,
        buffer: &mut [CharInfo],
        size: Coord,
        coord: Coord,
        region: &mut SmallRect,
    ) -> Result<()> {
        trace!("read_output({}, {:?}, {:?}, {:?})", handle, size, coord, region);
        let (width, height) = clamp_region(buffer.len(), size, coord, region)?;

        let cell = std::mem::size_of::<CharInfo>();
        let header = std::mem::size_of::<SmallRect>();
        let mut staging = staging_buffer(header + width as usize * height as usize * cell)?;
        let params = OutputParams {
            mode: CharInfoMode::TextAttr as u32,
            x: wire(region.left),
            y: wire(region.top),
            width: width as u32,
        };
        let read = console_ioctl(
            &*self.kernel,
            handle,
            IOCTL_CONDRV_READ_OUTPUT,
            bytemuck::bytes_of(&params),
            &mut staging,
        )?;

        let Some((returned, payload)) = decode_header::<SmallRect>(&staging[..read]) else {
            return Ok(());
        };
        // The peer may return a smaller rectangle; its cells land at the
        // matching offset inside the caller buffer
        let dx = (returned.left as i32 - region.left as i32).clamp(0, width);
        let dy = (returned.top as i32 - region.top as i32).clamp(0, height);
        *region = returned;
        let cells = decode_slice::<CharInfo>(payload);
        let got_width = returned.width().clamp(0, width - dx);
        let got_height = returned.height().clamp(0, height - dy);
        if cells.len() < (got_width * got_height) as usize {
            return Ok(());
        }
        for y in 0..got_height {
            let src = &cells[(y * got_width) as usize..((y + 1) * got_width) as usize];
            let start = buffer_index(size, coord, dx, dy + y);
            buffer[start..start + got_width as usize].copy_from_slice(src);
        }
        Ok(())
    }

    /// Like [`read_output`](Self::read_output), characters transcoded to the
    /// output codepage
    pub fn read_output_narrow(
        &self,
        handle: Handle,
        buffer: &mut [CharInfo],
        size: Coord,
        coord: Coord,
        region: &mut SmallRect,
    ) -> Result<()> {
        let (left, top) = (region.left as i32, region.top as i32);
        self.read_output(handle, buffer, size, coord, region)?;
        if region.is_empty() {
            return Ok(());
        }
        let dx = region.left as i32 - left;
        let dy = region.top as i32 - top;
        let width = region.width().min(size.x as i32 - coord.x as i32 - dx).max(0);
        let height = region.height().min(size.y as i32 - coord.y as i32 - dy).max(0);
        let cp = Codepage::or_ansi(self.output_cp());
        for y in 0..height {
            let start = buffer_index(size, coord, dx, dy + y);
            char_infos_to_narrow(cp, &mut buffer[start..start + width as usize]);
        }
        Ok(())
    }

    /// Write a region of cells from `buffer`
    pub fn write_output(
        &self,
        handle: Handle,
        buffer: &[CharInfo],
        size: Coord,
        coord: Coord,
        region: &mut SmallRect,
    ) -> Result<()> {
        trace!("write_output({}, {:?}, {:?}, {:?})", handle, size, coord, region);
        let (width, height) = clamp_region(buffer.len(), size, coord, region)?;

        let mut cells = Vec::new();
        cells
            .try_reserve_exact(width as usize * height as usize)
            .map_err(|_| ConsoleError::NotEnoughMemory)?;
        for y in 0..height {
            let start = buffer_index(size, coord, 0, y);
            cells.extend_from_slice(&buffer[start..start + width as usize]);
        }

        let params = OutputParams {
            mode: CharInfoMode::TextAttr as u32,
            x: wire(region.left),
            y: wire(region.top),
            width: width as u32,
        };
        let request = encode_with_payload(&params, &cells)?;
        *region = ioctl_request_rect(self, handle, &request)?;
        Ok(())
    }

    /// Like [`write_output`](Self::write_output), characters taken in the
    /// output codepage
    pub fn write_output_narrow(
        &self,
        handle: Handle,
        buffer: &[CharInfo],
        size: Coord,
        coord: Coord,
        region: &mut SmallRect,
    ) -> Result<()> {
        let mut wide = Vec::new();
        wide.try_reserve_exact(buffer.len())
            .map_err(|_| ConsoleError::NotEnoughMemory)?;
        wide.extend_from_slice(buffer);
        char_infos_to_wide(Codepage::or_ansi(self.output_cp()), &mut wide);
        self.write_output(handle, &wide, size, coord, region)
    }

    fn read_linear(&self, handle: Handle, mode: CharInfoMode, coord: Coord, len: usize) -> Result<Vec<u16>> {
        let mut staging = staging_buffer(len * 2)?;
        let params = OutputParams {
            mode: mode as u32,
            x: wire(coord.x),
            y: wire(coord.y),
            width: 0,
        };
        let read = console_ioctl(
            &*self.kernel,
            handle,
            IOCTL_CONDRV_READ_OUTPUT,
            bytemuck::bytes_of(&params),
            &mut staging,
        )?;
        Ok(decode_slice(&staging[..read]))
    }

    fn write_linear(&self, handle: Handle, mode: CharInfoMode, coord: Coord, values: &[u16]) -> Result<u32> {
        let params = OutputParams {
            mode: mode as u32,
            x: wire(coord.x),
            y: wire(coord.y),
            width: 0,
        };
        let request = encode_with_payload(&params, values)?;
        let mut written = 0u32;
        console_ioctl(
            &*self.kernel,
            handle,
            IOCTL_CONDRV_WRITE_OUTPUT,
            &request,
            bytemuck::bytes_of_mut(&mut written),
        )?;
        Ok(written)
    }

    /// Read characters starting at `coord`, continuing across rows; returns
    /// the number read
    pub fn read_output_character(&self, handle: Handle, buffer: &mut [u16], coord: Coord) -> Result<u32> {
        trace!("read_output_character({}, {}, {:?})", handle, buffer.len(), coord);
        let chars = self.read_linear(handle, CharInfoMode::Text, coord, buffer.len())?;
        buffer[..chars.len()].copy_from_slice(&chars);
        Ok(chars.len() as u32)
    }

    /// Read characters as output-codepage bytes; returns the number of bytes
    pub fn read_output_character_narrow(&self, handle: Handle, buffer: &mut [u8], coord: Coord) -> Result<u32> {
        trace!("read_output_character_narrow({}, {}, {:?})", handle, buffer.len(), coord);
        let chars = self.read_linear(handle, CharInfoMode::Text, coord, buffer.len())?;
        let codepage = Codepage::or_ansi(self.output_cp());

        // Only whole encoded characters are copied
        let mut len = 0;
        for ch in char::decode_utf16(chars.iter().copied()) {
            let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
            let mut units = [0u16; 2];
            let encoded = codepage.encode(ch.encode_utf16(&mut units));
            if len + encoded.len() > buffer.len() {
                break;
            }
            buffer[len..len + encoded.len()].copy_from_slice(&encoded);
            len += encoded.len();
        }
        Ok(len as u32)
    }

    pub fn read_output_attribute(&self, handle: Handle, attrs: &mut [u16], coord: Coord) -> Result<u32> {
        trace!("read_output_attribute({}, {}, {:?})", handle, attrs.len(), coord);
        let values = self.read_linear(handle, CharInfoMode::Attr, coord, attrs.len())?;
        attrs[..values.len()].copy_from_slice(&values);
        Ok(values.len() as u32)
    }

    /// Write characters starting at `coord`; returns the number written
    pub fn write_output_character(&self, handle: Handle, chars: &[u16], coord: Coord) -> Result<u32> {
        trace!("write_output_character({}, {}, {:?})", handle, chars.len(), coord);
        self.write_linear(handle, CharInfoMode::Text, coord, chars)
    }

    pub fn write_output_character_narrow(&self, handle: Handle, chars: &[u8], coord: Coord) -> Result<u32> {
        trace!("write_output_character_narrow({}, {}, {:?})", handle, chars.len(), coord);
        let wide = Codepage::or_ansi(self.output_cp()).decode(chars);
        self.write_linear(handle, CharInfoMode::Text, coord, &wide)
    }

    pub fn write_output_attribute(&self, handle: Handle, attrs: &[u16], coord: Coord) -> Result<u32> {
        trace!("write_output_attribute({}, {}, {:?})", handle, attrs.len(), coord);
        self.write_linear(handle, CharInfoMode::Attr, coord, attrs)
    }

    fn fill(&self, handle: Handle, mode: CharInfoMode, fill: CharInfo, count: u32, coord: Coord) -> Result<u32> {
        let params = FillOutputParams {
            mode: mode as u32,
            x: coord.x as i32,
            y: coord.y as i32,
            count,
            wrap: 1,
            ch: fill.ch,
            attr: fill.attr,
        };
        ioctl_in_out(&*self.kernel, handle, IOCTL_CONDRV_FILL_OUTPUT, &params)
    }

    /// Repeat `ch` over `count` cells from `coord`, wrapping across rows;
    /// returns the number of cells written
    pub fn fill_output_character(&self, handle: Handle, ch: u16, count: u32, coord: Coord) -> Result<u32> {
        trace!("fill_output_character({}, {:#x}, {}, {:?})", handle, ch, count, coord);
        self.fill(handle, CharInfoMode::Text, CharInfo::new(ch, 0), count, coord)
    }

    pub fn fill_output_character_narrow(&self, handle: Handle, ch: u8, count: u32, coord: Coord) -> Result<u32> {
        let wide = Codepage::or_ansi(self.output_cp()).decode_char(ch);
        self.fill_output_character(handle, wide, count, coord)
    }

    pub fn fill_output_attribute(&self, handle: Handle, attr: u16, count: u32, coord: Coord) -> Result<u32> {
        trace!("fill_output_attribute({}, {:#x}, {}, {:?})", handle, attr, count, coord);
        self.fill(handle, CharInfoMode::Attr, CharInfo::new(0, attr), count, coord)
    }

    /// Move `scroll` so its top-left lands on `origin`. Only cells inside
    /// `clip` change; vacated ones receive `fill`.
    pub fn scroll_screen_buffer(
        &self,
        handle: Handle,
        scroll: &SmallRect,
        clip: Option<&SmallRect>,
        origin: Coord,
        fill: CharInfo,
    ) -> Result<()> {
        trace!("scroll_screen_buffer({}, {:?}, {:?}, {:?}, {:?})", handle, scroll, clip, origin, fill);
        let params = ScrollParams {
            scroll: *scroll,
            origin,
            clip: clip.copied().unwrap_or(FULL_CLIP),
            fill,
        };
        ioctl_in(&*self.kernel, handle, IOCTL_CONDRV_SCROLL, &params)
    }

    pub fn scroll_screen_buffer_narrow(
        &self,
        handle: Handle,
        scroll: &SmallRect,
        clip: Option<&SmallRect>,
        origin: Coord,
        fill: CharInfo,
    ) -> Result<()> {
        let ch = Codepage::or_ansi(self.output_cp()).decode_char(fill.ch as u8);
        self.scroll_screen_buffer(handle, scroll, clip, origin, CharInfo::new(ch, fill.attr))
    }

    /// Make `handle` the session's displayed screen buffer
    pub fn set_active_screen_buffer(&self, handle: Handle) -> Result<()> {
        trace!("set_active_screen_buffer({})", handle);
        console_ioctl(&*self.kernel, handle, IOCTL_CONDRV_ACTIVATE, &[], &mut [])?;
        Ok(())
    }
}

fn ioctl_request_rect(console: &Console, handle: Handle, request: &[u8]) -> Result<SmallRect> {
    let mut rect = SmallRect::default();
    console_ioctl(
        &*console.kernel,
        handle,
        IOCTL_CONDRV_WRITE_OUTPUT,
        request,
        bytemuck::bytes_of_mut(&mut rect),
    )?;
    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::attached;
    use crate::core::codepage::{CP_OEM_US, CP_UTF8};
    use crate::core::kernel::{AccessMask, ShareMode};
    use crate::core::session::CONSOLE_TEXTMODE_BUFFER;
    use proptest::prelude::*;

    fn text(chars: &[u16]) -> String {
        String::from_utf16_lossy(chars)
    }

    #[test]
    fn test_fill_then_read_characters() {
        let (_host, console, output, _) = attached();
        let written = console.fill_output_character(output, 'X' as u16, 5, Coord::new(0, 0)).unwrap();
        assert_eq!(written, 5);

        let mut chars = [0u16; 5];
        let read = console.read_output_character(output, &mut chars, Coord::new(0, 0)).unwrap();
        assert_eq!(read, 5);
        assert_eq!(text(&chars), "XXXXX");
    }

    #[test]
    fn test_fill_wraps_and_stops_at_buffer_end() {
        let (_host, console, output, _) = attached();
        let written = console.fill_output_character(output, '#' as u16, 10, Coord::new(76, 0)).unwrap();
        assert_eq!(written, 10);
        let mut chars = [0u16; 6];
        console.read_output_character(output, &mut chars, Coord::new(0, 1)).unwrap();
        assert_eq!(text(&chars), "######");

        let written = console.fill_output_character(output, '#' as u16, 10, Coord::new(78, 24)).unwrap();
        assert_eq!(written, 2);
    }

    #[test]
    fn test_write_and_read_attributes() {
        let (host, console, output, _) = attached();
        let written = console.write_output_attribute(output, &[0x1f, 0x2e, 0x3d], Coord::new(79, 0)).unwrap();
        assert_eq!(written, 3);
        let screen = host.screen(output).unwrap();
        assert_eq!(screen.cell(79, 0).map(|c| c.attr), Some(0x1f));
        assert_eq!(screen.cell(1, 1).map(|c| c.attr), Some(0x3d));

        let mut attrs = [0u16; 3];
        assert_eq!(console.read_output_attribute(output, &mut attrs, Coord::new(79, 0)).unwrap(), 3);
        assert_eq!(attrs, [0x1f, 0x2e, 0x3d]);

        assert_eq!(console.fill_output_attribute(output, 0x4f, 80, Coord::new(0, 2)).unwrap(), 80);
        assert_eq!(host.screen(output).unwrap().cell(40, 2).map(|c| c.attr), Some(0x4f));
    }

    #[test]
    fn test_write_output_character_past_end_is_truncated() {
        let (_host, console, output, _) = attached();
        let chars: Vec<u16> = "hello".encode_utf16().collect();
        assert_eq!(console.write_output_character(output, &chars, Coord::new(77, 24)).unwrap(), 3);
        assert_eq!(console.write_output_character(output, &chars, Coord::new(0, 25)).unwrap(), 0);
    }

    #[test]
    fn test_narrow_characters_use_output_codepage() {
        let (host, console, output, _) = attached();
        console.set_output_cp(CP_OEM_US).unwrap();
        // 0x82 is e-acute in CP437
        console.write_output_character_narrow(output, &[b'a', 0x82], Coord::new(0, 0)).unwrap();
        assert_eq!(host.screen(output).unwrap().cell(1, 0).map(|c| c.ch), Some(0x00E9));

        let mut bytes = [0u8; 2];
        assert_eq!(console.read_output_character_narrow(output, &mut bytes, Coord::new(0, 0)).unwrap(), 2);
        assert_eq!(bytes, [b'a', 0x82]);

        console.fill_output_character_narrow(output, 0x82, 2, Coord::new(0, 1)).unwrap();
        assert_eq!(host.screen(output).unwrap().cell(1, 1).map(|c| c.ch), Some(0x00E9));
    }

    #[test]
    fn test_narrow_characters_not_split_in_multibyte_codepage() {
        let (_host, console, output, _) = attached();
        console.set_output_cp(CP_UTF8).unwrap();
        let wide: Vec<u16> = "a\u{e9}\u{20ac}".encode_utf16().collect();
        console.write_output_character(output, &wide, Coord::new(0, 0)).unwrap();

        let mut bytes = [0xffu8; 4];
        assert_eq!(console.read_output_character_narrow(output, &mut bytes, Coord::new(0, 0)).unwrap(), 3);
        assert_eq!(&bytes[..3], "a\u{e9}".as_bytes());
        assert_eq!(bytes[3], 0xff);

        let mut bytes = [0u8; 6];
        assert_eq!(console.read_output_character_narrow(output, &mut bytes, Coord::new(0, 0)).unwrap(), 6);
        assert_eq!(&bytes, "a\u{e9}\u{20ac}".as_bytes());
    }

    #[test]
    fn test_region_round_trip() {
        let (_host, console, output, _) = attached();
        let size = Coord::new(4, 2);
        let cells: Vec<CharInfo> = (0..8).map(|i| CharInfo::new('a' as u16 + i, 0x10 + i)).collect();

        let mut region = SmallRect::new(10, 5, 13, 6);
        console.write_output(output, &cells, size, Coord::new(0, 0), &mut region).unwrap();
        assert_eq!(region, SmallRect::new(10, 5, 13, 6));

        let mut back = vec![CharInfo::default(); 8];
        let mut region = SmallRect::new(10, 5, 13, 6);
        console.read_output(output, &mut back, size, Coord::new(0, 0), &mut region).unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn test_region_clamped_to_caller_buffer() {
        let (_host, console, output, _) = attached();
        let mut buffer = vec![CharInfo::new(0, 0); 6];
        let mut region = SmallRect::new(0, 0, 9, 9);
        console
            .read_output(output, &mut buffer, Coord::new(3, 2), Coord::new(1, 1), &mut region)
            .unwrap();
        assert_eq!(region, SmallRect::new(0, 0, 1, 0));
        // Only the scattered cells change
        assert_eq!(buffer[0], CharInfo::new(0, 0));
        assert_eq!(buffer[4], CharInfo::default());
        assert_eq!(buffer[5], CharInfo::default());
    }

    #[test]
    fn test_region_clamped_by_peer() {
        let (_host, console, output, _) = attached();
        let mut buffer = vec![CharInfo::default(); 100];
        let mut region = SmallRect::new(75, 20, 84, 29);
        console
            .read_output(output, &mut buffer, Coord::new(10, 10), Coord::new(0, 0), &mut region)
            .unwrap();
        assert_eq!(region, SmallRect::new(75, 20, 79, 24));
    }

    #[test]
    fn test_region_argument_errors() {
        let (host, console, output, _) = attached();
        let mut buffer = vec![CharInfo::default(); 4];

        let mut inverted = SmallRect::new(5, 0, 4, 0);
        assert_eq!(
            console.read_output(output, &mut buffer, Coord::new(2, 2), Coord::new(0, 0), &mut inverted),
            Err(ConsoleError::InvalidParameter)
        );
        assert_eq!(inverted, SmallRect::new(5, 0, 4, 0));

        let mut region = SmallRect::new(3, 4, 6, 8);
        assert_eq!(
            console.write_output(output, &buffer, Coord::new(2, 2), Coord::new(2, 0), &mut region),
            Err(ConsoleError::InvalidFunction)
        );
        assert_eq!(region, SmallRect::new(3, 4, 2, 3));

        let mut region = SmallRect::new(0, 0, 1, 1);
        assert_eq!(
            console.read_output(output, &mut buffer, Coord::new(4, 2), Coord::new(0, 0), &mut region),
            Err(ConsoleError::InvalidAccess)
        );

        let before = host.screen(output).unwrap().rows[0].text();
        let mut region = SmallRect::new(0, 0, 1, 1);
        let short = vec![CharInfo::new('z' as u16, 7); 3];
        assert_eq!(
            console.write_output(output, &short, Coord::new(2, 2), Coord::new(0, 0), &mut region),
            Err(ConsoleError::InvalidAccess)
        );
        assert_eq!(host.screen(output).unwrap().rows[0].text(), before);
    }

    #[test]
    fn test_region_partly_left_of_screen() {
        let (host, console, output, _) = attached();
        let size = Coord::new(4, 2);
        let cells: Vec<CharInfo> = (0..8).map(|i| CharInfo::new('a' as u16 + i, 7)).collect();

        let mut region = SmallRect::new(-2, 0, 1, 1);
        console.write_output(output, &cells, size, Coord::new(0, 0), &mut region).unwrap();
        assert_eq!(region, SmallRect::new(0, 0, 1, 1));
        assert_eq!(host.screen(output).unwrap().cell(0, 0).map(|c| c.ch), Some('c' as u16));
        assert_eq!(host.screen(output).unwrap().cell(1, 1).map(|c| c.ch), Some('h' as u16));

        let mut back = vec![CharInfo::new(0, 0); 8];
        let mut region = SmallRect::new(-2, 0, 1, 1);
        console.read_output(output, &mut back, size, Coord::new(0, 0), &mut region).unwrap();
        assert_eq!(region, SmallRect::new(0, 0, 1, 1));
        assert_eq!(back[0], CharInfo::new(0, 0));
        assert_eq!(back[1], CharInfo::new(0, 0));
        assert_eq!(&back[2..4], &cells[2..4]);
        assert_eq!(&back[6..8], &cells[6..8]);
    }

    #[test]
    fn test_region_outside_screen_reads_nothing() {
        let (_host, console, output, _) = attached();
        let mut buffer = vec![CharInfo::new(0, 0); 4];
        let mut region = SmallRect::new(100, 0, 101, 1);
        console
            .read_output(output, &mut buffer, Coord::new(2, 2), Coord::new(0, 0), &mut region)
            .unwrap();
        assert!(region.is_empty());
        assert!(buffer.iter().all(|c| *c == CharInfo::new(0, 0)));
    }

    #[test]
    fn test_narrow_region_transcodes_cells() {
        let (host, console, output, _) = attached();
        console.set_output_cp(CP_OEM_US).unwrap();
        let cells = [CharInfo::new(0x82, 7), CharInfo::new(b'b' as u16, 7)];
        let mut region = SmallRect::new(0, 3, 1, 3);
        console
            .write_output_narrow(output, &cells, Coord::new(2, 1), Coord::new(0, 0), &mut region)
            .unwrap();
        assert_eq!(host.screen(output).unwrap().cell(0, 3).map(|c| c.ch), Some(0x00E9));

        let mut back = [CharInfo::default(); 2];
        let mut region = SmallRect::new(0, 3, 1, 3);
        console
            .read_output_narrow(output, &mut back, Coord::new(2, 1), Coord::new(0, 0), &mut region)
            .unwrap();
        assert_eq!(back, cells);
    }

    #[test]
    fn test_scroll_moves_and_fills() {
        let (host, console, output, _) = attached();
        let line: Vec<u16> = "abcd".encode_utf16().collect();
        console.write_output_character(output, &line, Coord::new(0, 0)).unwrap();

        let fill = CharInfo::new('.' as u16, 0x07);
        console
            .scroll_screen_buffer(output, &SmallRect::new(0, 0, 3, 0), None, Coord::new(0, 1), fill)
            .unwrap();
        let screen = host.screen(output).unwrap();
        assert!(screen.rows[1].text().starts_with("abcd"));
        assert!(screen.rows[0].text().starts_with("...."));

        let clip = SmallRect::new(0, 1, 1, 1);
        console
            .scroll_screen_buffer(output, &SmallRect::new(0, 1, 3, 1), Some(&clip), Coord::new(1, 1), fill)
            .unwrap();
        let screen = host.screen(output).unwrap();
        assert!(screen.rows[1].text().starts_with(".acd"));

        assert_eq!(
            console.scroll_screen_buffer(output, &SmallRect::new(3, 0, 0, 0), None, Coord::new(0, 0), fill),
            Err(ConsoleError::InvalidParameter)
        );
    }

    #[test]
    fn test_scroll_narrow_fill() {
        let (host, console, output, _) = attached();
        console.set_output_cp(CP_OEM_US).unwrap();
        console
            .scroll_screen_buffer_narrow(
                output,
                &SmallRect::new(0, 0, 0, 0),
                None,
                Coord::new(0, 1),
                CharInfo::new(0x82, 7),
            )
            .unwrap();
        assert_eq!(host.screen(output).unwrap().cell(0, 0).map(|c| c.ch), Some(0x00E9));
    }

    #[test]
    fn test_activate_screen_buffer() {
        let (host, console, output, _) = attached();
        let second = console
            .create_screen_buffer(
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
                ShareMode::READ | ShareMode::WRITE,
                false,
                CONSOLE_TEXTMODE_BUFFER,
            )
            .unwrap();
        console.fill_output_character(second, 'Z' as u16, 1, Coord::new(0, 0)).unwrap();
        console.set_active_screen_buffer(second).unwrap();

        let reference = console.console_handle().unwrap();
        assert_eq!(host.screen(reference).unwrap().cell(0, 0).map(|c| c.ch), Some('Z' as u16));
        assert_ne!(host.screen(output).unwrap().cell(0, 0).map(|c| c.ch), Some('Z' as u16));
    }

    #[test]
    fn test_exchange_on_closed_handle_is_invalid_handle() {
        let (_host, console, output, _) = attached();
        console.free().unwrap();
        assert_eq!(
            console.fill_output_character(output, 'X' as u16, 1, Coord::new(0, 0)),
            Err(ConsoleError::InvalidHandle)
        );
    }

    proptest! {
        #[test]
        fn prop_clamped_region_fits_caller_buffer(
            left in -5i16..90, top in -5i16..30, w in 1i16..40, h in 1i16..40,
            sx in 1i16..12, sy in 1i16..12, ox in 0i16..14, oy in 0i16..14,
        ) {
            let (_host, console, output, _) = attached();
            let size = Coord::new(sx, sy);
            let origin = Coord::new(ox, oy);
            let mut buffer = vec![CharInfo::default(); sx as usize * sy as usize];
            let mut region = SmallRect::new(left, top, left + w - 1, top + h - 1);

            let result = console.read_output(output, &mut buffer, size, origin, &mut region);
            if ox >= sx || oy >= sy {
                prop_assert_eq!(result, Err(ConsoleError::InvalidFunction));
                prop_assert_eq!(region.right, left - 1);
                prop_assert_eq!(region.bottom, top - 1);
            } else {
                prop_assert!(result.is_ok());
                prop_assert!(region.width() <= (sx - ox) as i32);
                prop_assert!(region.height() <= (sy - oy) as i32);
            }
        }

        #[test]
        fn prop_write_read_round_trip(
            left in 0i16..70, top in 0i16..20, w in 1i16..10, h in 1i16..5,
            seed in any::<u16>(),
        ) {
            let (_host, console, output, _) = attached();
            let size = Coord::new(w, h);
            let cells: Vec<CharInfo> = (0..(w * h) as u16)
                .map(|i| CharInfo::new(0x41 + (seed.wrapping_add(i) % 26), seed.wrapping_mul(i) & 0xff))
                .collect();

            let mut region = SmallRect::new(left, top, left + w - 1, top + h - 1);
            console.write_output(output, &cells, size, Coord::new(0, 0), &mut region).unwrap();

            let mut back = vec![CharInfo::default(); cells.len()];
            let mut region = SmallRect::new(left, top, left + w - 1, top + h - 1);
            console.read_output(output, &mut back, size, Coord::new(0, 0), &mut region).unwrap();
            prop_assert_eq!(back, cells);
        }
    }
}
