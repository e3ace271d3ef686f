//! Screen buffer held by the loopback hosting peer
//!
//! A grid of `CharInfo` rows plus the cursor/window geometry reported through
//! the output-info exchange. Coordinates are cell units, rows top to bottom.

use crate::core::kernel::{KernelResult, NtStatus};
use crate::core::protocol::{CharInfoMode, OutputInfo, OutputInfoMask, ScrollParams};
use crate::core::types::{CharInfo, SmallRect, FOREGROUND_WHITE};

/// Default 16-color palette, 0x00BBGGRR
const DEFAULT_COLOR_MAP: [u32; 16] = [
    0x000000, 0x800000, 0x008000, 0x808000, 0x000080, 0x800080, 0x008080, 0xc0c0c0,
    0x808080, 0xff0000, 0x00ff00, 0xffff00, 0x0000ff, 0xff00ff, 0x00ffff, 0xffffff,
];

#[derive(Clone, Debug)]
pub struct Row {
    pub cells: Vec<CharInfo>,
}

impl Row {
    pub fn new(cols: u16, blank: CharInfo) -> Self {
        Self {
            cells: vec![blank; cols as usize],
        }
    }

    pub fn resize(&mut self, new_cols: u16, blank: CharInfo) {
        self.cells.resize(new_cols as usize, blank);
    }

    /// Characters of the row as a `String`, trailing blanks kept
    pub fn text(&self) -> String {
        char::decode_utf16(self.cells.iter().map(|c| c.ch))
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ScreenBuffer {
    pub rows: Vec<Row>,
    pub width: u16,
    pub height: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    pub cursor_size: u16,
    pub cursor_visible: bool,
    pub attr: u16,
    pub popup_attr: u16,
    pub window: SmallRect,
    pub max_width: u16,
    pub max_height: u16,
    pub font_width: u16,
    pub font_height: u16,
    pub color_map: [u32; 16],
    pub mode: u32,
}

impl ScreenBuffer {
    pub fn new(width: u16, height: u16) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let blank = CharInfo::default();
        Self {
            rows: (0..height).map(|_| Row::new(width, blank)).collect(),
            width,
            height,
            cursor_x: 0,
            cursor_y: 0,
            cursor_size: 25,
            cursor_visible: true,
            attr: FOREGROUND_WHITE,
            popup_attr: 0xf5,
            window: SmallRect::new(0, 0, width as i16 - 1, height as i16 - 1),
            max_width: width,
            max_height: height,
            font_width: 8,
            font_height: 16,
            color_map: DEFAULT_COLOR_MAP,
            mode: 0x3, // processed output, wrap at eol
        }
    }

    pub fn resize(&mut self, new_width: u16, new_height: u16) {
        let blank = CharInfo::new(b' ' as u16, self.attr);
        while self.rows.len() < new_height as usize {
            self.rows.push(Row::new(new_width, blank));
        }
        self.rows.truncate(new_height as usize);
        for row in &mut self.rows {
            row.resize(new_width, blank);
        }
        self.width = new_width;
        self.height = new_height;

        self.cursor_x = self.cursor_x.min(new_width - 1);
        self.cursor_y = self.cursor_y.min(new_height - 1);

        // Keep the window's extent if possible, shifting it back inside
        let w = self.window.width().min(new_width as i32);
        let h = self.window.height().min(new_height as i32);
        let left = (self.window.left as i32).min(new_width as i32 - w).max(0);
        let top = (self.window.top as i32).min(new_height as i32 - h).max(0);
        self.window = SmallRect::new(left as i16, top as i16, (left + w - 1) as i16, (top + h - 1) as i16);
    }

    fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn linear_index(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width as u32 || y >= self.height as u32 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    fn cell_at(&self, index: usize) -> &CharInfo {
        let w = self.width as usize;
        &self.rows[index / w].cells[index % w]
    }

    fn cell_at_mut(&mut self, index: usize) -> &mut CharInfo {
        let w = self.width as usize;
        &mut self.rows[index / w].cells[index % w]
    }

    pub fn cell(&self, x: u16, y: u16) -> Option<CharInfo> {
        self.rows.get(y as usize)?.cells.get(x as usize).copied()
    }

    /// Intersect a `width x height` rectangle at (x, y) with the buffer; the
    /// origin may be negative
    fn clip(&self, x: i32, y: i32, width: u32, height: u32) -> SmallRect {
        let coordinate = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        let mut rect = SmallRect::new(coordinate(x), coordinate(y), 0, 0);
        if width == 0 || height == 0 {
            rect.set_empty();
            return rect;
        }
        let left = x.max(0) as i64;
        let top = y.max(0) as i64;
        let right = (x as i64 + width as i64 - 1).min(self.width as i64 - 1);
        let bottom = (y as i64 + height as i64 - 1).min(self.height as i64 - 1);
        if left > right || top > bottom {
            rect.set_empty();
            return rect;
        }
        SmallRect::new(left as i16, top as i16, right as i16, bottom as i16)
    }

    /// Cells of a rectangle, row-major; the returned rectangle is the clipped extent
    pub fn read_rect(&self, x: i32, y: i32, width: u32, height: u32) -> (SmallRect, Vec<CharInfo>) {
        let rect = self.clip(x, y, width, height);
        if rect.is_empty() {
            return (rect, Vec::new());
        }
        let mut cells = Vec::with_capacity((rect.width() * rect.height()) as usize);
        for row in &self.rows[rect.top as usize..=rect.bottom as usize] {
            cells.extend_from_slice(&row.cells[rect.left as usize..=rect.right as usize]);
        }
        (rect, cells)
    }

    /// Store a row-major block of `width` columns placed at (x, y); returns
    /// the clipped extent written
    pub fn write_rect(&mut self, x: i32, y: i32, width: u32, cells: &[CharInfo]) -> SmallRect {
        let height = if width == 0 { 0 } else { cells.len() as u32 / width };
        let rect = self.clip(x, y, width, height);
        if rect.is_empty() {
            return rect;
        }
        let skip = (rect.left as i32 - x) as usize;
        let span = rect.width() as usize;
        for row in rect.top as usize..=rect.bottom as usize {
            let start = (row as i64 - y as i64) as usize * width as usize + skip;
            self.rows[row].cells[rect.left as usize..rect.left as usize + span]
                .copy_from_slice(&cells[start..start + span]);
        }
        rect
    }

    /// Read up to `count` characters or attributes from (x, y), continuing across rows
    pub fn read_linear(&self, mode: CharInfoMode, x: u32, y: u32, count: usize) -> Vec<u16> {
        let Some(start) = self.linear_index(x, y) else {
            return Vec::new();
        };
        let end = (start + count).min(self.cell_count());
        (start..end)
            .map(|i| {
                let cell = self.cell_at(i);
                match mode {
                    CharInfoMode::Attr => cell.attr,
                    _ => cell.ch,
                }
            })
            .collect()
    }

    /// Store characters or attributes from (x, y), continuing across rows;
    /// returns the number of cells written
    pub fn write_linear(&mut self, mode: CharInfoMode, x: u32, y: u32, values: &[u16]) -> u32 {
        let Some(start) = self.linear_index(x, y) else {
            return 0;
        };
        let end = (start + values.len()).min(self.cell_count());
        let attr = self.attr;
        for (i, value) in (start..end).zip(values) {
            let cell = self.cell_at_mut(i);
            match mode {
                CharInfoMode::Text => cell.ch = *value,
                CharInfoMode::Attr => cell.attr = *value,
                CharInfoMode::TextStdAttr => *cell = CharInfo::new(*value, attr),
                CharInfoMode::TextAttr => {}
            }
        }
        (end - start) as u32
    }

    /// Repeat one character/attribute from (x, y). Without wrap the run stops
    /// at the end of the starting row.
    pub fn fill(&mut self, mode: CharInfoMode, x: i32, y: i32, count: u32, wrap: bool, fill: CharInfo) -> u32 {
        if x < 0 || y < 0 {
            return 0;
        }
        let Some(start) = self.linear_index(x as u32, y as u32) else {
            return 0;
        };
        let limit = if wrap {
            self.cell_count()
        } else {
            (y as usize + 1) * self.width as usize
        };
        let end = (start + count as usize).min(limit);
        for i in start..end {
            let cell = self.cell_at_mut(i);
            match mode {
                CharInfoMode::Text => cell.ch = fill.ch,
                CharInfoMode::Attr => cell.attr = fill.attr,
                CharInfoMode::TextAttr | CharInfoMode::TextStdAttr => *cell = fill,
            }
        }
        (end - start) as u32
    }

    fn bounds(&self) -> SmallRect {
        SmallRect::new(0, 0, self.width as i16 - 1, self.height as i16 - 1)
    }

    /// Move a rectangle to a new origin; vacated cells inside the clip get the fill cell
    pub fn scroll(&mut self, params: &ScrollParams) -> KernelResult<()> {
        if params.scroll.is_inverted() {
            return Err(NtStatus::INVALID_PARAMETER);
        }
        let bounds = self.bounds();
        let Some(src) = intersect(&params.scroll, &bounds) else {
            return Err(NtStatus::INVALID_PARAMETER);
        };
        let Some(clip) = intersect(&params.clip, &bounds) else {
            return Ok(());
        };

        // Origin is relative to the requested rectangle, not the clipped one
        let dx = params.origin.x as i32 - params.scroll.left as i32;
        let dy = params.origin.y as i32 - params.scroll.top as i32;

        let snapshot: Vec<Row> = self.rows.clone();
        let dest = SmallRect::new(
            (src.left as i32 + dx).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            (src.top as i32 + dy).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            (src.right as i32 + dx).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            (src.bottom as i32 + dy).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        );

        for y in src.top..=src.bottom {
            for x in src.left..=src.right {
                if contains(&clip, x as i32, y as i32) && !contains(&dest, x as i32, y as i32) {
                    self.rows[y as usize].cells[x as usize] = params.fill;
                }
            }
        }
        for y in src.top..=src.bottom {
            for x in src.left..=src.right {
                let (tx, ty) = (x as i32 + dx, y as i32 + dy);
                if contains(&clip, tx, ty) {
                    self.rows[ty as usize].cells[tx as usize] = snapshot[y as usize].cells[x as usize];
                }
            }
        }
        Ok(())
    }

    pub fn info(&self) -> OutputInfo {
        OutputInfo {
            cursor_size: self.cursor_size as i16,
            cursor_visible: self.cursor_visible as i16,
            cursor_x: self.cursor_x as i16,
            cursor_y: self.cursor_y as i16,
            width: self.width as i16,
            height: self.height as i16,
            attr: self.attr as i16,
            popup_attr: self.popup_attr as i16,
            win_left: self.window.left,
            win_top: self.window.top,
            win_right: self.window.right,
            win_bottom: self.window.bottom,
            max_width: self.max_width as i16,
            max_height: self.max_height as i16,
            font_width: self.font_width as i16,
            font_height: self.font_height as i16,
            color_map: self.color_map,
        }
    }

    /// Apply the fields selected by `mask`; nothing changes on rejection
    pub fn set_info(&mut self, mask: OutputInfoMask, info: &OutputInfo) -> KernelResult<()> {
        let mut next = self.clone();

        if mask.contains(OutputInfoMask::SIZE) {
            if info.width <= 0 || info.height <= 0 {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            next.resize(info.width as u16, info.height as u16);
        }
        if mask.contains(OutputInfoMask::CURSOR_GEOM) {
            if !(1..=100).contains(&info.cursor_size) {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            next.cursor_size = info.cursor_size as u16;
            next.cursor_visible = info.cursor_visible != 0;
        }
        if mask.contains(OutputInfoMask::CURSOR_POS) {
            if info.cursor_x < 0
                || info.cursor_y < 0
                || info.cursor_x as u16 >= next.width
                || info.cursor_y as u16 >= next.height
            {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            next.cursor_x = info.cursor_x as u16;
            next.cursor_y = info.cursor_y as u16;
        }
        if mask.contains(OutputInfoMask::ATTR) {
            next.attr = info.attr as u16;
        }
        if mask.contains(OutputInfoMask::POPUP_ATTR) {
            next.popup_attr = info.popup_attr as u16;
        }
        if mask.contains(OutputInfoMask::DISPLAY_WINDOW) {
            let window = SmallRect::new(info.win_left, info.win_top, info.win_right, info.win_bottom);
            if window.is_inverted()
                || window.left < 0
                || window.top < 0
                || window.right as i32 >= next.width as i32
                || window.bottom as i32 >= next.height as i32
            {
                return Err(NtStatus::INVALID_PARAMETER);
            }
            next.window = window;
        }
        if mask.contains(OutputInfoMask::MAX_SIZE) {
            next.max_width = info.max_width.max(0) as u16;
            next.max_height = info.max_height.max(0) as u16;
        }
        if mask.contains(OutputInfoMask::FONT) {
            next.font_width = info.font_width.max(0) as u16;
            next.font_height = info.font_height.max(0) as u16;
        }
        if mask.contains(OutputInfoMask::COLORTABLE) {
            next.color_map = info.color_map;
        }

        *self = next;
        Ok(())
    }
}

fn intersect(a: &SmallRect, b: &SmallRect) -> Option<SmallRect> {
    let rect = SmallRect::new(
        a.left.max(b.left),
        a.top.max(b.top),
        a.right.min(b.right),
        a.bottom.min(b.bottom),
    );
    (!rect.is_inverted()).then_some(rect)
}

fn contains(rect: &SmallRect, x: i32, y: i32) -> bool {
    x >= rect.left as i32 && x <= rect.right as i32 && y >= rect.top as i32 && y <= rect.bottom as i32
}
