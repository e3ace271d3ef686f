//! Codepage transcoding between a process's narrow codepage and UTF-16
//!
//! Single-character conversions never fail: a character with no mapping in
//! the active codepage degrades to `?` (narrow) or U+FFFD (wide). Input
//! operations use the input codepage, output and display operations the
//! output codepage; the caller picks which one to pass in.

use crate::core::types::{CharInfo, InputRecord};

pub const CP_ACP: u32 = 0;
pub const CP_OEM_US: u32 = 437;
pub const CP_WINDOWS_1252: u32 = 1252;
pub const CP_US_ASCII: u32 = 20127;
pub const CP_LATIN1: u32 = 28591;
pub const CP_UTF8: u32 = 65001;

/// Default narrow replacement
const DEFAULT_CHAR: u8 = b'?';
/// Default wide replacement
const REPLACEMENT: u16 = 0xFFFD;

/// CP437 upper half (0x80..=0xFF)
const CP437_HIGH: [u16; 128] = [
    0x00C7, 0x00FC, 0x00E9, 0x00E2, 0x00E4, 0x00E0, 0x00E5, 0x00E7, 0x00EA, 0x00EB, 0x00E8, 0x00EF,
    0x00EE, 0x00EC, 0x00C4, 0x00C5, 0x00C9, 0x00E6, 0x00C6, 0x00F4, 0x00F6, 0x00F2, 0x00FB, 0x00F9,
    0x00FF, 0x00D6, 0x00DC, 0x00A2, 0x00A3, 0x00A5, 0x20A7, 0x0192, 0x00E1, 0x00ED, 0x00F3, 0x00FA,
    0x00F1, 0x00D1, 0x00AA, 0x00BA, 0x00BF, 0x2310, 0x00AC, 0x00BD, 0x00BC, 0x00A1, 0x00AB, 0x00BB,
    0x2591, 0x2592, 0x2593, 0x2502, 0x2524, 0x2561, 0x2562, 0x2556, 0x2555, 0x2563, 0x2551, 0x2557,
    0x255D, 0x255C, 0x255B, 0x2510, 0x2514, 0x2534, 0x252C, 0x251C, 0x2500, 0x253C, 0x255E, 0x255F,
    0x255A, 0x2554, 0x2569, 0x2566, 0x2560, 0x2550, 0x256C, 0x2567, 0x2568, 0x2564, 0x2565, 0x2559,
    0x2558, 0x2552, 0x2553, 0x256B, 0x256A, 0x2518, 0x250C, 0x2588, 0x2584, 0x258C, 0x2590, 0x2580,
    0x03B1, 0x00DF, 0x0393, 0x03C0, 0x03A3, 0x03C3, 0x00B5, 0x03C4, 0x03A6, 0x0398, 0x03A9, 0x03B4,
    0x221E, 0x03C6, 0x03B5, 0x2229, 0x2261, 0x00B1, 0x2265, 0x2264, 0x2320, 0x2321, 0x00F7, 0x2248,
    0x00B0, 0x2219, 0x00B7, 0x221A, 0x207F, 0x00B2, 0x25A0, 0x00A0,
];

/// CP1252 0x80..=0x9F; undefined slots map to the C1 control of the same value
const CP1252_C1: [u16; 32] = [
    0x20AC, 0x0081, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0x008D, 0x017D, 0x008F, 0x0090, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014,
    0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x009D, 0x017E, 0x0178,
];

/// A narrow codepage with its conversion rules
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codepage {
    Oem437,
    Windows1252,
    Ascii,
    Latin1,
    Utf8,
    /// Delegated to the operating system
    #[cfg(windows)]
    Native(u32),
}

impl Codepage {
    /// Resolve a codepage id; 0 (`CP_ACP`) means the ANSI codepage
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            CP_ACP | CP_WINDOWS_1252 => Some(Codepage::Windows1252),
            CP_OEM_US => Some(Codepage::Oem437),
            CP_US_ASCII => Some(Codepage::Ascii),
            CP_LATIN1 => Some(Codepage::Latin1),
            CP_UTF8 => Some(Codepage::Utf8),
            #[cfg(windows)]
            other if native::is_valid(other) => Some(Codepage::Native(other)),
            _ => None,
        }
    }

    /// Like [`from_id`](Self::from_id) but unknown ids fall back to ANSI
    pub fn or_ansi(id: u32) -> Self {
        Self::from_id(id).unwrap_or(Codepage::Windows1252)
    }

    pub fn id(self) -> u32 {
        match self {
            Codepage::Oem437 => CP_OEM_US,
            Codepage::Windows1252 => CP_WINDOWS_1252,
            Codepage::Ascii => CP_US_ASCII,
            Codepage::Latin1 => CP_LATIN1,
            Codepage::Utf8 => CP_UTF8,
            #[cfg(windows)]
            Codepage::Native(id) => id,
        }
    }

    /// Narrow byte to UTF-16 unit
    pub fn decode_char(self, byte: u8) -> u16 {
        if byte < 0x80 {
            return byte as u16;
        }
        match self {
            Codepage::Oem437 => CP437_HIGH[(byte - 0x80) as usize],
            Codepage::Windows1252 if byte < 0xA0 => CP1252_C1[(byte - 0x80) as usize],
            Codepage::Windows1252 | Codepage::Latin1 => byte as u16,
            Codepage::Ascii => DEFAULT_CHAR as u16,
            Codepage::Utf8 => REPLACEMENT,
            #[cfg(windows)]
            Codepage::Native(id) => native::decode(id, &[byte]).first().copied().unwrap_or(REPLACEMENT),
        }
    }

    /// UTF-16 unit to narrow byte, `?` when unmappable
    pub fn encode_char(self, ch: u16) -> u8 {
        if ch < 0x80 {
            return ch as u8;
        }
        match self {
            Codepage::Oem437 => CP437_HIGH
                .iter()
                .position(|&c| c == ch)
                .map(|i| 0x80 + i as u8)
                .unwrap_or(DEFAULT_CHAR),
            Codepage::Windows1252 => {
                if (0xA0..=0xFF).contains(&ch) {
                    ch as u8
                } else {
                    CP1252_C1
                        .iter()
                        .position(|&c| c == ch)
                        .map(|i| 0x80 + i as u8)
                        .unwrap_or(DEFAULT_CHAR)
                }
            }
            Codepage::Latin1 if ch <= 0xFF => ch as u8,
            Codepage::Latin1 | Codepage::Ascii | Codepage::Utf8 => DEFAULT_CHAR,
            #[cfg(windows)]
            Codepage::Native(id) => native::encode(id, &[ch]).first().copied().unwrap_or(DEFAULT_CHAR),
        }
    }

    /// Narrow string to UTF-16
    pub fn decode(self, bytes: &[u8]) -> Vec<u16> {
        match self {
            Codepage::Utf8 => String::from_utf8_lossy(bytes).encode_utf16().collect(),
            #[cfg(windows)]
            Codepage::Native(id) => native::decode(id, bytes),
            _ => bytes.iter().map(|&b| self.decode_char(b)).collect(),
        }
    }

    /// UTF-16 to narrow string
    pub fn encode(self, wide: &[u16]) -> Vec<u8> {
        match self {
            Codepage::Utf8 => String::from_utf16_lossy(wide).into_bytes(),
            #[cfg(windows)]
            Codepage::Native(id) => native::encode(id, wide),
            _ => wide.iter().map(|&c| self.encode_char(c)).collect(),
        }
    }
}

/// Whether `id` names a codepage this process can transcode
pub fn is_valid(id: u32) -> bool {
    id != CP_ACP && Codepage::from_id(id).is_some()
}

/// Map key-event characters of wide records to narrow, in place
pub fn input_records_to_narrow(cp: Codepage, records: &mut [InputRecord]) {
    for record in records.iter_mut() {
        if let Some(ch) = record.key_char() {
            record.set_key_char(cp.encode_char(ch) as u16);
        }
    }
}

/// Map key-event characters of narrow records to wide, in place
pub fn input_records_to_wide(cp: Codepage, records: &mut [InputRecord]) {
    for record in records.iter_mut() {
        if let Some(ch) = record.key_char() {
            record.set_key_char(cp.decode_char(ch as u8));
        }
    }
}

/// Map cell characters to narrow, in place
pub fn char_infos_to_narrow(cp: Codepage, cells: &mut [CharInfo]) {
    for cell in cells.iter_mut() {
        cell.ch = cp.encode_char(cell.ch) as u16;
    }
}

/// Map cell characters to wide, in place
pub fn char_infos_to_wide(cp: Codepage, cells: &mut [CharInfo]) {
    for cell in cells.iter_mut() {
        cell.ch = cp.decode_char(cell.ch as u8);
    }
}

#[cfg(windows)]
mod native {
    use windows::core::PCSTR;
    use windows::Win32::Globalization::{
        IsValidCodePage, MultiByteToWideChar, WideCharToMultiByte, MULTI_BYTE_TO_WIDE_CHAR_FLAGS,
    };

    pub fn is_valid(id: u32) -> bool {
        unsafe { IsValidCodePage(id).as_bool() }
    }

    pub fn decode(id: u32, bytes: &[u8]) -> Vec<u16> {
        if bytes.is_empty() {
            return Vec::new();
        }
        unsafe {
            let len = MultiByteToWideChar(id, MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0), bytes, None);
            if len <= 0 {
                return Vec::new();
            }
            let mut wide = vec![0u16; len as usize];
            let len = MultiByteToWideChar(id, MULTI_BYTE_TO_WIDE_CHAR_FLAGS(0), bytes, Some(&mut wide));
            wide.truncate(len.max(0) as usize);
            wide
        }
    }

    pub fn encode(id: u32, wide: &[u16]) -> Vec<u8> {
        if wide.is_empty() {
            return Vec::new();
        }
        unsafe {
            let len = WideCharToMultiByte(id, 0, wide, None, PCSTR::null(), None);
            if len <= 0 {
                return Vec::new();
            }
            let mut bytes = vec![0u8; len as usize];
            let len = WideCharToMultiByte(id, 0, wide, Some(&mut bytes), PCSTR::null(), None);
            bytes.truncate(len.max(0) as usize);
            bytes
        }
    }
}
