//! Text transcoding fast paths
//!
//! UTF-16 to UTF-8 and UTF-16 to ASCII encoders operating directly on
//! buffer storage, plus the matching decoder. Validation on the decode side
//! goes through `simdutf8` (up to 23x faster than std on valid non-ASCII
//! input on x86-64).
//!
//! Malformed surrogates follow the replacement convention: an unpaired high
//! surrogate, a lone low surrogate, or a pair truncated at end of input
//! each encode as a single `0x3F` (`?`) and processing continues at the
//! next code unit.

use crate::buffer::ByteBuf;
use crate::error::Result;

/// Replacement byte for malformed surrogates and non-ASCII units
const REPLACEMENT: u8 = 0x3F;

/// Outcome of a transcoding pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStatus {
    /// All input consumed
    Done,
    /// Output filled; `consumed`/`written` point at the last fully encoded
    /// code unit, the caller grows and re-invokes on the remainder
    DestinationTooSmall,
    /// Input is malformed beyond repair
    InvalidData,
    /// Input ends mid-sequence; feed more and re-invoke
    NeedMoreData,
}

/// Transcoding result: status plus progress counters
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub status: TransformStatus,
    /// Code units consumed from the source
    pub consumed: usize,
    /// Bytes written to the destination
    pub written: usize,
}

impl Transform {
    fn new(status: TransformStatus, consumed: usize, written: usize) -> Self {
        Self {
            status,
            consumed,
            written,
        }
    }
}

/// Target encoding for [`decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Ascii,
}

/// Encode UTF-16 code units as UTF-8 into `dst`
///
/// Stops at the last fully encoded unit when `dst` runs out.
pub fn encode_utf8(src: &[u16], dst: &mut [u8]) -> Transform {
    let mut si = 0;
    let mut di = 0;
    while si < src.len() {
        let unit = src[si];
        if unit < 0x80 {
            if di + 1 > dst.len() {
                return Transform::new(TransformStatus::DestinationTooSmall, si, di);
            }
            dst[di] = unit as u8;
            di += 1;
            si += 1;
        } else if unit < 0x800 {
            if di + 2 > dst.len() {
                return Transform::new(TransformStatus::DestinationTooSmall, si, di);
            }
            dst[di] = 0xC0 | (unit >> 6) as u8;
            dst[di + 1] = 0x80 | (unit & 0x3F) as u8;
            di += 2;
            si += 1;
        } else if !(0xD800..=0xDFFF).contains(&unit) {
            if di + 3 > dst.len() {
                return Transform::new(TransformStatus::DestinationTooSmall, si, di);
            }
            dst[di] = 0xE0 | (unit >> 12) as u8;
            dst[di + 1] = 0x80 | ((unit >> 6) & 0x3F) as u8;
            dst[di + 2] = 0x80 | (unit & 0x3F) as u8;
            di += 3;
            si += 1;
        } else if unit >= 0xDC00 {
            // lone low surrogate
            if di + 1 > dst.len() {
                return Transform::new(TransformStatus::DestinationTooSmall, si, di);
            }
            dst[di] = REPLACEMENT;
            di += 1;
            si += 1;
        } else {
            // high surrogate; look for its partner
            let low = src.get(si + 1).copied();
            match low {
                Some(low) if (0xDC00..=0xDFFF).contains(&low) => {
                    if di + 4 > dst.len() {
                        return Transform::new(TransformStatus::DestinationTooSmall, si, di);
                    }
                    let cp = 0x10000u32
                        + (((unit as u32 - 0xD800) << 10) | (low as u32 - 0xDC00));
                    dst[di] = 0xF0 | (cp >> 18) as u8;
                    dst[di + 1] = 0x80 | ((cp >> 12) & 0x3F) as u8;
                    dst[di + 2] = 0x80 | ((cp >> 6) & 0x3F) as u8;
                    dst[di + 3] = 0x80 | (cp & 0x3F) as u8;
                    di += 4;
                    si += 2;
                }
                // unpaired high (followed by non-low, or truncated at end)
                _ => {
                    if di + 1 > dst.len() {
                        return Transform::new(TransformStatus::DestinationTooSmall, si, di);
                    }
                    dst[di] = REPLACEMENT;
                    di += 1;
                    si += 1;
                }
            }
        }
    }
    Transform::new(TransformStatus::Done, si, di)
}

/// Encode UTF-16 code units as ASCII into `dst`; units above 0x7F map to
/// `?`
pub fn encode_ascii(src: &[u16], dst: &mut [u8]) -> Transform {
    let mut di = 0;
    for (si, &unit) in src.iter().enumerate() {
        if di + 1 > dst.len() {
            return Transform::new(TransformStatus::DestinationTooSmall, si, di);
        }
        dst[di] = if unit <= 0x7F {
            unit as u8
        } else {
            REPLACEMENT
        };
        di += 1;
    }
    Transform::new(TransformStatus::Done, src.len(), di)
}

/// Exact UTF-8 byte length `src` will encode to, replacements included
fn utf8_encoded_len(src: &[u16]) -> usize {
    let mut si = 0;
    let mut len = 0;
    while si < src.len() {
        let unit = src[si];
        if unit < 0x80 {
            len += 1;
            si += 1;
        } else if unit < 0x800 {
            len += 2;
            si += 1;
        } else if !(0xD800..=0xDFFF).contains(&unit) {
            len += 3;
            si += 1;
        } else if unit >= 0xDC00 {
            len += 1;
            si += 1;
        } else {
            match src.get(si + 1) {
                Some(&low) if (0xDC00..=0xDFFF).contains(&low) => {
                    len += 4;
                    si += 2;
                }
                _ => {
                    len += 1;
                    si += 1;
                }
            }
        }
    }
    len
}

/// Append `src` to `buf` as UTF-8 at the writer index, growing as needed
///
/// Returns the number of bytes written.
pub fn write_utf8(buf: &mut ByteBuf, src: &[u16]) -> Result<usize> {
    let needed = utf8_encoded_len(src);
    buf.ensure_writable(needed)?;
    let t = encode_utf8(src, buf.writable_slice()?);
    debug_assert_eq!(t.status, TransformStatus::Done);
    let writer = buf.writer_index();
    buf.set_writer_index(writer + t.written)?;
    Ok(t.written)
}

/// Append `src` to `buf` as ASCII at the writer index, growing as needed
pub fn write_ascii(buf: &mut ByteBuf, src: &[u16]) -> Result<usize> {
    buf.ensure_writable(src.len())?;
    let t = encode_ascii(src, buf.writable_slice()?);
    debug_assert_eq!(t.status, TransformStatus::Done);
    let writer = buf.writer_index();
    buf.set_writer_index(writer + t.written)?;
    Ok(t.written)
}

/// Decode `[index, index + len)` of `buf` into a string
///
/// Zero-length input yields the empty string. Invalid UTF-8 falls back to
/// lossy replacement; ASCII maps high bytes to `?`.
pub fn decode(buf: &ByteBuf, index: usize, len: usize, encoding: TextEncoding) -> Result<String> {
    buf.check_accessible()?;
    if len == 0 {
        return Ok(String::new());
    }
    let mut bytes = vec![0u8; len];
    buf.get_bytes(index, &mut bytes)?;
    match encoding {
        TextEncoding::Utf8 => {
            if simdutf8::basic::from_utf8(&bytes).is_ok() {
                // SAFETY: validated just above
                Ok(unsafe { String::from_utf8_unchecked(bytes) })
            } else {
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
        }
        TextEncoding::Ascii => Ok(bytes
            .iter()
            .map(|&b| if b <= 0x7F { b as char } else { '?' })
            .collect()),
    }
}
