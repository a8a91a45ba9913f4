//! On-disk framing for a log file: the `KAF_DB` header and the `KAF_MSG`
//! record frames, plus the pure decode/scan routines used to recover a
//! log's descriptor list from disk.
//!
//! Nothing in this module touches a file handle directly; callers hand it
//! byte windows they've already read (see [`crate::logfile`]), which keeps
//! the framing rules testable without a filesystem.

use thiserror::Error;

pub const DB_MAGIC: &str = "KAF_DB|v1|";
pub const MSG_MAGIC: &str = "KAF_MSG|";

/// `\nKAF_MSG|` (9 bytes) plus two u32 decimal fields and their delimiters
/// (10 + 1 + 10 + 1) comfortably fits in 32 bytes.
pub const MAX_HEADER_WINDOW: usize = 32;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("missing or malformed KAF_DB header")]
    BadDbHeader,
    #[error("no record at offset")]
    NoRecord,
    #[error("malformed record header at offset {offset}")]
    BadRecordHeader { offset: u64 },
    #[error("record header not terminated within {} bytes", MAX_HEADER_WINDOW)]
    Unterminated,
    #[error("record numbers did not increase: expected greater than {prev}, got {got}")]
    NotMonotonic { prev: u32, got: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub num: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub num: u32,
    pub payload: Vec<u8>,
}

/// A decoded record frame. `start`/`header_len` are byte offsets relative to
/// the window the caller decoded, not absolute file offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeader {
    pub start: u64,
    pub header_len: u64,
    pub num: u32,
    pub sz: u32,
}

/// Parses the DB header occupying the start of a log file: `KAF_DB|v1|`
/// followed by the ASCII starting sequence number, running to the first
/// `\n` or end of buffer.
///
/// Returns the starting number and the header's byte length, including its
/// terminating `\n` if the buffer continues past it.
pub fn parse_db_header(bytes: &[u8]) -> Result<(u32, usize), CodecError> {
    if !bytes.starts_with(DB_MAGIC.as_bytes()) {
        return Err(CodecError::BadDbHeader);
    }
    let rest = &bytes[DB_MAGIC.len()..];
    let end = rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(CodecError::BadDbHeader);
    }
    let num: u32 = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CodecError::BadDbHeader)?;
    let header_len = DB_MAGIC.len() + end + usize::from(end < rest.len());
    Ok((num, header_len))
}

/// Decodes a single record frame from a window of up to [`MAX_HEADER_WINDOW`]
/// bytes, per spec: skip leading newlines to find the `K` of `KAF_MSG`, the
/// newline just before it is the frame's true start.
pub fn decode_header(window: &[u8]) -> Result<DecodedHeader, CodecError> {
    let skip = window.iter().take_while(|&&b| b == b'\n').count();
    if skip == window.len() {
        return Err(CodecError::NoRecord);
    }
    if skip == 0 || window[skip] != b'K' {
        return Err(CodecError::BadRecordHeader { offset: 0 });
    }
    let start = skip - 1;
    let prefix = format!("\n{MSG_MAGIC}");
    if !window[start..].starts_with(prefix.as_bytes()) {
        return Err(CodecError::BadRecordHeader { offset: start as u64 });
    }

    let mut pos = start + prefix.len();
    let num_start = pos;
    while pos < window.len() && window[pos] != b'|' {
        if !window[pos].is_ascii_digit() {
            return Err(CodecError::BadRecordHeader { offset: start as u64 });
        }
        pos += 1;
    }
    if pos == window.len() || pos == num_start {
        return Err(CodecError::Unterminated);
    }
    let num: u32 = parse_u32(&window[num_start..pos]).ok_or(CodecError::BadRecordHeader { offset: start as u64 })?;
    pos += 1; // consume '|'

    let sz_start = pos;
    while pos < window.len() && window[pos] != b'\n' {
        if window[pos] == b'|' || !window[pos].is_ascii_digit() {
            return Err(CodecError::BadRecordHeader { offset: start as u64 });
        }
        pos += 1;
    }
    if pos == window.len() || pos == sz_start {
        return Err(CodecError::Unterminated);
    }
    let sz: u32 = parse_u32(&window[sz_start..pos]).ok_or(CodecError::BadRecordHeader { offset: start as u64 })?;
    let header_end = pos + 1; // consume terminating '\n'

    Ok(DecodedHeader {
        start: start as u64,
        header_len: (header_end - start) as u64,
        num,
        sz,
    })
}

fn parse_u32(digits: &[u8]) -> Option<u32> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Rebuilds the descriptor list and `lastmsg` of a log from its full file
/// contents. See spec §4.A "Scan operation".
pub fn scan(data: &[u8]) -> Result<(u32, Vec<Descriptor>), CodecError> {
    let (mut lastmsg, header_len) = parse_db_header(data)?;
    let len = data.len() as u64;
    let mut cursor = header_len as u64;
    let mut descriptors = Vec::new();

    while cursor < len {
        let window_end = (cursor + MAX_HEADER_WINDOW as u64).min(len) as usize;
        let window = &data[cursor as usize..window_end];
        let decoded = decode_header(window)?;
        let rec_start = cursor + decoded.start;
        if rec_start != cursor {
            return Err(CodecError::BadRecordHeader { offset: rec_start });
        }
        if decoded.num > 0 {
            if decoded.num <= lastmsg {
                return Err(CodecError::NotMonotonic {
                    prev: lastmsg,
                    got: decoded.num,
                });
            }
            descriptors.push(Descriptor {
                num: decoded.num,
                offset: rec_start,
            });
            lastmsg = decoded.num;
        }
        cursor = rec_start + decoded.header_len + decoded.sz as u64;
    }

    Ok((lastmsg, descriptors))
}

/// Binary search for the first descriptor with `num >= target`. Empty list
/// and out-of-range targets return `0` / `len()` respectively.
pub fn find_first_ge(descriptors: &[Descriptor], target: u32) -> usize {
    descriptors.partition_point(|d| d.num < target)
}
