//! A single log's open handle, cached descriptor list, and activity
//! counters (spec §4.B). Every method here performs real file I/O; it is
//! only ever called from the log's owning actor task (`crate::actor`),
//! which is what makes the lack of internal locking sound.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{self, decode_header, scan, CodecError, Descriptor, Record, MAX_HEADER_WINDOW};

/// Maximum records returned by a single `Get`.
pub const GET_MAX_RECORDS: usize = 5;
/// Stop accumulating once the returned payload bytes reach this many,
/// unless it's the very first record (always returned in full).
pub const GET_MAX_BYTES: usize = 3200;

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] CodecError),
    #[error("record {expected} header claims num {actual}")]
    NumMismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub gets: u64,
    pub puts: u64,
    pub archives: u64,
    pub errs: u64,
}

pub struct LogFile {
    pub name: String,
    pub path: PathBuf,
    pub(crate) file: File,
    pub(crate) size: u64,
    pub(crate) lastmsg: u32,
    pub(crate) descriptors: Vec<Descriptor>,
    pub counters: Counters,
}

fn db_header_len(start_num: u32) -> u64 {
    (codec::DB_MAGIC.len() + start_num.to_string().len()) as u64
}

fn create_db_file(path: &Path, start_num: u32) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(path)?;
    write!(file, "{}{}", codec::DB_MAGIC, start_num)?;
    Ok(file)
}

/// Reads up to `buf.len()` bytes starting wherever the file cursor is,
/// stopping early only at EOF (as opposed to a single short `read`).
fn read_window(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

impl LogFile {
    /// Creates a brand new, empty log file at `path` with a DB header
    /// carrying `start_num` as the initial `lastmsg`.
    pub fn create(path: PathBuf, name: String, start_num: u32) -> io::Result<Self> {
        let file = create_db_file(&path, start_num)?;
        Ok(Self {
            name,
            path,
            file,
            size: db_header_len(start_num),
            lastmsg: start_num,
            descriptors: Vec::new(),
            counters: Counters::default(),
        })
    }

    /// Opens an existing log file and rebuilds its descriptor cache from
    /// disk (spec §4.A "Scan operation").
    pub fn open_and_scan(path: PathBuf, name: String) -> Result<Self, LogFileError> {
        let data = std::fs::read(&path)?;
        let (lastmsg, descriptors) = scan(&data)?;
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            name,
            path,
            file,
            size: data.len() as u64,
            lastmsg,
            descriptors,
            counters: Counters::default(),
        })
    }

    pub fn lastmsg(&self) -> u32 {
        self.lastmsg
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Reads the window of records starting at `from` (spec §4.C.1).
    pub fn get(&mut self, from: u32) -> Result<Vec<Record>, LogFileError> {
        self.counters.gets += 1;
        let result = self.get_inner(from);
        if result.is_err() {
            self.counters.errs += 1;
        }
        result
    }

    fn get_inner(&mut self, from: u32) -> Result<Vec<Record>, LogFileError> {
        let ndx = codec::find_first_ge(&self.descriptors, from);
        let mut out = Vec::new();
        let mut total = 0usize;
        for desc in self.descriptors[ndx..].iter().take(GET_MAX_RECORDS) {
            let record = self.read_record(*desc)?;
            total += record.payload.len();
            out.push(record);
            if total >= GET_MAX_BYTES {
                break;
            }
        }
        Ok(out)
    }

    fn read_record(&mut self, desc: Descriptor) -> Result<Record, LogFileError> {
        self.file.seek(SeekFrom::Start(desc.offset))?;
        let mut window = [0u8; MAX_HEADER_WINDOW];
        let window_len = read_window(&mut self.file, &mut window)?;
        let decoded = decode_header(&window[..window_len])?;
        if decoded.start != 0 {
            return Err(LogFileError::Decode(CodecError::BadRecordHeader { offset: desc.offset }));
        }
        if decoded.num != desc.num {
            return Err(LogFileError::NumMismatch {
                expected: desc.num,
                actual: decoded.num,
            });
        }
        let payload_offset = desc.offset + decoded.header_len;
        self.file.seek(SeekFrom::Start(payload_offset))?;
        let mut payload = vec![0u8; decoded.sz as usize];
        self.file.read_exact(&mut payload)?;
        Ok(Record { num: decoded.num, payload })
    }

    /// Appends a new record (spec §4.C.2). Refreshes from disk first if the
    /// file was modified externally since the last operation.
    pub fn put(&mut self, data: &[u8]) -> Result<u32, LogFileError> {
        self.counters.puts += 1;
        let result = self.put_inner(data);
        if result.is_err() {
            self.counters.errs += 1;
        }
        result
    }

    fn put_inner(&mut self, data: &[u8]) -> Result<u32, LogFileError> {
        self.refresh_if_changed()?;

        let num = self.lastmsg + 1;
        let off = self.size;
        let header = format!("\n{}{}|{}\n", codec::MSG_MAGIC, num, data.len());

        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(header.as_bytes())?;
        self.file.write_all(data)?;

        self.descriptors.push(Descriptor { num, offset: off });
        self.lastmsg = num;
        self.size = off + header.len() as u64 + data.len() as u64;
        Ok(num)
    }

    /// Tolerates human edits between writes: if the file's size on disk no
    /// longer matches the cache, recreate (if missing) or rescan it.
    fn refresh_if_changed(&mut self) -> Result<(), LogFileError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() == self.size => Ok(()),
            Ok(_) => self.reload(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.file = create_db_file(&self.path, 0)?;
                self.size = db_header_len(0);
                self.lastmsg = 0;
                self.descriptors.clear();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reload(&mut self) -> Result<(), LogFileError> {
        let data = std::fs::read(&self.path)?;
        let (lastmsg, descriptors) = scan(&data)?;
        self.lastmsg = lastmsg;
        self.descriptors = descriptors;
        self.size = data.len() as u64;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Ok(())
    }

    /// Snapshots and resets the four activity counters (spec §4.C.4).
    pub fn take_counters(&mut self) -> Counters {
        std::mem::take(&mut self.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn empty_log_put_matches_spec_example() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo");
        let mut log = LogFile::create(path.clone(), "foo".into(), 0).unwrap();

        let num = log.put(b"Hello").unwrap();
        assert_eq!(num, 1);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, b"KAF_DB|v1|0\nKAF_MSG|1|5\nHello");
    }

    #[test]
    fn monotonic_gets_return_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bar");
        let mut log = LogFile::create(path, "bar".into(), 0).unwrap();
        log.put(b"A").unwrap();
        log.put(b"BB").unwrap();
        log.put(b"CCC").unwrap();

        let records = log.get(1).unwrap();
        let payloads: Vec<&[u8]> = records.iter().map(|r| r.payload.as_slice()).collect();
        assert_eq!(payloads, vec![b"A".as_slice(), b"BB", b"CCC"]);
        assert_eq!(log.lastmsg(), 3);
    }

    #[test]
    fn window_bounded_by_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("baz");
        let mut log = LogFile::create(path, "baz".into(), 0).unwrap();
        for b in b"abcdef" {
            log.put(&[*b]).unwrap();
        }

        let first = log.get(1).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first.last().unwrap().num, 5);

        let second = log.get(6).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"f");
    }

    #[test]
    fn window_bounded_by_bytes_always_returns_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big");
        let mut log = LogFile::create(path, "big".into(), 0).unwrap();
        log.put(&vec![b'x'; 4000]).unwrap();
        log.put(b"0123456789").unwrap();

        let first = log.get(1).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload.len(), 4000);

        let second = log.get(2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"0123456789");
    }

    #[test]
    fn truncation_to_a_record_boundary_resumes_correctly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trunc");
        let cutoff = {
            let mut log = LogFile::create(path.clone(), "trunc".into(), 0).unwrap();
            log.put(b"one").unwrap();
            let cutoff = log.size;
            log.put(b"two").unwrap();
            cutoff
        };

        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(cutoff).unwrap();
        drop(file);

        let mut log = LogFile::open_and_scan(path, "trunc".into()).unwrap();
        assert_eq!(log.lastmsg(), 1);
        let num = log.put(b"three").unwrap();
        assert_eq!(num, 2);
    }
}
