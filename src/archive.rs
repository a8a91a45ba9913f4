//! The archival procedure (spec §4.C.3 / §4.E): rename the active log file
//! aside, seed a fresh successor, and stream back the tail of records that
//! must survive the rotation. Implemented as a free function rather than a
//! `LogFile` method to keep the rotation's multi-step nature visible at the
//! call site, the way the teacher keeps segment rotation (`segment.rs`)
//! separate from the commitlog's steady-state append path.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::Utc;

use crate::actor::ActorError;
use crate::codec;
use crate::logfile::LogFile;

const COPY_CHUNK: usize = 4096;

/// Rotates `log`'s file aside and reseeds a fresh one starting at `upto`,
/// retaining every record strictly after `upto`.
pub fn archive(log: &mut LogFile, upto: u32) -> Result<(), ActorError> {
    log.counters.archives += 1;
    let result = archive_inner(log, upto);
    if result.is_err() {
        log.counters.errs += 1;
    }
    result
}

fn archive_inner(log: &mut LogFile, upto: u32) -> Result<(), ActorError> {
    if log.descriptors.is_empty() {
        return Err(ActorError::EmptyLog);
    }
    if upto == 0 {
        return Err(ActorError::NoUpto);
    }

    let mut ndx = codec::find_first_ge(&log.descriptors, upto);
    let effective_upto = if ndx >= log.descriptors.len() {
        // Asked to archive past the end: retain nothing.
        log.lastmsg
    } else {
        if log.descriptors[ndx].num == upto {
            ndx += 1; // retain strictly after `upto`, not `upto` itself
        }
        upto
    };
    let retain_from = log.descriptors.get(ndx).map(|d| d.offset);

    let archived_path = archived_path_for(&log.path);
    fs::rename(&log.path, &archived_path)?;

    let mut new_file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(&log.path)?;
    write!(new_file, "{}{}", codec::DB_MAGIC, effective_upto)?;

    if let Some(offset) = retain_from {
        let mut old_file = File::open(&archived_path)?;
        old_file.seek(SeekFrom::Start(offset))?;
        new_file.seek(SeekFrom::End(0))?;
        copy_tail(&mut old_file, &mut new_file)?;
    }

    let data = fs::read(&log.path)?;
    let (lastmsg, descriptors) = codec::scan(&data)?;
    log.file = OpenOptions::new().read(true).write(true).open(&log.path)?;
    log.size = data.len() as u64;
    log.lastmsg = lastmsg;
    log.descriptors = descriptors;
    Ok(())
}

fn copy_tail(src: &mut File, dst: &mut File) -> io::Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}

fn archived_path_for(path: &Path) -> std::path::PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("log");
    let ts = Utc::now().to_rfc3339().replace(':', "_");
    path.with_file_name(format!("--{name}--{ts}"))
}
