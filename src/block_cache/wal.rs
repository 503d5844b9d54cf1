/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The write-ahead log that makes the block cache recoverable across restarts.
//!
//! Every block accepted into the cache is appended here as a [`WalRecord`], together with the
//! witness list in force at the block. A restarting replica replays the records through the same
//! path as received blocks, but checks them against the *recorded* witness lists rather than the
//! live one, since schedule changes are deterministic from history.
//!
//! ## On-disk format
//!
//! The log is a single append-only file of frames:
//!
//! ```text
//! [payload length: u32 LE][payload: borsh(WalRecord)][checksum: sha256(payload)]
//! ```
//!
//! A crash can tear the final frame. On open, the log is read frame by frame until end of file;
//! the first short read, length overrun, undecodable payload or checksum mismatch quarantines the
//! file (it is renamed away for inspection) and a fresh log is started containing the intact
//! prefix that was recovered. The cache then relies on the chain store and peer sync to make up
//! whatever the tail lost.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use crate::types::block::{Block, CryptoHasher};
use crate::types::witnesses::{WitnessList, WitnessListBytes};

const WAL_FILE_NAME: &str = "blockcache.wal";

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// One accepted block and the witness rotation that was in force at it.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub(crate) struct WalRecord {
    pub(crate) block: Block,
    pub(crate) witnesses: WitnessListBytes,
}

impl WalRecord {
    pub(crate) fn new(block: &Block, witnesses: &WitnessList) -> WalRecord {
        WalRecord {
            block: block.clone(),
            witnesses: WitnessListBytes::from(witnesses),
        }
    }
}

pub(crate) struct WriteAheadLog {
    file: File,
    path: PathBuf,
}

impl WriteAheadLog {
    /// Open (or create) the log in `directory` and replay it. Returns the log positioned for
    /// appending, together with the records recovered from it.
    ///
    /// A corrupt tail does not fail the open: the damaged file is renamed to a quarantine name and
    /// replaced by a fresh log holding the intact prefix.
    pub(crate) fn open(directory: &Path) -> io::Result<(WriteAheadLog, Vec<WalRecord>)> {
        fs::create_dir_all(directory)?;
        let path = directory.join(WAL_FILE_NAME);

        let (records, corrupt) = match File::open(&path) {
            Ok(mut file) => read_records(&mut file)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => (Vec::new(), false),
            Err(err) => return Err(err),
        };

        if corrupt {
            let quarantine = quarantine_path(&path);
            log::warn!(
                "block cache WAL has a corrupt tail; quarantining it as {:?} and starting fresh",
                quarantine
            );
            fs::rename(&path, &quarantine)?;
            let mut wal = WriteAheadLog {
                file: OpenOptions::new().create(true).append(true).open(&path)?,
                path,
            };
            for record in &records {
                wal.append(record)?;
            }
            Ok((wal, records))
        } else {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Ok((WriteAheadLog { file, path }, records))
        }
    }

    /// Append a record and sync it to disk.
    pub(crate) fn append(&mut self, record: &WalRecord) -> io::Result<()> {
        let payload = record
            .try_to_vec()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let checksum: [u8; 32] = CryptoHasher::digest(&payload).into();

        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.file.write_all(&checksum)?;
        self.file.sync_data()
    }

    /// Replace the log's contents with exactly `records`, atomically (write-new-then-rename).
    /// Called when the cache prunes, so the log tracks the live node set instead of growing
    /// without bound.
    pub(crate) fn compact(&mut self, records: &[WalRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = WriteAheadLog {
                file: OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&tmp_path)?,
                path: tmp_path.clone(),
            };
            for record in records {
                tmp.append(record)?;
            }
        }
        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

/// Read frames until end of file. Returns the decoded records, and whether a corrupt tail was
/// encountered.
fn read_records(file: &mut File) -> io::Result<(Vec<WalRecord>, bool)> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < 4 {
            return Ok((records, true));
        }
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        if len > MAX_PAYLOAD_LEN {
            return Ok((records, true));
        }
        let payload_start = offset + 4;
        let payload_end = payload_start + len as usize;
        let checksum_end = payload_end + 32;
        if checksum_end > bytes.len() {
            return Ok((records, true));
        }

        let payload = &bytes[payload_start..payload_end];
        let checksum: [u8; 32] = CryptoHasher::digest(payload).into();
        if checksum != bytes[payload_end..checksum_end] {
            return Ok((records, true));
        }

        match WalRecord::try_from_slice(payload) {
            Ok(record) => records.push(record),
            Err(_) => return Ok((records, true)),
        }

        offset = checksum_end;
    }

    Ok((records, false))
}

fn quarantine_path(path: &Path) -> PathBuf {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    path.with_extension(format!("corrupted.{}", since_epoch))
}
