// Copyright 2026 the bulwark developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The file-backed memory segment.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use log::info;

use super::{MemorySegment, Mode, SegmentError};

/// The magic octets identifying a segment file.
const MAGIC: [u8; 8] = *b"bulwseg\x01";

/// The size of the accounting header at the start of a segment file:
/// the magic, the capacity, and the octets in use.
const HEADER_LEN: u64 = 8 + 8 + 8;

/// The capacity of a freshly created segment file. The region doubles
/// as reservations outgrow it.
const INITIAL_CAPACITY: u64 = 4096;

/// A [`MemorySegment`] backed by a file region.
///
/// The region begins with an accounting header and is relocated
/// whenever a reservation would overflow its capacity: the file is
/// extended to the next power-of-two capacity that fits and the
/// operation reports [`SegmentError::Grown`] *without* recording the
/// reservation. Everything a caller held into the segment is stale at
/// that point; a retry from a safe re-entry point will find enough
/// room. This mirrors the behavior of region-based shared-memory
/// allocators, whose base address moves when the region is remapped.
///
/// All mutators are serialized by an internal lock, so multiple writers
/// on the same mapped segment cannot interleave accounting updates.
pub(super) struct MappedSegment {
    inner: Mutex<Inner>,
    mode: Mode,
}

struct Inner {
    file: File,
    capacity: u64,
    in_use: u64,
}

impl MappedSegment {
    /// Opens the segment file at `path`, creating and initializing it
    /// if it does not yet exist (which requires `Mode::ReadWrite`).
    pub(super) fn open(path: &Path, mode: Mode) -> Result<Self, SegmentError> {
        let writable = mode == Mode::ReadWrite;
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;

        let len = file.metadata()?.len();
        let (capacity, in_use) = if len == 0 {
            let inner = Inner {
                file,
                capacity: INITIAL_CAPACITY,
                in_use: 0,
            };
            let mut segment = Self {
                inner: Mutex::new(inner),
                mode,
            };
            segment.initialize()?;
            info!(
                "Created mapped segment {} with capacity {}.",
                path.display(),
                INITIAL_CAPACITY,
            );
            return Ok(segment);
        } else {
            read_header(&mut file)?
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                capacity,
                in_use,
            }),
            mode,
        })
    }

    fn initialize(&mut self) -> Result<(), SegmentError> {
        let inner = self.inner.get_mut().unwrap();
        inner.file.set_len(HEADER_LEN + inner.capacity)?;
        write_header(&mut inner.file, inner.capacity, inner.in_use)?;
        Ok(())
    }
}

/// Reads and validates the accounting header of a segment file.
fn read_header(file: &mut File) -> Result<(u64, u64), SegmentError> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)
        .map_err(|_| bad_segment_file())?;
    if header[0..8] != MAGIC {
        return Err(bad_segment_file());
    }
    let capacity = u64::from_le_bytes(header[8..16].try_into().unwrap());
    let in_use = u64::from_le_bytes(header[16..24].try_into().unwrap());
    if in_use > capacity {
        return Err(bad_segment_file());
    }
    Ok((capacity, in_use))
}

/// Persists the accounting header of a segment file.
fn write_header(file: &mut File, capacity: u64, in_use: u64) -> Result<(), SegmentError> {
    let mut header = [0u8; HEADER_LEN as usize];
    header[0..8].copy_from_slice(&MAGIC);
    header[8..16].copy_from_slice(&capacity.to_le_bytes());
    header[16..24].copy_from_slice(&in_use.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    Ok(())
}

fn bad_segment_file() -> SegmentError {
    SegmentError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "not a valid segment file",
    ))
}

impl MemorySegment for MappedSegment {
    fn reserve(&self, bytes: usize) -> Result<(), SegmentError> {
        if self.mode == Mode::ReadOnly {
            return Err(SegmentError::ReadOnly);
        }

        let mut inner = self.inner.lock().unwrap();
        let wanted = inner.in_use + bytes as u64;
        if wanted <= inner.capacity {
            inner.in_use = wanted;
            let (capacity, in_use) = (inner.capacity, inner.in_use);
            write_header(&mut inner.file, capacity, in_use)?;
            return Ok(());
        }

        // The region is full: grow it, then report the relocation. The
        // reservation is intentionally not recorded; the caller's retry
        // will land in the enlarged region.
        let old_capacity = inner.capacity;
        let mut new_capacity = old_capacity;
        while new_capacity < wanted {
            new_capacity *= 2;
        }
        inner.file.set_len(HEADER_LEN + new_capacity)?;
        inner.capacity = new_capacity;
        let (capacity, in_use) = (inner.capacity, inner.in_use);
        write_header(&mut inner.file, capacity, in_use)?;
        info!(
            "Mapped segment grew from {} to {} octets.",
            old_capacity, new_capacity,
        );
        Err(SegmentError::Grown)
    }

    fn release(&self, bytes: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_use = inner.in_use.saturating_sub(bytes as u64);
        let (capacity, in_use) = (inner.capacity, inner.in_use);
        // Header persistence is best-effort on release; accounting is
        // re-written on the next reserve in any case.
        let _ = write_header(&mut inner.file, capacity, in_use);
    }

    fn in_use(&self) -> usize {
        self.inner.lock().unwrap().in_use as usize
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
