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

//! Backing-store abstraction for the zone table and its data.
//!
//! A [`MemorySegment`] stands in for the allocator into which zone data
//! is placed. The [`local`](ZoneTableSegment::local) variant is plain
//! heap memory and never fails. The
//! [`mapped`](ZoneTableSegment::mapped) variant is backed by a file
//! whose region must be enlarged when it fills; enlarging relocates the
//! region, which invalidates everything callers may hold into it. That event is
//! reported as [`SegmentError::Grown`]: by the time the error is
//! returned the segment *has* grown, so retrying the failed operation
//! from a safe re-entry point succeeds. The
//! [`ZoneWriter`](crate::zone::ZoneWriter) install loop is the primary
//! consumer of this protocol.
//!
//! A [`ZoneTableSegment`] bundles a [`MemorySegment`] with the
//! [`ZoneTable`] living inside it and records whether the segment may
//! be mutated ([`Mode`]).

use std::fmt;
use std::io;
use std::path::Path;

use crate::zone::ZoneTable;

mod local;
mod mapped;

use local::LocalSegment;
use mapped::MappedSegment;

////////////////////////////////////////////////////////////////////////
// THE MEMORY-SEGMENT CONTRACT                                        //
////////////////////////////////////////////////////////////////////////

/// An allocator that may be relocated or grown.
///
/// Implementations account for storage in whole octets. [`reserve`]
/// claims room for an allocation about to be made and [`release`]
/// returns it; neither transfers actual memory (the data structures
/// themselves own their allocations), but a reservation against a
/// mapped segment is what forces the backing file to keep up with the
/// data placed in it.
///
/// [`reserve`]: MemorySegment::reserve
/// [`release`]: MemorySegment::release
pub trait MemorySegment {
    /// Reserves room for `bytes` octets.
    ///
    /// On a mapped segment this may fail with [`SegmentError::Grown`]
    /// after enlarging and relocating the region; the reservation is
    /// *not* recorded in that case, and the caller must restart from a
    /// point where it holds nothing into the segment, then try again.
    fn reserve(&self, bytes: usize) -> Result<(), SegmentError>;

    /// Returns a reservation of `bytes` octets.
    fn release(&self, bytes: usize);

    /// Returns the number of octets currently reserved.
    fn in_use(&self) -> usize;
}

////////////////////////////////////////////////////////////////////////
// ZONE TABLE SEGMENTS                                                //
////////////////////////////////////////////////////////////////////////

/// The mode in which a [`ZoneTableSegment`] is opened. Writers require
/// [`ReadWrite`](Mode::ReadWrite); the [`ZoneWriter`] constructor
/// rejects read-only segments.
///
/// [`ZoneWriter`]: crate::zone::ZoneWriter
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

/// A handle to the backing store of one zone table: the
/// [`MemorySegment`] providing the storage plus the [`ZoneTable`]
/// placed inside it.
pub struct ZoneTableSegment {
    mem: Box<dyn MemorySegment + Send + Sync>,
    table: ZoneTable,
    mode: Mode,
}

impl ZoneTableSegment {
    /// Creates a heap-backed segment. Local segments never report
    /// [`SegmentError::Grown`].
    pub fn local(mode: Mode) -> Self {
        Self {
            mem: Box::new(LocalSegment::new()),
            table: ZoneTable::new(),
            mode,
        }
    }

    /// Opens (creating if necessary and permitted by `mode`) a
    /// file-backed segment at `path`. This is the variant configured by
    /// the `"mapped-file"` key.
    pub fn mapped(path: impl AsRef<Path>, mode: Mode) -> Result<Self, SegmentError> {
        let mem = MappedSegment::open(path.as_ref(), mode)?;
        Ok(Self {
            mem: Box::new(mem),
            table: ZoneTable::new(),
            mode,
        })
    }

    /// Returns whether lookups against this segment are safe. A
    /// successfully opened segment is always usable; a segment whose
    /// backing store failed validation never constructs.
    pub fn is_usable(&self) -> bool {
        true
    }

    /// Returns whether mutation of this segment is permitted.
    pub fn is_writable(&self) -> bool {
        self.mode == Mode::ReadWrite
    }

    /// Returns the zone table living in this segment.
    pub fn table(&self) -> &ZoneTable {
        &self.table
    }

    /// Returns the underlying memory segment.
    pub fn memory(&self) -> &(dyn MemorySegment + Send + Sync) {
        &*self.mem
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors arising from [`MemorySegment`] and [`ZoneTableSegment`]
/// operations.
#[derive(Debug)]
pub enum SegmentError {
    /// The backing store was relocated to satisfy growth; anything held
    /// into the segment is stale. The growth itself succeeded, so the
    /// failed operation will succeed if retried from a safe re-entry
    /// point.
    Grown,

    /// A mutating operation was attempted on a read-only segment.
    ReadOnly,

    /// An I/O error from the backing file of a mapped segment.
    Io(io::Error),
}

impl From<io::Error> for SegmentError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Grown => f.write_str("the memory segment grew and was relocated"),
            Self::ReadOnly => f.write_str("the memory segment is read-only"),
            Self::Io(err) => write!(f, "mapped segment I/O error: {}", err),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_segment_modes() {
        let rw = ZoneTableSegment::local(Mode::ReadWrite);
        assert!(rw.is_usable());
        assert!(rw.is_writable());

        let ro = ZoneTableSegment::local(Mode::ReadOnly);
        assert!(ro.is_usable());
        assert!(!ro.is_writable());
    }

    #[test]
    fn local_segment_accounts_reservations() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let mem = segment.memory();
        assert_eq!(mem.in_use(), 0);
        mem.reserve(100).unwrap();
        mem.reserve(28).unwrap();
        assert_eq!(mem.in_use(), 128);
        mem.release(100);
        assert_eq!(mem.in_use(), 28);
        // Releasing more than is reserved clamps at zero rather than
        // wrapping.
        mem.release(1000);
        assert_eq!(mem.in_use(), 0);
    }
}
