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

//! Implementation of the [`ZoneTable`] structure.

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::{Arc, RwLock};

use crate::name::Name;
use crate::segment::{MemorySegment, SegmentError};

use super::data::ZoneData;

/// The accounting cost of one table entry beyond its key.
const ENTRY_OVERHEAD: usize = 48;

/// The directory of zones installed in a segment: a mapping from zone
/// name to the zone's installed [`ZoneData`] and flags.
///
/// The table is consulted with [`ZoneTable::find`], which matches the
/// longest existing ancestor of the queried name, and updated with
/// [`ZoneTable::add_or_replace`], which swaps in a new `ZoneData` under
/// an internal lock so that concurrent readers observe either the old
/// or the new data, never an intermediate state. The displaced data is
/// handed back to the caller, which is responsible for destroying it
/// (the [`ZoneWriter`](super::ZoneWriter) does this in its cleanup
/// step).
pub struct ZoneTable {
    zones: RwLock<HashMap<Name, TableEntry>>,
}

struct TableEntry {
    data: Arc<ZoneData>,
    flags: ZoneFlags,
}

impl ZoneTable {
    /// Creates a new, initially empty `ZoneTable`.
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up the zone responsible for `name`: the entry whose name
    /// matches the most consecutive labels of `name`, starting from the
    /// right. An exact match yields [`FindResultCode::Success`]; a
    /// proper ancestor yields [`FindResultCode::PartialMatch`].
    pub fn find(&self, name: &Name) -> FindResult {
        let zones = self.zones.read().unwrap();
        if let Some(entry) = zones.get(name) {
            return FindResult {
                code: FindResultCode::Success,
                flags: entry.flags,
                zone_data: Some(entry.data.clone()),
            };
        }
        let mut candidate = name.parent();
        while let Some(ancestor) = candidate {
            if let Some(entry) = zones.get(&ancestor) {
                return FindResult {
                    code: FindResultCode::PartialMatch,
                    flags: entry.flags,
                    zone_data: Some(entry.data.clone()),
                };
            }
            candidate = ancestor.parent();
        }
        FindResult {
            code: FindResultCode::NotFound,
            flags: ZoneFlags::NONE,
            zone_data: None,
        }
    }

    /// Installs `data` as the zone at `name`, atomically from the
    /// perspective of concurrent [`find`](ZoneTable::find)s, and
    /// returns the previously installed [`ZoneData`] (if any) so that
    /// the caller can destroy it.
    ///
    /// Installing under a name not yet present reserves the entry's
    /// storage from `mem`, which on a mapped segment may report
    /// [`SegmentError::Grown`]; the table is unchanged in that case and
    /// the caller retries.
    pub fn add_or_replace(
        &self,
        mem: &dyn MemorySegment,
        name: &Name,
        data: Arc<ZoneData>,
        flags: ZoneFlags,
    ) -> Result<Option<Arc<ZoneData>>, SegmentError> {
        let mut zones = self.zones.write().unwrap();
        if !zones.contains_key(name) {
            mem.reserve(name.len() + ENTRY_OVERHEAD)?;
        }
        let previous = zones.insert(name.clone(), TableEntry { data, flags });
        Ok(previous.map(|entry| entry.data))
    }

    /// Returns the number of zones in the table.
    pub fn len(&self) -> usize {
        self.zones.read().unwrap().len()
    }

    /// Returns whether the table contains no zones.
    pub fn is_empty(&self) -> bool {
        self.zones.read().unwrap().is_empty()
    }
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// FIND RESULTS AND FLAGS                                             //
////////////////////////////////////////////////////////////////////////

/// The outcome classification of a [`ZoneTable::find`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindResultCode {
    /// An entry with exactly the queried name exists.
    Success,

    /// An entry exists for a proper ancestor of the queried name.
    PartialMatch,

    /// Neither the name nor any ancestor is in the table.
    NotFound,
}

/// Flags attached to a [`ZoneTable`] entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZoneFlags(u32);

impl ZoneFlags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// The installed data has no records. Reserved for the
    /// malformed-source fallback published by the
    /// [`ZoneWriter`](super::ZoneWriter).
    pub const EMPTY: Self = Self(1);

    /// Returns whether every flag in `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ZoneFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The result of a [`ZoneTable::find`].
pub struct FindResult {
    pub code: FindResultCode,
    pub flags: ZoneFlags,
    pub zone_data: Option<Arc<ZoneData>>,
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
