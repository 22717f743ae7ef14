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

//! The in-memory zone store and its transactional reload machinery.
//!
//! The pieces fit together like this. A [`ZoneTable`] maps zone names
//! to installed [`ZoneData`]: the immutable record tree for one zone.
//! New copies of a zone's data are produced by a [`ZoneDataLoader`]
//! (usually the stock [`SourceLoader`] reading from a
//! [`RecordSource`]), and a [`ZoneWriter`] coordinates the whole
//! reload: it obtains a loader from a caller-supplied factory, drives
//! the load (optionally in bounded increments), atomically swaps the
//! result into the table, and releases the superseded data back to the
//! segment.
//!
//! The writer is where the awkward cases are handled so that callers
//! need not think about them:
//!
//! * A malformed source either aborts the load with the writer's state
//!   unchanged (strict mode) or publishes an explicit empty zone
//!   flagged [`ZoneFlags::EMPTY`] (lenient mode).
//! * A mapped segment that grows mid-install invalidates everything
//!   held into it; the writer retries the commit from a safe re-entry
//!   point, a bounded number of times.
//! * A loader whose final commit fails unexpectedly leaves the table
//!   pointing at an explicit empty zone rather than half-written data,
//!   and the failure is propagated unchanged.

mod data;
mod loader;
mod table;
mod writer;

pub use data::ZoneData;
pub use loader::{
    LoaderCreator, LoaderError, Record, RecordSource, SourceError, SourceLoader, ZoneDataLoader,
};
pub use table::{FindResult, FindResultCode, ZoneFlags, ZoneTable};
pub use writer::{Error, ZoneWriter};
