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

//! Bulwark is the in-memory data store at the heart of a DNS server
//! suite. It provides two tightly related subsystems:
//!
//! * The [`zone`] module: an authoritative zone table whose contents
//!   are replaced transactionally by a [`ZoneWriter`](zone::ZoneWriter).
//!   A reload builds a complete new copy of a zone's data, swaps it in
//!   atomically, and releases the superseded copy, surviving
//!   backing-store relocation and malformed source data along the way.
//! * The [`rrl`] module: a response rate-limiting table that tracks
//!   per-client token buckets in a dual-generation hash table with LRU
//!   reclamation, expanding online without pausing lookups.
//!
//! Both subsystems place their data in a [`segment`]: an abstraction
//! over the backing allocator, which may be plain heap memory or a
//! file-backed region that relocates when it grows. Relocation is
//! surfaced as a distinguished error
//! ([`SegmentError::Grown`](segment::SegmentError::Grown)) so that
//! callers can retry from a known-safe re-entry point; the
//! [`ZoneWriter`](zone::ZoneWriter) install path is the canonical
//! consumer of that contract.
//!
//! The crate deliberately stops short of a full server: there is no
//! wire parsing, no query resolution, and no networking. The
//! [`zone_file`] module provides a small master-file reader so that the
//! bundled `bulwarkd` daemon can keep a segment's zones loaded from
//! disk, but any [`RecordSource`](zone::RecordSource) implementation
//! can feed the loaders.

pub mod class;
pub mod name;
pub mod rr;
pub mod rrl;
pub mod segment;
pub mod zone;
pub mod zone_file;

mod util;
