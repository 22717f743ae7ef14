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

//! Implementation of the [`ZoneData`] structure.

use std::collections::HashMap;
use std::sync::Arc;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, RrsetList, Ttl, Type};
use crate::segment::{MemorySegment, SegmentError};

use super::loader::LoaderError;

/// The accounting cost of one tree node beyond its owner name.
const NODE_OVERHEAD: usize = 32;

/// The accounting cost of one record beyond its RDATA.
const RECORD_OVERHEAD: usize = 8;

/// The in-memory record tree for one zone.
///
/// `ZoneData` owns a tree of nodes mirroring the DNS name space below
/// the zone apex, with the [`RrsetList`] of each name at its node. It
/// is built by a [`ZoneDataLoader`](super::ZoneDataLoader) against a
/// specific [`MemorySegment`], which accounts for its storage, and must
/// be returned to that segment with [`ZoneData::destroy`] when it is no
/// longer installed.
///
/// Once a `ZoneData` has been returned from a loader it is never
/// mutated again: readers looking at an installed zone always see a
/// complete, consistent copy, and reloads build a fresh `ZoneData`
/// rather than touching the installed one.
pub struct ZoneData {
    origin: Name,
    class: Class,
    apex: Node,
    bytes: usize,
}

/// A node in the zone's tree. Children are keyed by the lowercased
/// label below this node.
struct Node {
    rrsets: RrsetList,
    children: HashMap<Box<[u8]>, Node>,
}

impl Node {
    fn new() -> Self {
        Self {
            rrsets: RrsetList::new(),
            children: HashMap::new(),
        }
    }

    /// Gets or creates the descendant node reached by following
    /// `labels` (given leaf-first, i.e. in the order produced by
    /// [`Name::labels`]) downward from `self`.
    fn get_or_create_descendant(&mut self, labels: &[&[u8]]) -> &mut Node {
        match labels.split_last() {
            None => self,
            Some((closest, rest)) => self
                .children
                .entry(closest.to_ascii_lowercase().into_boxed_slice())
                .or_insert_with(Node::new)
                .get_or_create_descendant(rest),
        }
    }

    fn find_descendant(&self, labels: &[&[u8]]) -> Option<&Node> {
        match labels.split_last() {
            None => Some(self),
            Some((closest, rest)) => self
                .children
                .get(closest.to_ascii_lowercase().as_slice())?
                .find_descendant(rest),
        }
    }
}

impl ZoneData {
    /// Creates an empty `ZoneData` for the zone `origin`, reserving its
    /// base storage from `mem`.
    pub fn create(
        mem: &dyn MemorySegment,
        origin: Name,
        class: Class,
    ) -> Result<Self, SegmentError> {
        let bytes = origin.len() + NODE_OVERHEAD;
        mem.reserve(bytes)?;
        Ok(Self {
            origin,
            class,
            apex: Node::new(),
            bytes,
        })
    }

    /// Creates an empty `ZoneData` with no storage reserved anywhere.
    /// Last-resort constructor for the placeholder published when a
    /// segment cannot even account for the placeholder itself.
    pub(crate) fn zero_cost(origin: Name, class: Class) -> Self {
        Self {
            origin,
            class,
            apex: Node::new(),
            bytes: 0,
        }
    }

    /// Returns the name of the zone apex.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Returns the zone's class.
    pub fn class(&self) -> Class {
        self.class
    }

    /// Returns whether the zone holds no records at all. Installed
    /// `ZoneData` is empty only for the malformed-source placeholder.
    pub fn is_empty(&self) -> bool {
        self.apex.rrsets.is_empty() && self.apex.children.is_empty()
    }

    /// Returns the number of octets this zone has reserved from its
    /// segment.
    pub fn reserved_bytes(&self) -> usize {
        self.bytes
    }

    /// Adds a record to the zone, reserving its storage from `mem`.
    ///
    /// The owner must be at or below the zone apex and the class must
    /// match the zone's; violations are data errors
    /// ([`LoaderError::Data`]), since they indicate a malformed source.
    /// [`SegmentError::Grown`] from the reservation is passed through
    /// as [`LoaderError::SegmentGrown`] untranslated.
    pub fn add_record(
        &mut self,
        mem: &dyn MemorySegment,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<(), LoaderError> {
        if !owner.eq_or_subdomain_of(&self.origin) {
            return Err(LoaderError::Data(format!(
                "record owner {} is outside zone {}",
                owner, self.origin,
            )));
        }
        if class != self.class {
            return Err(LoaderError::Data(format!(
                "record class {} does not match zone class {}",
                class, self.class,
            )));
        }

        let cost = owner.len() + NODE_OVERHEAD + rdata.len() + RECORD_OVERHEAD;
        mem.reserve(cost)?;
        self.bytes += cost;

        // The labels below the apex lead to the owner's node.
        let apex_n_labels = self.origin.n_labels();
        let labels: Vec<&[u8]> = owner
            .labels()
            .take(owner.n_labels() - apex_n_labels)
            .collect();
        let node = self.apex.get_or_create_descendant(&labels);
        node.rrsets
            .add(rr_type, class, ttl, rdata)
            .map_err(|e| LoaderError::Data(e.to_string()))
    }

    /// Looks up the [`RrsetList`] at `name`, which must be at or below
    /// the apex. Exact match only.
    pub fn find(&self, name: &Name) -> Option<&RrsetList> {
        if !name.eq_or_subdomain_of(&self.origin) {
            return None;
        }
        let labels: Vec<&[u8]> = name
            .labels()
            .take(name.n_labels() - self.origin.n_labels())
            .collect();
        self.apex.find_descendant(&labels).map(|node| &node.rrsets)
    }

    /// Destroys a `ZoneData`, returning its storage to the segment it
    /// was created in.
    ///
    /// Readers may still hold references to the data; the octets are
    /// freed when the last reference drops, but the segment accounting
    /// is settled here, when the data leaves the table's ownership.
    pub fn destroy(mem: &dyn MemorySegment, data: Arc<ZoneData>) {
        mem.release(data.bytes);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use crate::segment::{Mode, ZoneTableSegment};

    use super::*;

    lazy_static! {
        static ref ORIGIN: Name = "example.org.".parse().unwrap();
        static ref WWW: Name = "www.example.org.".parse().unwrap();
        static ref DEEP: Name = "a.b.www.example.org.".parse().unwrap();
        static ref OUTSIDE: Name = "example.com.".parse().unwrap();
    }

    fn localhost() -> &'static Rdata {
        Rdata::try_from_octets(&[127, 0, 0, 1]).unwrap()
    }

    #[test]
    fn add_and_find() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let mem = segment.memory();
        let mut data = ZoneData::create(mem, ORIGIN.clone(), Class::IN).unwrap();
        assert!(data.is_empty());

        data.add_record(
            mem,
            &WWW,
            Type::A,
            Class::IN,
            Ttl::from(3600),
            localhost(),
        )
        .unwrap();
        data.add_record(
            mem,
            &DEEP,
            Type::A,
            Class::IN,
            Ttl::from(3600),
            localhost(),
        )
        .unwrap();
        assert!(!data.is_empty());

        // Case-insensitive lookup finds exactly the node asked for.
        let upper: Name = "WWW.Example.ORG.".parse().unwrap();
        assert!(data.find(&upper).unwrap().lookup(Type::A).is_some());
        assert!(data.find(&DEEP).unwrap().lookup(Type::A).is_some());
        // Intermediate nodes exist but carry no records.
        let intermediate: Name = "b.www.example.org.".parse().unwrap();
        assert!(data.find(&intermediate).unwrap().is_empty());
        assert_eq!(data.find(&OUTSIDE).map(|_| ()), None);
    }

    #[test]
    fn rejects_foreign_records() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let mem = segment.memory();
        let mut data = ZoneData::create(mem, ORIGIN.clone(), Class::IN).unwrap();
        assert!(matches!(
            data.add_record(
                mem,
                &OUTSIDE,
                Type::A,
                Class::IN,
                Ttl::from(3600),
                localhost(),
            ),
            Err(LoaderError::Data(_))
        ));
        assert!(matches!(
            data.add_record(mem, &WWW, Type::A, Class::CH, Ttl::from(3600), localhost()),
            Err(LoaderError::Data(_))
        ));
    }

    #[test]
    fn destroy_settles_segment_accounting() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let mem = segment.memory();
        let mut data = ZoneData::create(mem, ORIGIN.clone(), Class::IN).unwrap();
        data.add_record(
            mem,
            &WWW,
            Type::A,
            Class::IN,
            Ttl::from(3600),
            localhost(),
        )
        .unwrap();
        assert_eq!(mem.in_use(), data.reserved_bytes());

        ZoneData::destroy(mem, Arc::new(data));
        assert_eq!(mem.in_use(), 0);
    }
}
