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

//! Implementation of resource-record data structures.
//!
//! The zone store does not interpret record data; it stores RDATA as
//! opaque octets grouped into RRsets ([RFC 2181 § 5]). This module
//! provides the [`Type`], [`Ttl`], and [`Rdata`] primitives and the
//! [`Rrset`]/[`RrsetList`] containers that hang off each node of a
//! zone's tree.
//!
//! [RFC 2181 § 5]: https://datatracker.ietf.org/doc/html/rfc2181#section-5

use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use crate::class::Class;
use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// RR TYPES AND TTLS                                                  //
////////////////////////////////////////////////////////////////////////

/// Represents a DNS resource record type.
///
/// Like [`Class`], this is a wrapper around the on-the-wire [`u16`]
/// with constants for the types the bundled zone-file reader knows how
/// to assemble.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    pub const A: Self = Self(1);
    pub const NS: Self = Self(2);
    pub const CNAME: Self = Self(5);
    pub const SOA: Self = Self(6);
    pub const PTR: Self = Self(12);
    pub const MX: Self = Self(15);
    pub const TXT: Self = Self(16);
    pub const AAAA: Self = Self(28);
}

impl From<u16> for Type {
    fn from(value: u16) -> Self {
        Type(value)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match Caseless(text) {
            Caseless("A") => Ok(Self::A),
            Caseless("NS") => Ok(Self::NS),
            Caseless("CNAME") => Ok(Self::CNAME),
            Caseless("SOA") => Ok(Self::SOA),
            Caseless("PTR") => Ok(Self::PTR),
            Caseless("MX") => Ok(Self::MX),
            Caseless("TXT") => Ok(Self::TXT),
            Caseless("AAAA") => Ok(Self::AAAA),
            _ => {
                if text
                    .get(0..4)
                    .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
                {
                    text[4..]
                        .parse::<u16>()
                        .map(Self::from)
                        .or(Err("type value is not a valid unsigned 16-bit integer"))
                } else {
                    Err("unknown RR type")
                }
            }
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", *self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::A => write!(f, "A"),
            Self::NS => write!(f, "NS"),
            Self::CNAME => write!(f, "CNAME"),
            Self::SOA => write!(f, "SOA"),
            Self::PTR => write!(f, "PTR"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self(value) => write!(f, "TYPE{}", value), // RFC 3597 § 5
        }
    }
}

/// Represents the time-to-live (TTL) of a DNS record.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Ttl(u32);

impl From<u32> for Ttl {
    fn from(value: u32) -> Self {
        Ttl(value)
    }
}

impl From<Ttl> for u32 {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

////////////////////////////////////////////////////////////////////////
// RDATA                                                              //
////////////////////////////////////////////////////////////////////////

/// The maximum length of the RDATA of a record, implied by the 16-bit
/// RDLENGTH field.
pub const MAX_RDATA_LEN: usize = u16::MAX as usize;

/// An unsized wrapper around record data octets.
///
/// `Rdata` is used through references; the wrapper exists so that APIs
/// cannot accidentally be handed octet slices longer than a record can
/// carry. Construct references with [`Rdata::try_from_octets`].
#[repr(transparent)]
pub struct Rdata([u8]);

impl Rdata {
    /// Creates an `Rdata` reference, checking the length limit.
    pub fn try_from_octets(octets: &[u8]) -> Result<&Self, RdataTooLongError> {
        if octets.len() > MAX_RDATA_LEN {
            Err(RdataTooLongError)
        } else {
            Ok(Self::from_unchecked(octets))
        }
    }

    /// Creates an `Rdata` reference without checking the length. Used
    /// internally where the length is already known to be valid.
    fn from_unchecked(octets: &[u8]) -> &Self {
        // SAFETY: Rdata is a transparent wrapper around [u8], so the
        // layouts are identical and the lifetime is preserved.
        unsafe { &*(octets as *const [u8] as *const Rdata) }
    }

    /// Returns the underlying octets.
    pub fn octets(&self) -> &[u8] {
        &self.0
    }

    /// Returns the length of the record data.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the record data is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The error returned when octets exceeding [`MAX_RDATA_LEN`] are
/// offered as [`Rdata`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RdataTooLongError;

impl fmt::Display for RdataTooLongError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RDATA was longer than 65,535 octets")
    }
}

impl std::error::Error for RdataTooLongError {}

////////////////////////////////////////////////////////////////////////
// RRSETS                                                             //
////////////////////////////////////////////////////////////////////////

/// A resource record set: the records sharing one owner, class, and
/// type, which [RFC 2181 § 5] additionally requires to share a TTL.
///
/// The RDATA of the member records is stored packed into a single
/// buffer, each item prefixed with a native-endian length, so that an
/// `Rrset` costs one allocation however many records it holds. The
/// owner name is not stored here; the [`ZoneData`](crate::zone::ZoneData)
/// tree keeps track of it.
///
/// [RFC 2181 § 5]: https://datatracker.ietf.org/doc/html/rfc2181#section-5
pub struct Rrset {
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    rdatas: Vec<u8>,
    n_rdatas: usize,
}

impl Rrset {
    /// Creates a new `Rrset` with the given type, class, and TTL, and
    /// initially no record data.
    fn new(rr_type: Type, class: Class, ttl: Ttl) -> Self {
        Self {
            rr_type,
            class,
            ttl,
            rdatas: Vec::new(),
            n_rdatas: 0,
        }
    }

    /// Adds an [`Rdata`] to this `Rrset`. Following the behavior of
    /// other nameservers, record data already present in the set is
    /// silently discarded.
    fn push_rdata(&mut self, rdata: &Rdata) {
        for existing in self.rdatas() {
            if existing.octets() == rdata.octets() {
                return;
            }
        }
        self.rdatas.reserve(2 + rdata.len());
        self.rdatas
            .extend_from_slice(&(rdata.len() as u16).to_ne_bytes());
        self.rdatas.extend_from_slice(rdata.octets());
        self.n_rdatas += 1;
    }

    /// Returns an iterator over the [`Rdata`] of this `Rrset`.
    pub fn rdatas(&self) -> RdataIterator {
        RdataIterator {
            cursor: &self.rdatas,
        }
    }

    /// Returns the number of records in this `Rrset`.
    pub fn n_rdatas(&self) -> usize {
        self.n_rdatas
    }
}

/// An iterator over the [`Rdata`] of an [`Rrset`].
pub struct RdataIterator<'a> {
    cursor: &'a [u8],
}

impl<'a> Iterator for RdataIterator<'a> {
    type Item = &'a Rdata;

    fn next(&mut self) -> Option<Self::Item> {
        let len_octets: &[u8; 2] = self.cursor.get(0..2)?.try_into().ok()?;
        let len = u16::from_ne_bytes(*len_octets) as usize;
        let rdata = self.cursor.get(2..len + 2)?;
        self.cursor = &self.cursor[len + 2..];
        Some(Rdata::from_unchecked(rdata))
    }
}

impl FusedIterator for RdataIterator<'_> {}

////////////////////////////////////////////////////////////////////////
// RRSET LISTS                                                        //
////////////////////////////////////////////////////////////////////////

/// The [`Rrset`]s of all [`Type`]s present at one node of the DNS tree.
/// Individual records are added with [`RrsetList::add`]; the `Rrset`s
/// themselves are constructed and managed internally.
#[derive(Default)]
pub struct RrsetList {
    rrsets: Vec<Rrset>,
}

impl RrsetList {
    /// Returns a new, empty `RrsetList`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a resource record to the `RrsetList`.
    ///
    /// This fails if the [`Class`] of the new record does not match the
    /// records already in the list, or if its [`Ttl`] does not match
    /// the rest of its [`Rrset`]. Record data already present in the
    /// target `Rrset` is silently ignored.
    pub fn add(
        &mut self,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &Rdata,
    ) -> Result<(), RrsetListAddError> {
        if !self.rrsets.is_empty() && self.rrsets[0].class != class {
            return Err(RrsetListAddError::ClassMismatch);
        }
        match self.rrsets.binary_search_by_key(&rr_type, |r| r.rr_type) {
            Ok(index) => {
                let rrset = &mut self.rrsets[index];
                if rrset.ttl != ttl {
                    Err(RrsetListAddError::TtlMismatch)
                } else {
                    rrset.push_rdata(rdata);
                    Ok(())
                }
            }
            Err(index) => {
                let mut rrset = Rrset::new(rr_type, class, ttl);
                rrset.push_rdata(rdata);
                self.rrsets.insert(index, rrset);
                Ok(())
            }
        }
    }

    /// Looks up the [`Rrset`] of type `rr_type` in the `RrsetList`.
    pub fn lookup(&self, rr_type: Type) -> Option<&Rrset> {
        self.rrsets
            .binary_search_by_key(&rr_type, |r| r.rr_type)
            .map(|index| &self.rrsets[index])
            .ok()
    }

    /// Returns an iterator over the [`Rrset`]s of the `RrsetList`.
    pub fn iter(&self) -> std::slice::Iter<Rrset> {
        self.rrsets.iter()
    }

    /// Returns the number of [`Rrset`]s in the `RrsetList`.
    pub fn len(&self) -> usize {
        self.rrsets.len()
    }

    /// Returns whether the `RrsetList` is empty.
    pub fn is_empty(&self) -> bool {
        self.rrsets.is_empty()
    }
}

/// An error signaling that a record cannot be added to an
/// [`RrsetList`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RrsetListAddError {
    /// The record's [`Class`] differs from the rest of the records in
    /// the [`RrsetList`].
    ClassMismatch,

    /// The record's [`Ttl`] differs from the rest of the records in its
    /// [`Rrset`].
    TtlMismatch,
}

impl fmt::Display for RrsetListAddError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ClassMismatch => {
                f.write_str("the record's class does not match the rest of the list")
            }
            Self::TtlMismatch => {
                f.write_str("the record's TTL does not match the rest of its RRset")
            }
        }
    }
}

impl std::error::Error for RrsetListAddError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn rdata(octets: &[u8]) -> &Rdata {
        Rdata::try_from_octets(octets).unwrap()
    }

    #[test]
    fn rrset_list_groups_by_type() {
        let mut list = RrsetList::new();
        list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 1]))
            .unwrap();
        list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 2]))
            .unwrap();
        list.add(Type::TXT, Class::IN, Ttl::from(300), rdata(b"\x04test"))
            .unwrap();
        assert_eq!(list.len(), 2);
        let a_rrset = list.lookup(Type::A).unwrap();
        assert_eq!(a_rrset.n_rdatas(), 2);
        assert_eq!(list.lookup(Type::AAAA).map(|_| ()), None);
    }

    #[test]
    fn rrset_discards_duplicate_rdata() {
        let mut list = RrsetList::new();
        for _ in 0..2 {
            list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 1]))
                .unwrap();
        }
        assert_eq!(list.lookup(Type::A).unwrap().n_rdatas(), 1);
    }

    #[test]
    fn rrset_list_rejects_mismatches() {
        let mut list = RrsetList::new();
        list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 1]))
            .unwrap();
        assert_eq!(
            list.add(Type::A, Class::CH, Ttl::from(3600), rdata(&[127, 0, 0, 2])),
            Err(RrsetListAddError::ClassMismatch)
        );
        assert_eq!(
            list.add(Type::A, Class::IN, Ttl::from(7200), rdata(&[127, 0, 0, 2])),
            Err(RrsetListAddError::TtlMismatch)
        );
    }

    #[test]
    fn rdata_iteration_round_trips() {
        let mut list = RrsetList::new();
        list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 1]))
            .unwrap();
        list.add(Type::A, Class::IN, Ttl::from(3600), rdata(&[127, 0, 0, 2]))
            .unwrap();
        let collected: Vec<&[u8]> = list
            .lookup(Type::A)
            .unwrap()
            .rdatas()
            .map(Rdata::octets)
            .collect();
        assert_eq!(collected, vec![&[127, 0, 0, 1][..], &[127, 0, 0, 2][..]]);
    }

    #[test]
    fn type_parses_and_displays() {
        assert_eq!("aaaa".parse::<Type>().unwrap(), Type::AAAA);
        assert_eq!("TYPE252".parse::<Type>().unwrap(), Type::from(252));
        assert_eq!(Type::from(252).to_string(), "TYPE252");
        assert!("BOGUS".parse::<Type>().is_err());
    }
}
