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

//! Implementation of the [`Name`] type for domain names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum number of labels in a domain name. A name of maximum
/// length consists of 127 single-octet labels plus the root label.
pub const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub const MAX_LABEL_LEN: usize = 63;

/// A domain name, stored in its canonical (uncompressed) on-the-wire
/// representation.
///
/// The wire representation ([RFC 1035 § 3.1]) is a sequence of labels,
/// each prefixed by a length octet, terminated by the zero-length root
/// label. `Name` keeps exactly those octets, preserving the case in
/// which the name was written; all comparisons ([`PartialEq`],
/// [`Hash`], [`Ord`]) are nevertheless ASCII-case-insensitive, as
/// [RFC 4343] requires of name matching. This makes `Name` directly
/// usable as a lookup key in the zone table.
///
/// `Name`s are absolute. The [`FromStr`] implementation therefore
/// expects a trailing dot (`example.org.`); relative names only exist
/// transiently while reading zone files, where they are completed
/// against `$ORIGIN` (see [`Name::concatenated_with`]).
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
/// [RFC 4343]: https://datatracker.ietf.org/doc/html/rfc4343
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
}

impl Name {
    /// Returns the root name (`.`).
    pub fn root() -> Self {
        Self {
            wire: Box::new([0]),
        }
    }

    /// Constructs a `Name` from its uncompressed on-the-wire
    /// representation. The entire buffer must be consumed by the name.
    pub fn try_from_wire(octets: &[u8]) -> Result<Self, Error> {
        let mut offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        collect_label_offsets(octets, &mut offsets)?;
        Ok(Self {
            wire: octets.into(),
        })
    }

    /// Returns the on-the-wire representation of the `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the length of the on-the-wire representation. Since the
    /// wire form terminates with the root label, this is always at
    /// least one.
    pub fn len(&self) -> usize {
        self.wire.len()
    }

    /// A `Name` always contains at least the root label, so this
    /// always returns `false`. (Provided for the benefit of callers
    /// treating the wire form as a collection.)
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Returns the number of labels in the `Name`, counting the null
    /// (root) label.
    pub fn n_labels(&self) -> usize {
        self.labels().count()
    }

    /// Returns an iterator over the labels of the `Name`, from leftmost
    /// to rightmost. The terminal root label is *not* produced.
    pub fn labels(&self) -> Labels {
        Labels { cursor: &self.wire }
    }

    /// Returns the `Name` constructed by stripping the leftmost label
    /// from this one, or [`None`] if this is the root name.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let first_len = self.wire[0] as usize;
            Some(Self {
                wire: self.wire[1 + first_len..].into(),
            })
        }
    }

    /// Returns whether `self` equals, or is a subdomain of, `other`.
    pub fn eq_or_subdomain_of(&self, other: &Self) -> bool {
        if self.wire.len() < other.wire.len() {
            return false;
        }
        let tail = &self.wire[self.wire.len() - other.wire.len()..];
        if !tail.eq_ignore_ascii_case(&other.wire) {
            return false;
        }
        // The length match above is meaningless if the candidate tail
        // starts in the middle of one of our labels, so verify that it
        // falls on a label boundary.
        let boundary = self.wire.len() - other.wire.len();
        let mut offset = 0;
        while offset < boundary {
            offset += 1 + self.wire[offset] as usize;
        }
        offset == boundary
    }

    /// Returns the absolute `Name` formed by appending `suffix` to
    /// `self`'s labels. This is how relative owner names from zone
    /// files are completed against `$ORIGIN`.
    pub fn concatenated_with(&self, suffix: &Self) -> Result<Self, Error> {
        // Drop our terminal root label, then append the suffix whole.
        let mut wire = Vec::with_capacity(self.wire.len() - 1 + suffix.wire.len());
        wire.extend_from_slice(&self.wire[..self.wire.len() - 1]);
        wire.extend_from_slice(&suffix.wire);
        if wire.len() > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        Self::try_from_wire(&wire)
    }
}

/// Validates wire-form octets, recording the offset of each label.
/// Rejects overlong labels and names and anything that does not end
/// exactly at the root label.
fn collect_label_offsets(
    octets: &[u8],
    offsets: &mut ArrayVec<u8, MAX_N_LABELS>,
) -> Result<(), Error> {
    if octets.len() > MAX_WIRE_LEN {
        return Err(Error::NameTooLong);
    }
    let mut offset = 0;
    loop {
        let len = *octets.get(offset).ok_or(Error::InvalidWireFormat)? as usize;
        if len > MAX_LABEL_LEN {
            return Err(Error::LabelTooLong);
        }
        if offsets.try_push(offset as u8).is_err() {
            return Err(Error::NameTooLong);
        }
        if len == 0 {
            return if offset + 1 == octets.len() {
                Ok(())
            } else {
                Err(Error::InvalidWireFormat)
            };
        }
        offset += 1 + len;
    }
}

////////////////////////////////////////////////////////////////////////
// LABEL ITERATION                                                    //
////////////////////////////////////////////////////////////////////////

/// An iterator over the labels of a [`Name`]; see [`Name::labels`].
pub struct Labels<'a> {
    cursor: &'a [u8],
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.cursor.first()? as usize;
        if len == 0 {
            None
        } else {
            let label = &self.cursor[1..1 + len];
            self.cursor = &self.cursor[1 + len..];
            Some(label)
        }
    }
}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// COMPARISON AND HASHING                                             //
////////////////////////////////////////////////////////////////////////

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        // Plain case-folded octet order. This is *not* the DNSSEC
        // canonical ordering of RFC 4034 § 6.1; nothing in this crate
        // requires it, and this is cheaper.
        let lhs = self.wire.iter().map(u8::to_ascii_lowercase);
        let rhs = other.wire.iter().map(u8::to_ascii_lowercase);
        lhs.cmp(rhs)
    }
}

////////////////////////////////////////////////////////////////////////
// TEXTUAL REPRESENTATION                                             //
////////////////////////////////////////////////////////////////////////

impl FromStr for Name {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text == "." {
            return Ok(Self::root());
        }
        let Some(without_trailing_dot) = text.strip_suffix('.') else {
            return Err(Error::NotAbsolute);
        };
        if without_trailing_dot.is_empty() {
            return Err(Error::EmptyLabel);
        }

        let mut wire = Vec::with_capacity(text.len() + 1);
        for label in without_trailing_dot.split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            if !label.bytes().all(|b| b.is_ascii() && b != b' ') {
                return Err(Error::InvalidLabel);
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        if wire.len() > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        Ok(Self { wire: wire.into() })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &octet in label {
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    // RFC 1035 § 5.1 escaping for everything else.
                    write!(f, "\\{:03}", octet)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise when constructing a [`Name`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    EmptyLabel,
    InvalidLabel,
    InvalidWireFormat,
    LabelTooLong,
    NameTooLong,
    NotAbsolute,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyLabel => f.write_str("domain name contains an empty label"),
            Self::InvalidLabel => f.write_str("domain name contains an invalid label"),
            Self::InvalidWireFormat => f.write_str("invalid on-the-wire domain name"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("domain name exceeds 255 octets"),
            Self::NotAbsolute => f.write_str("domain name is not absolute (missing trailing dot)"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let name: Name = "www.Example.Org.".parse().unwrap();
        assert_eq!(name.wire_repr(), b"\x03www\x07Example\x03Org\x00");
        assert_eq!(name.to_string(), "www.Example.Org.");
        assert_eq!(Name::root().to_string(), ".");
    }

    #[test]
    fn rejects_bad_text() {
        assert_eq!("example.org".parse::<Name>(), Err(Error::NotAbsolute));
        assert_eq!("example..org.".parse::<Name>(), Err(Error::EmptyLabel));
        let overlong_label = format!("{}.org.", "a".repeat(64));
        assert_eq!(overlong_label.parse::<Name>(), Err(Error::LabelTooLong));
        let overlong_name = format!("{}.", vec!["a"; 130].join("."));
        assert_eq!(overlong_name.parse::<Name>(), Err(Error::NameTooLong));
    }

    #[test]
    fn comparison_ignores_case() {
        let lower: Name = "example.org.".parse().unwrap();
        let mixed: Name = "EXAMPLE.orG.".parse().unwrap();
        assert_eq!(lower, mixed);
        assert_eq!(lower.cmp(&mixed), Ordering::Equal);

        let mut hasher_a = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_b = std::collections::hash_map::DefaultHasher::new();
        lower.hash(&mut hasher_a);
        mixed.hash(&mut hasher_b);
        assert_eq!(hasher_a.finish(), hasher_b.finish());
    }

    #[test]
    fn labels_iterate_left_to_right() {
        let name: Name = "www.example.org.".parse().unwrap();
        let labels: Vec<&[u8]> = name.labels().collect();
        assert_eq!(labels, vec![&b"www"[..], &b"example"[..], &b"org"[..]]);
        assert_eq!(name.n_labels(), 3);
        assert_eq!(Name::root().n_labels(), 0);
    }

    #[test]
    fn parent_strips_leftmost_label() {
        let name: Name = "www.example.org.".parse().unwrap();
        let parent = name.parent().unwrap();
        assert_eq!(parent, "example.org.".parse().unwrap());
        assert_eq!(Name::root().parent(), None);
    }

    #[test]
    fn subdomain_relationships() {
        let apex: Name = "example.org.".parse().unwrap();
        let www: Name = "www.EXAMPLE.org.".parse().unwrap();
        let other: Name = "example.com.".parse().unwrap();
        assert!(www.eq_or_subdomain_of(&apex));
        assert!(apex.eq_or_subdomain_of(&apex));
        assert!(!apex.eq_or_subdomain_of(&www));
        assert!(!other.eq_or_subdomain_of(&apex));
        assert!(apex.eq_or_subdomain_of(&Name::root()));
    }

    #[test]
    fn subdomain_check_respects_label_boundaries() {
        // "pexample.org." ends with the same octets as "example.org."
        // would if we compared text, but the label boundaries differ.
        let apex: Name = "example.org.".parse().unwrap();
        let similar: Name = "pexample.org.".parse().unwrap();
        assert!(!similar.eq_or_subdomain_of(&apex));
    }

    #[test]
    fn concatenation_completes_relative_names() {
        let relative: Name = "www.".parse().unwrap();
        let origin: Name = "example.org.".parse().unwrap();
        let completed = relative.concatenated_with(&origin).unwrap();
        assert_eq!(completed, "www.example.org.".parse().unwrap());

        let too_long: Name = format!("{}.", vec!["aaaaaaaa"; 28].join("."))
            .parse()
            .unwrap();
        assert_eq!(
            too_long.concatenated_with(&too_long),
            Err(Error::NameTooLong)
        );
    }

    #[test]
    fn wire_round_trip() {
        let name = Name::try_from_wire(b"\x03www\x07example\x03org\x00").unwrap();
        assert_eq!(name.to_string(), "www.example.org.");
        assert!(Name::try_from_wire(b"\x03www").is_err());
        assert!(Name::try_from_wire(b"\x03www\x00\x00").is_err());
    }
}
