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

//! The [`ZoneDataLoader`] contract and the stock [`SourceLoader`].

use std::fmt;
use std::sync::Arc;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Ttl, Type};
use crate::segment::{MemorySegment, SegmentError};

use super::data::ZoneData;

/// A one-shot worker that produces the [`ZoneData`] for one zone.
///
/// Loaders are created by a [`LoaderCreator`] for each reload and
/// driven by a [`ZoneWriter`](super::ZoneWriter). The life cycle is:
/// zero or more [`load_incremental`] calls until one returns `true`
/// (or a single [`load`]), then exactly one [`commit`] when the writer
/// installs.
///
/// [`load`]: ZoneDataLoader::load
/// [`load_incremental`]: ZoneDataLoader::load_incremental
/// [`commit`]: ZoneDataLoader::commit
pub trait ZoneDataLoader {
    /// Performs up to `count_limit` units of work (all remaining work
    /// if `count_limit` is zero). Returns `true` once loading is
    /// complete, after which the result is available from
    /// [`loaded_data`](ZoneDataLoader::loaded_data).
    fn load_incremental(&mut self, count_limit: usize) -> Result<bool, LoaderError>;

    /// Performs the complete load in one step.
    fn load(&mut self) -> Result<Arc<ZoneData>, LoaderError> {
        let completed = self.load_incremental(0)?;
        debug_assert!(completed);
        self.loaded_data().ok_or_else(|| {
            LoaderError::Other("loader completed without producing zone data".into())
        })
    }

    /// Returns the loaded data once loading is complete.
    fn loaded_data(&self) -> Option<Arc<ZoneData>>;

    /// Returns whether the loaded data aliases the previously installed
    /// data (an in-place update). When this returns `true` the writer
    /// must not destroy the displaced data during cleanup, since it is
    /// the live zone's storage.
    fn is_data_reused(&self) -> bool {
        false
    }

    /// Finalizes the load, returning the data to install (usually the
    /// passed `data`, but implementations may substitute).
    ///
    /// May fail with [`LoaderError::SegmentGrown`] exactly as loading
    /// can, in which case the caller discards everything it holds into
    /// the segment and retries. Any other failure means the candidate
    /// data cannot be trusted.
    fn commit(&mut self, data: Arc<ZoneData>) -> Result<Arc<ZoneData>, LoaderError>;
}

/// The factory through which a [`ZoneWriter`](super::ZoneWriter)
/// obtains a fresh loader for each reload. It receives the segment's
/// memory and the currently installed data for the zone (if any), so
/// that implementations supporting in-place updates can reuse it.
pub type LoaderCreator<'a> = Box<
    dyn Fn(&'a (dyn MemorySegment + Send + Sync), Option<Arc<ZoneData>>) -> Box<dyn ZoneDataLoader + 'a>
        + 'a,
>;

////////////////////////////////////////////////////////////////////////
// LOADER ERRORS                                                      //
////////////////////////////////////////////////////////////////////////

/// Errors reported by a [`ZoneDataLoader`].
#[derive(Debug)]
pub enum LoaderError {
    /// The source data is malformed. This is the one recoverable
    /// failure: the writer either propagates it (strict mode) or
    /// records the message and publishes an empty zone (lenient mode).
    Data(String),

    /// The backing segment grew and was relocated mid-operation; the
    /// caller retries from a safe re-entry point.
    SegmentGrown,

    /// Any other failure. The writer treats the candidate data as
    /// corrupt, publishes an empty placeholder, and propagates this
    /// unchanged.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<SegmentError> for LoaderError {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::Grown => Self::SegmentGrown,
            other => Self::Other(other.into()),
        }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Data(msg) => write!(f, "malformed zone data: {}", msg),
            Self::SegmentGrown => f.write_str("the memory segment grew during loading"),
            Self::Other(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RECORD SOURCES                                                     //
////////////////////////////////////////////////////////////////////////

/// One resource record delivered by a [`RecordSource`].
pub struct Record {
    pub owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    pub rdata: Vec<u8>,
}

/// An error from a [`RecordSource`]. Sources report everything as a
/// data problem with a human-readable description; the distinction
/// that matters to the writer (recoverable or not) is made by the
/// loader, and a source that cannot produce its records is always the
/// recoverable kind.
#[derive(Debug)]
pub struct SourceError(String);

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SourceError {}

/// The external collaborator feeding the stock loader: anything that
/// can produce the records of one zone, in any order. The bundled
/// [`zone_file::Parser`](crate::zone_file::Parser) is the usual
/// implementation; tests use in-memory vectors.
pub trait RecordSource {
    /// Produces the next record, or `None` when the source is
    /// exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

impl RecordSource for std::vec::IntoIter<Record> {
    fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        Ok(self.next())
    }
}

////////////////////////////////////////////////////////////////////////
// THE STOCK LOADER                                                   //
////////////////////////////////////////////////////////////////////////

/// A [`ZoneDataLoader`] that builds a fresh [`ZoneData`] by draining a
/// [`RecordSource`].
///
/// One unit of incremental work is one record. The loaded zone must
/// carry an SOA record at its apex; a source that ends without one is
/// malformed ([`LoaderError::Data`]). This loader never reuses the
/// previously installed data and has no deferred work, so its
/// [`commit`](ZoneDataLoader::commit) only hands the data back.
pub struct SourceLoader<'a, S> {
    mem: &'a (dyn MemorySegment + Send + Sync),
    origin: Name,
    class: Class,
    source: S,
    building: Option<ZoneData>,
    loaded: Option<Arc<ZoneData>>,
}

impl<'a, S: RecordSource> SourceLoader<'a, S> {
    /// Creates a loader that will populate a zone named `origin` of
    /// `class` from `source`, in the segment backed by `mem`.
    pub fn new(
        mem: &'a (dyn MemorySegment + Send + Sync),
        origin: Name,
        class: Class,
        source: S,
    ) -> Self {
        Self {
            mem,
            origin,
            class,
            source,
            building: None,
            loaded: None,
        }
    }

    /// Discards the partially built data, settling its accounting.
    fn discard_partial(&mut self) {
        if let Some(partial) = self.building.take() {
            ZoneData::destroy(self.mem, Arc::new(partial));
        }
    }

    fn load_step(&mut self) -> Result<Option<()>, LoaderError> {
        let record = match self.source.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => return Err(LoaderError::Data(e.to_string())),
        };
        let rdata = Rdata::try_from_octets(&record.rdata)
            .map_err(|e| LoaderError::Data(e.to_string()))?;
        self.building
            .as_mut()
            .expect("load_step called without zone data under construction")
            .add_record(
                self.mem,
                &record.owner,
                record.rr_type,
                record.class,
                record.ttl,
                rdata,
            )?;
        Ok(Some(()))
    }
}

impl<S: RecordSource> ZoneDataLoader for SourceLoader<'_, S> {
    fn load_incremental(&mut self, count_limit: usize) -> Result<bool, LoaderError> {
        if self.loaded.is_some() {
            return Ok(true);
        }
        if self.building.is_none() {
            self.building = Some(ZoneData::create(
                self.mem,
                self.origin.clone(),
                self.class,
            )?);
        }

        let mut remaining = count_limit;
        loop {
            match self.load_step() {
                Ok(Some(())) => {}
                Ok(None) => break,
                Err(e) => {
                    // Segment growth is retryable and must not tear the
                    // loader down; everything else invalidates the
                    // partial build.
                    if !matches!(e, LoaderError::SegmentGrown) {
                        self.discard_partial();
                    }
                    return Err(e);
                }
            }
            if count_limit != 0 {
                remaining -= 1;
                if remaining == 0 {
                    return Ok(false);
                }
            }
        }

        let data = self.building.take().unwrap();
        let apex_has_soa = data
            .find(&self.origin)
            .map_or(false, |rrsets| rrsets.lookup(Type::SOA).is_some());
        if !apex_has_soa {
            ZoneData::destroy(self.mem, Arc::new(data));
            return Err(LoaderError::Data(format!(
                "zone {} has no SOA record at its apex",
                self.origin,
            )));
        }
        self.loaded = Some(Arc::new(data));
        Ok(true)
    }

    fn loaded_data(&self) -> Option<Arc<ZoneData>> {
        self.loaded.clone()
    }

    fn commit(&mut self, data: Arc<ZoneData>) -> Result<Arc<ZoneData>, LoaderError> {
        Ok(data)
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
    }

    fn soa_record() -> Record {
        Record {
            owner: ORIGIN.clone(),
            rr_type: Type::SOA,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: vec![0; 22],
        }
    }

    fn a_record(owner: &Name, last_octet: u8) -> Record {
        Record {
            owner: owner.clone(),
            rr_type: Type::A,
            class: Class::IN,
            ttl: Ttl::from(3600),
            rdata: vec![127, 0, 0, last_octet],
        }
    }

    #[test]
    fn loads_complete_zone() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let records = vec![soa_record(), a_record(&WWW, 1), a_record(&WWW, 2)];
        let mut loader = SourceLoader::new(
            segment.memory(),
            ORIGIN.clone(),
            Class::IN,
            records.into_iter(),
        );
        let data = loader.load().unwrap();
        assert!(data.find(&WWW).unwrap().lookup(Type::A).is_some());
        let committed = loader.commit(data.clone()).unwrap();
        assert!(Arc::ptr_eq(&committed, &data));
        assert!(!loader.is_data_reused());
    }

    #[test]
    fn incremental_loading_reports_progress() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let records = vec![soa_record(), a_record(&WWW, 1), a_record(&WWW, 2)];
        let mut loader = SourceLoader::new(
            segment.memory(),
            ORIGIN.clone(),
            Class::IN,
            records.into_iter(),
        );
        assert!(!loader.load_incremental(2).unwrap());
        assert!(loader.loaded_data().is_none());
        assert!(loader.load_incremental(2).unwrap());
        assert!(loader.loaded_data().is_some());
        // Further calls are no-ops reporting completion.
        assert!(loader.load_incremental(2).unwrap());
    }

    #[test]
    fn missing_soa_is_a_data_error() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let records = vec![a_record(&WWW, 1)];
        let mut loader = SourceLoader::new(
            segment.memory(),
            ORIGIN.clone(),
            Class::IN,
            records.into_iter(),
        );
        assert!(matches!(loader.load(), Err(LoaderError::Data(_))));
        // The partial build's accounting was settled.
        assert_eq!(segment.memory().in_use(), 0);
    }

    #[test]
    fn foreign_record_is_a_data_error() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let outside: Name = "www.example.com.".parse().unwrap();
        let records = vec![soa_record(), a_record(&outside, 1)];
        let mut loader = SourceLoader::new(
            segment.memory(),
            ORIGIN.clone(),
            Class::IN,
            records.into_iter(),
        );
        assert!(matches!(loader.load(), Err(LoaderError::Data(_))));
        assert_eq!(segment.memory().in_use(), 0);
    }
}
