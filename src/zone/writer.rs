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

//! Implementation of the [`ZoneWriter`] structure.

use std::fmt;
use std::sync::Arc;

use log::error;

use crate::class::Class;
use crate::name::Name;
use crate::segment::{SegmentError, ZoneTableSegment};

use super::data::ZoneData;
use super::loader::{LoaderCreator, LoaderError, ZoneDataLoader};
use super::table::{FindResultCode, ZoneFlags};

/// How many times [`ZoneWriter::install`] will call the loader's commit
/// before giving up on a segment that reports growth every time. Growth
/// enlarges the segment, so a second report for the same commit means
/// something other than normal growth pressure is going on.
const COMMIT_ATTEMPT_LIMIT: usize = 2;

/// The transactional engine that installs a new copy of one zone into a
/// segment's [`ZoneTable`](super::ZoneTable).
///
/// A `ZoneWriter` is a single-use state machine:
///
/// ```text
///             load (ok)          install (ok)        cleanup
///    Init ───────────────► Loaded ──────────► Installed ─────► Cleaned
///      │                     │
///      └─ load (error):      └─ any other call: Error::InvalidOperation
///         writer unchanged,
///         still Init
/// ```
///
/// [`load`](ZoneWriter::load) obtains a fresh loader from the factory
/// supplied at construction and drives it, optionally in bounded
/// increments. A failed load leaves the writer exactly as it was
/// (strong guarantee), so the caller may retry.
/// [`install`](ZoneWriter::install) performs the loader's final commit
/// and the table swap, retrying when the backing segment grows, and
/// publishing an explicit empty zone rather than half-written data if
/// the commit fails in any unexpected way.
/// [`cleanup`](ZoneWriter::cleanup) destroys whatever data the writer
/// still owns: the loaded-but-never-installed copy, or the copy
/// displaced by a successful install. Dropping the writer cleans up if
/// the caller has not.
///
/// A writer is bound to one zone (name and class) in one segment, and
/// is not safe for concurrent use; create one writer per reload.
pub struct ZoneWriter<'a> {
    segment: &'a ZoneTableSegment,
    loader_creator: LoaderCreator<'a>,
    origin: Name,
    class: Class,
    allow_load_error: bool,
    state: State,
    loader: Option<Box<dyn ZoneDataLoader + 'a>>,
    /// The data the writer currently owns: the loaded candidate before
    /// install, the displaced data after.
    data: Option<Arc<ZoneData>>,
    /// Whether the data to install is the empty placeholder, to be
    /// flagged [`ZoneFlags::EMPTY`] in the table.
    install_empty: bool,
    /// Whether the displaced data should be destroyed during cleanup.
    /// Cleared when the loader reuses the installed data in place.
    destroy_old_data: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Init,
    /// An incremental load is underway: the loader exists but has not
    /// yet reported completion.
    Loading,
    Loaded,
    Installed,
    Cleaned,
}

impl<'a> ZoneWriter<'a> {
    /// Creates a writer that will reload the zone `origin`/`class` in
    /// `segment`, obtaining its loader from `loader_creator`.
    ///
    /// With `allow_load_error` set, a malformed source does not fail
    /// the reload: [`load`](ZoneWriter::load) reports success and
    /// [`install`](ZoneWriter::install) publishes an explicit empty
    /// zone in place of the broken data.
    ///
    /// Fails with [`Error::InvalidOperation`] if `segment` is not
    /// writable.
    pub fn new(
        segment: &'a ZoneTableSegment,
        loader_creator: LoaderCreator<'a>,
        origin: Name,
        class: Class,
        allow_load_error: bool,
    ) -> Result<Self, Error> {
        if !segment.is_writable() {
            return Err(Error::InvalidOperation(
                "attempt to construct a ZoneWriter for a read-only segment",
            ));
        }
        Ok(Self {
            segment,
            loader_creator,
            origin,
            class,
            allow_load_error,
            state: State::Init,
            loader: None,
            data: None,
            install_empty: false,
            destroy_old_data: true,
        })
    }

    /// Loads the new copy of the zone.
    ///
    /// With `count_limit == 0` the whole load happens in this call and
    /// `Ok(true)` is returned. With a positive `count_limit` at most
    /// that many units of work are performed; `Ok(false)` means more
    /// calls are needed, `Ok(true)` that loading is complete.
    ///
    /// If the loader reports malformed data and `allow_load_error` was
    /// not set, or fails in any other way, the error is propagated and
    /// the writer is left exactly as it was before the call, so the
    /// load may be retried. In lenient mode a malformed source instead
    /// records its description into `error_out` (when provided) and
    /// completes the load with the empty placeholder.
    ///
    /// Calling `load` again after it has returned `Ok(true)`, or after
    /// install or cleanup, fails with [`Error::InvalidOperation`].
    pub fn load(
        &mut self,
        count_limit: usize,
        mut error_out: Option<&mut String>,
    ) -> Result<bool, Error> {
        if self.state != State::Init && self.state != State::Loading {
            return Err(Error::InvalidOperation("attempt to load a zone twice"));
        }

        // On the first call, look up the currently installed data (so
        // the loader may update it in place) and create the loader.
        if self.loader.is_none() {
            let found = self.segment.table().find(&self.origin);
            let old_data = match found.code {
                FindResultCode::Success => found.zone_data,
                _ => None,
            };
            let segment = self.segment;
            self.loader = Some((self.loader_creator)(segment.memory(), old_data));
            self.state = State::Loading;
        }

        let loader = self.loader.as_mut().unwrap();
        self.destroy_old_data = !loader.is_data_reused();

        match loader.load_incremental(count_limit) {
            Ok(false) => return Ok(false),
            Ok(true) => match loader.loaded_data() {
                Some(data) => {
                    self.data = Some(data);
                    self.install_empty = false;
                }
                None => {
                    // A loader that reports completion without data is
                    // buggy; reject it and return to the initial state.
                    self.reset_to_init();
                    return Err(Error::InvalidOperation(
                        "no data returned from the load action",
                    ));
                }
            },
            Err(LoaderError::Data(reason)) if self.allow_load_error => {
                if let Some(out) = error_out.as_deref_mut() {
                    *out = reason;
                }
                self.data = Some(self.create_empty_data());
                self.install_empty = true;
                self.destroy_old_data = true;
            }
            Err(e) => {
                // Strong guarantee: drop the failed loader and any
                // partial state so a retry starts from scratch.
                self.reset_to_init();
                return Err(Error::Loader(e));
            }
        }

        self.state = State::Loaded;
        Ok(true)
    }

    /// Atomically installs the loaded data into the segment's zone
    /// table. Must be called exactly once, after
    /// [`load`](ZoneWriter::load) has completed.
    ///
    /// The loader's final commit runs first. If the backing segment
    /// grows during the commit, everything held into the segment is
    /// discarded and the commit retried, up to a bounded number of
    /// attempts; persistent growth reports [`Error::SegmentGrown`] with
    /// the writer still in the loaded state, so `install` may be called
    /// again. Any other commit
    /// failure publishes an explicit empty zone at this writer's name
    /// (the table must never be left referencing half-written storage)
    /// and is then propagated unchanged.
    ///
    /// On success the previously installed data (if any) passes into
    /// the writer's ownership for [`cleanup`](ZoneWriter::cleanup).
    pub fn install(&mut self) -> Result<(), Error> {
        if self.state != State::Loaded {
            return Err(Error::InvalidOperation("no loaded data to install"));
        }

        if self.install_empty {
            // The lenient-mode placeholder skips the commit: there is
            // no loader-produced data to finalize.
            return self.install_to_table(true).map_err(Error::Segment);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let candidate = self.data.clone().expect("loaded state without data");
            let loader = self.loader.as_mut().expect("loaded state without loader");
            match loader.commit(candidate) {
                Ok(committed) => {
                    self.data = Some(committed);
                    return self.install_to_table(false).map_err(Error::Segment);
                }
                Err(LoaderError::SegmentGrown) if attempts < COMMIT_ATTEMPT_LIMIT => {
                    // The segment has already grown; retry the commit
                    // against the relocated region.
                    continue;
                }
                Err(LoaderError::SegmentGrown) => {
                    return Err(Error::SegmentGrown);
                }
                Err(e) => {
                    // The candidate data can no longer be trusted.
                    // Publish an explicit empty zone so readers never
                    // see half-written data, then let the failure
                    // surface unchanged.
                    error!(
                        "Unexpected failure committing {}/{}: {}. \
                         Publishing an empty zone in its place.",
                        self.origin, self.class, e,
                    );
                    // A candidate aliasing the installed data is still
                    // the live zone's storage; only a fresh candidate
                    // is destroyed here.
                    match self.data.take() {
                        Some(candidate) if self.destroy_old_data => {
                            ZoneData::destroy(self.segment.memory(), candidate);
                        }
                        _ => {}
                    }
                    self.data = Some(self.create_empty_data());
                    self.destroy_old_data = true;
                    if let Err(table_error) = self.install_to_table(true) {
                        // There is nothing more this writer can do for
                        // the zone; the caller sees the original
                        // failure either way.
                        error!(
                            "Failed to publish the empty zone for {}/{}: {}.",
                            self.origin, self.class, table_error,
                        );
                    }
                    return Err(Error::Loader(e));
                }
            }
        }
    }

    /// Destroys whatever [`ZoneData`] the writer still owns and ends
    /// the writer's life cycle. Safe to call in any state; calling it
    /// again is a no-op. After cleanup, neither
    /// [`load`](ZoneWriter::load) nor [`install`](ZoneWriter::install)
    /// may be called.
    pub fn cleanup(&mut self) {
        if let Some(data) = self.data.take() {
            if self.destroy_old_data {
                ZoneData::destroy(self.segment.memory(), data);
            }
        }
        self.loader = None;
        self.state = State::Cleaned;
    }

    /// Swaps `self.data` into the zone table, retrying while the
    /// segment reports growth. Each growth report leaves the segment
    /// larger, so the retry loop terminates. On success the writer is
    /// in the installed state and owns the displaced data (if it is to
    /// be destroyed); on failure the table is unchanged and the writer
    /// remains loaded.
    fn install_to_table(&mut self, empty: bool) -> Result<(), SegmentError> {
        let flags = if empty {
            ZoneFlags::EMPTY
        } else {
            ZoneFlags::NONE
        };
        loop {
            let data = self.data.clone().expect("installing without data");
            match self
                .segment
                .table()
                .add_or_replace(self.segment.memory(), &self.origin, data, flags)
            {
                Ok(displaced) => {
                    self.data = if self.destroy_old_data {
                        displaced
                    } else {
                        None
                    };
                    self.state = State::Installed;
                    return Ok(());
                }
                Err(SegmentError::Grown) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Creates the empty placeholder data, retrying while the segment
    /// reports growth.
    fn create_empty_data(&self) -> Arc<ZoneData> {
        loop {
            match ZoneData::create(self.segment.memory(), self.origin.clone(), self.class) {
                Ok(data) => return Arc::new(data),
                Err(SegmentError::Grown) => continue,
                Err(_) => {
                    // Without accounting the placeholder still serves
                    // its purpose; record nothing against the segment.
                    return Arc::new(ZoneData::zero_cost(self.origin.clone(), self.class));
                }
            }
        }
    }

    fn reset_to_init(&mut self) {
        self.loader = None;
        self.data = None;
        self.install_empty = false;
        self.destroy_old_data = true;
        self.state = State::Init;
    }
}

impl Drop for ZoneWriter<'_> {
    fn drop(&mut self) {
        if self.state != State::Cleaned {
            self.cleanup();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise during [`ZoneWriter`] operations.
#[derive(Debug)]
pub enum Error {
    /// The operation is not valid in the writer's current state, or the
    /// segment does not permit it.
    InvalidOperation(&'static str),

    /// The loader failed. For [`LoaderError::Data`] this is the
    /// strict-mode propagation of a malformed source; anything else is
    /// the unexpected-failure path, surfaced after the empty
    /// placeholder has been published.
    Loader(LoaderError),

    /// The segment kept growing across every permitted commit attempt.
    /// The writer is still in the loaded state; `install` may be
    /// retried.
    SegmentGrown,

    /// The backing store failed in a way other than growth (an I/O
    /// error on a mapped segment's file, or an attempt to reserve in a
    /// segment that became read-only).
    Segment(SegmentError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidOperation(what) => write!(f, "invalid operation: {}", what),
            Self::Loader(e) => write!(f, "zone loading failed: {}", e),
            Self::SegmentGrown => {
                f.write_str("the memory segment grew during every commit attempt")
            }
            Self::Segment(e) => write!(f, "segment failure: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loader(e) => Some(e),
            Self::Segment(e) => Some(e),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use lazy_static::lazy_static;

    use crate::rr::{Rdata, Ttl, Type};
    use crate::segment::{MemorySegment, Mode};
    use crate::zone::table::FindResult;

    use super::*;

    lazy_static! {
        static ref ORIGIN: Name = "example.org.".parse().unwrap();
        static ref SUBDOMAIN: Name = "subdomain.example.org.".parse().unwrap();
    }

    /// What the mock loader's commit should do.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum CommitBehavior {
        Succeed,
        /// Report segment growth on the first call, succeed after.
        GrowOnce,
        /// Report segment growth on every call.
        GrowAlways,
        /// Fail with an unexpected error.
        Unexpected,
    }

    /// Shared knobs and observations for the mock loader, so tests can
    /// steer behavior between writer calls.
    struct MockControl {
        load_called: Cell<bool>,
        fail_load_with_other: Cell<bool>,
        fail_load_with_data_error: Cell<bool>,
        complete_without_data: Cell<bool>,
        load_with_records: Cell<bool>,
        commit_behavior: Cell<CommitBehavior>,
        commits: Cell<u32>,
    }

    impl MockControl {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                load_called: Cell::new(false),
                fail_load_with_other: Cell::new(false),
                fail_load_with_data_error: Cell::new(false),
                complete_without_data: Cell::new(false),
                load_with_records: Cell::new(false),
                commit_behavior: Cell::new(CommitBehavior::Succeed),
                commits: Cell::new(0),
            })
        }
    }

    struct MockLoader<'a> {
        mem: &'a (dyn MemorySegment + Send + Sync),
        control: Rc<MockControl>,
        old_data: Option<Arc<ZoneData>>,
        loaded: Option<Arc<ZoneData>>,
        incremental_called: bool,
    }

    impl<'a> MockLoader<'a> {
        fn run_load(&mut self) -> Result<(), LoaderError> {
            self.control.load_called.set(true);
            if self.control.fail_load_with_other.get() {
                return Err(LoaderError::Other("mock loader failure".into()));
            }
            if self.control.fail_load_with_data_error.get() {
                return Err(LoaderError::Data("faked malformed zone".to_owned()));
            }
            if self.control.complete_without_data.get() {
                return Ok(());
            }
            if let Some(ref old) = self.old_data {
                self.loaded = Some(old.clone());
                return Ok(());
            }
            let mut data = ZoneData::create(self.mem, ORIGIN.clone(), Class::IN).unwrap();
            if self.control.load_with_records.get() {
                data.add_record(
                    self.mem,
                    &SUBDOMAIN,
                    Type::A,
                    Class::IN,
                    Ttl::from(3600),
                    Rdata::try_from_octets(&[192, 0, 2, 1]).unwrap(),
                )
                .unwrap();
            }
            self.loaded = Some(Arc::new(data));
            Ok(())
        }
    }

    impl ZoneDataLoader for MockLoader<'_> {
        fn load_incremental(&mut self, count_limit: usize) -> Result<bool, LoaderError> {
            // With a positive count limit, report "more work remains"
            // on the first call and complete on the second.
            if count_limit != 0 && !self.incremental_called {
                self.incremental_called = true;
                return Ok(false);
            }
            self.run_load()?;
            Ok(true)
        }

        fn loaded_data(&self) -> Option<Arc<ZoneData>> {
            self.loaded.clone()
        }

        fn is_data_reused(&self) -> bool {
            !self.control.complete_without_data.get() && self.old_data.is_some()
        }

        fn commit(&mut self, data: Arc<ZoneData>) -> Result<Arc<ZoneData>, LoaderError> {
            let commits = self.control.commits.get();
            self.control.commits.set(commits + 1);
            match self.control.commit_behavior.get() {
                CommitBehavior::GrowOnce if commits == 0 => Err(LoaderError::SegmentGrown),
                CommitBehavior::GrowAlways => Err(LoaderError::SegmentGrown),
                CommitBehavior::Unexpected => {
                    Err(LoaderError::Other("mock commit failure".into()))
                }
                _ => Ok(data),
            }
        }
    }

    fn make_writer<'a>(
        segment: &'a ZoneTableSegment,
        control: &Rc<MockControl>,
        reuse_old_data: bool,
        allow_load_error: bool,
    ) -> ZoneWriter<'a> {
        let control = control.clone();
        let creator: LoaderCreator<'a> = Box::new(move |mem, old_data| {
            let old_data = if reuse_old_data { old_data } else { None };
            Box::new(MockLoader {
                mem,
                control: control.clone(),
                old_data,
                loaded: None,
                incremental_called: false,
            })
        });
        ZoneWriter::new(segment, creator, ORIGIN.clone(), Class::IN, allow_load_error).unwrap()
    }

    fn find(segment: &ZoneTableSegment) -> FindResult {
        segment.table().find(&ORIGIN)
    }

    #[test]
    fn rejects_read_only_segment() {
        let segment = ZoneTableSegment::local(Mode::ReadOnly);
        let control = MockControl::new();
        let control_for_creator = control.clone();
        let creator: LoaderCreator = Box::new(move |mem, _| {
            Box::new(MockLoader {
                mem,
                control: control_for_creator.clone(),
                old_data: None,
                loaded: None,
                incremental_called: false,
            })
        });
        assert!(matches!(
            ZoneWriter::new(&segment, creator, ORIGIN.clone(), Class::IN, false),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn correct_call_sequence() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.load_with_records.set(true);
        let mut writer = make_writer(&segment, &control, false, false);

        assert!(!control.load_called.get());
        assert!(writer.load(0, None).unwrap());
        assert!(control.load_called.get());

        writer.install().unwrap();
        writer.cleanup();

        let result = find(&segment);
        assert_eq!(result.code, FindResultCode::Success);
        assert!(!result.flags.contains(ZoneFlags::EMPTY));
        let data = result.zone_data.unwrap();
        assert!(data.find(&SUBDOMAIN).unwrap().lookup(Type::A).is_some());
    }

    #[test]
    fn incremental_load_then_install() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        assert!(!writer.load(1000, None).unwrap());
        assert!(writer.load(1000, None).unwrap());
        writer.install().unwrap();
        writer.cleanup();
        assert_eq!(find(&segment).code, FindResultCode::Success);
    }

    #[test]
    fn load_twice_is_rejected() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        control.load_called.set(false);
        assert!(matches!(
            writer.load(0, None),
            Err(Error::InvalidOperation(_))
        ));
        assert!(!control.load_called.get());

        // The writer is not damaged; install and cleanup still work.
        writer.install().unwrap();
        writer.cleanup();
    }

    #[test]
    fn load_after_install_or_cleanup_is_rejected() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        writer.install().unwrap();
        assert!(matches!(
            writer.load(0, None),
            Err(Error::InvalidOperation(_))
        ));
        writer.cleanup();
        assert!(matches!(
            writer.load(0, None),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn install_at_the_wrong_time_is_rejected() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));
        writer.load(0, None).unwrap();
        writer.install().unwrap();
        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn cleanup_without_install_releases_the_data() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        assert_ne!(segment.memory().in_use(), 0);
        writer.cleanup();
        assert_eq!(segment.memory().in_use(), 0);

        // After cleanup, installing is no longer possible.
        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);
        writer.load(0, None).unwrap();
        writer.cleanup();
        writer.cleanup();
        assert_eq!(segment.memory().in_use(), 0);
    }

    #[test]
    fn drop_cleans_up() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        {
            let mut writer = make_writer(&segment, &control, false, false);
            writer.load(0, None).unwrap();
            assert_ne!(segment.memory().in_use(), 0);
        }
        assert_eq!(segment.memory().in_use(), 0);
    }

    #[test]
    fn unexpected_load_failure_keeps_the_writer_usable() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, false);

        control.fail_load_with_other.set(true);
        assert!(matches!(
            writer.load(0, None),
            Err(Error::Loader(LoaderError::Other(_)))
        ));
        assert!(control.load_called.get());
        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));

        // Strong guarantee: the failed load left the writer in its
        // prior state, so a retry succeeds end to end.
        control.fail_load_with_other.set(false);
        control.load_with_records.set(true);
        writer.load(0, None).unwrap();
        // A later failure injection must not disturb the loaded state.
        control.load_with_records.set(false);
        assert!(matches!(
            writer.load(0, None),
            Err(Error::InvalidOperation(_))
        ));

        writer.install().unwrap();
        let result = find(&segment);
        assert_eq!(result.code, FindResultCode::Success);
        let data = result.zone_data.unwrap();
        assert!(data.find(&SUBDOMAIN).unwrap().lookup(Type::A).is_some());
        writer.cleanup();
    }

    #[test]
    fn data_error_propagates_in_strict_mode() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.fail_load_with_data_error.set(true);

        let mut writer = make_writer(&segment, &control, false, false);
        let mut error_out = String::new();
        assert!(matches!(
            writer.load(0, Some(&mut error_out)),
            Err(Error::Loader(LoaderError::Data(_)))
        ));
        // In strict mode the message template is left untouched.
        assert_eq!(error_out, "");
        // Nothing was loaded, so nothing can be installed...
        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));
        // ...and the table was never touched.
        assert_eq!(find(&segment).code, FindResultCode::NotFound);
    }

    #[test]
    fn data_error_publishes_empty_zone_in_lenient_mode() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.fail_load_with_data_error.set(true);

        let mut writer = make_writer(&segment, &control, false, true);
        let mut error_out = String::new();
        assert!(writer.load(0, Some(&mut error_out)).unwrap());
        assert_ne!(error_out, "");
        writer.install().unwrap();
        writer.cleanup();

        let result = find(&segment);
        assert_eq!(result.code, FindResultCode::Success);
        assert!(result.flags.contains(ZoneFlags::EMPTY));
        assert!(result.zone_data.unwrap().is_empty());
    }

    #[test]
    fn lenient_mode_leaves_error_out_alone_on_success() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        let mut writer = make_writer(&segment, &control, false, true);
        let mut error_out = String::new();
        assert!(writer.load(0, Some(&mut error_out)).unwrap());
        assert_eq!(error_out, "");
        writer.install().unwrap();
        assert!(!find(&segment).flags.contains(ZoneFlags::EMPTY));
        writer.cleanup();
    }

    #[test]
    fn completion_without_data_is_rejected() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.complete_without_data.set(true);
        let mut writer = make_writer(&segment, &control, false, false);

        assert!(matches!(
            writer.load(0, None),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(writer.install(), Err(Error::InvalidOperation(_))));
        writer.cleanup();
    }

    #[test]
    fn reload_replaces_and_destroys_the_old_data() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.load_with_records.set(true);

        let mut writer = make_writer(&segment, &control, false, false);
        writer.load(0, None).unwrap();
        writer.install().unwrap();
        writer.cleanup();
        let first = find(&segment).zone_data.unwrap();
        let in_use_after_first = segment.memory().in_use();

        let mut writer = make_writer(&segment, &control, false, false);
        writer.load(0, None).unwrap();
        writer.install().unwrap();
        writer.cleanup();
        let second = find(&segment).zone_data.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        // The displaced copy's storage went back to the segment: the
        // two cycles load identical zones, so usage is identical too.
        assert_eq!(segment.memory().in_use(), in_use_after_first);
    }

    #[test]
    fn reload_can_reuse_the_installed_data() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();

        let mut writer = make_writer(&segment, &control, true, false);
        writer.load(0, None).unwrap();
        writer.install().unwrap();
        writer.cleanup();
        let first = find(&segment).zone_data.unwrap();
        let in_use_after_first = segment.memory().in_use();

        // The second writer's loader receives the installed data and
        // reuses it; cleanup must not destroy the live zone's storage.
        let mut writer = make_writer(&segment, &control, true, false);
        writer.load(0, None).unwrap();
        writer.install().unwrap();
        writer.cleanup();
        let second = find(&segment).zone_data.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(segment.memory().in_use(), in_use_after_first);
    }

    #[test]
    fn segment_growth_during_commit_is_retried() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.commit_behavior.set(CommitBehavior::GrowOnce);
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        writer.install().unwrap();
        writer.cleanup();

        // Exactly one retry: the failed commit plus the successful one.
        assert_eq!(control.commits.get(), 2);
        assert_eq!(find(&segment).code, FindResultCode::Success);
    }

    #[test]
    fn persistent_growth_surfaces_after_bounded_retries() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.commit_behavior.set(CommitBehavior::GrowAlways);
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        assert!(matches!(writer.install(), Err(Error::SegmentGrown)));
        assert_eq!(control.commits.get(), 2);
        assert_eq!(find(&segment).code, FindResultCode::NotFound);

        // The writer is still loaded; once the growth pressure stops,
        // install can be retried successfully.
        control.commit_behavior.set(CommitBehavior::Succeed);
        writer.install().unwrap();
        writer.cleanup();
        assert_eq!(find(&segment).code, FindResultCode::Success);
    }

    #[test]
    fn unexpected_commit_failure_publishes_empty_and_propagates() {
        let segment = ZoneTableSegment::local(Mode::ReadWrite);
        let control = MockControl::new();
        control.load_with_records.set(true);
        control.commit_behavior.set(CommitBehavior::Unexpected);
        let mut writer = make_writer(&segment, &control, false, false);

        writer.load(0, None).unwrap();
        assert!(matches!(
            writer.install(),
            Err(Error::Loader(LoaderError::Other(_)))
        ));
        writer.cleanup();

        let result = find(&segment);
        assert_eq!(result.code, FindResultCode::Success);
        assert!(result.flags.contains(ZoneFlags::EMPTY));
        assert!(result.zone_data.unwrap().is_empty());
    }
}
