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

//! The heap-backed memory segment.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{MemorySegment, SegmentError};

/// A [`MemorySegment`] backed by ordinary heap memory. The heap does
/// not relocate, so reservations always succeed and
/// [`SegmentError::Grown`] is never reported.
#[derive(Default)]
pub(super) struct LocalSegment {
    in_use: AtomicUsize,
}

impl LocalSegment {
    pub(super) fn new() -> Self {
        Default::default()
    }
}

impl MemorySegment for LocalSegment {
    fn reserve(&self, bytes: usize) -> Result<(), SegmentError> {
        self.in_use.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        // Clamp at zero; a release that exceeds the reservation is a
        // caller accounting bug, not a reason to wrap around.
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let new = current.saturating_sub(bytes);
            match self.in_use.compare_exchange_weak(
                current,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}
