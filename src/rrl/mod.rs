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

//! Response rate-limiting (RRL).
//!
//! Rate limiting tracks a token bucket per (client, response)
//! fingerprint in an [`RrlTable`]: a hash table whose entries live in
//! stable blocks, are chained intrusively into their buckets and a
//! global LRU list, and are reclaimed least-recently-used-first when
//! the table is full. The bucket array expands online by keeping two
//! generations alive and migrating entries lazily at lookup, so
//! expansion never pauses the lookup path.
//!
//! [`RrlTable`] itself is a single-owner structure. Servers share one
//! limiter across their worker threads through [`ResponseLimiter`],
//! which shards fingerprints over internally locked sub-tables and
//! applies the token-bucket policy ([`RrlParams`]) on each probe.

use std::fmt;
use std::sync::Mutex;

mod entry;
mod table;

pub use entry::{Action, Fingerprint, Rates, ResponseType, RrlEntry};
pub use table::RrlTable;

use log::debug;

/// The number of independently locked sub-tables a [`ResponseLimiter`]
/// spreads its entries over.
const SHARD_COUNT: usize = 8;

////////////////////////////////////////////////////////////////////////
// PARAMETERS                                                         //
////////////////////////////////////////////////////////////////////////

/// Configuration for a [`ResponseLimiter`].
#[derive(Clone, Copy, Debug)]
pub struct RrlParams {
    /// The maximum number of entries tracked at once (zero means
    /// unbounded).
    pub max_entries: usize,

    /// Token credit per second for ordinary responses.
    pub responses_per_second: u32,

    /// Token credit per second for NXDOMAIN responses.
    pub nxdomains_per_second: u32,

    /// Token credit per second for error responses.
    pub errors_per_second: u32,

    /// The accounting window in seconds: both the deepest hole a
    /// client's balance can dig and the age beyond which an entry's
    /// history is forgotten.
    pub window: u32,

    /// Let every `slip`-th otherwise-dropped response through as a
    /// truncated reply (zero disables slipping).
    pub slip: u32,

    /// Account for responses but never actually drop or slip them.
    pub log_only: bool,
}

impl RrlParams {
    fn validate(&self) -> Result<(), RrlParamError> {
        if self.window == 0 {
            return Err(RrlParamError::ZeroWindow);
        }
        Ok(())
    }
}

/// Errors arising from invalid [`RrlParams`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RrlParamError {
    /// The accounting window must be at least one second.
    ZeroWindow,
}

impl fmt::Display for RrlParamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ZeroWindow => f.write_str("the RRL window must be at least one second"),
        }
    }
}

impl std::error::Error for RrlParamError {}

////////////////////////////////////////////////////////////////////////
// THE SHARED LIMITER                                                 //
////////////////////////////////////////////////////////////////////////

/// The shared, thread-safe face of response rate-limiting.
///
/// Fingerprints are sharded over a fixed set of mutex-guarded
/// [`RrlTable`]s, bounding lock contention without any cross-shard
/// locking: a probe touches exactly one shard, and within it the
/// table's bucket chains and LRU list are updated under the same lock
/// (every probe is a mutation, since a hit is an LRU touch).
pub struct ResponseLimiter {
    shards: Vec<Mutex<RrlTable>>,
    rates: Rates,
    window: u32,
    slip: u32,
    log_only: bool,
}

impl ResponseLimiter {
    /// Creates a limiter from `params`.
    pub fn new(params: RrlParams) -> Result<Self, RrlParamError> {
        params.validate()?;
        let per_shard = if params.max_entries == 0 {
            0
        } else {
            // Distribute the cap, keeping the global total at or under
            // the configured maximum.
            (params.max_entries / SHARD_COUNT).max(1)
        };
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(RrlTable::new(per_shard)))
            .collect();
        Ok(Self {
            shards,
            rates: Rates {
                responses_per_second: params.responses_per_second,
                nxdomains_per_second: params.nxdomains_per_second,
                errors_per_second: params.errors_per_second,
            },
            window: params.window,
            slip: params.slip,
            log_only: params.log_only,
        })
    }

    /// Accounts for one response about to be sent and decides its fate.
    /// `now` is the current time in seconds (any epoch, as long as it
    /// is consistent across calls).
    pub fn check(&self, fingerprint: Fingerprint, now: u64) -> Action {
        let shard = (fingerprint.value() >> 32 ^ fingerprint.value()) as usize % self.shards.len();
        let mut table = self.shards[shard].lock().unwrap();
        let entry = table.lookup_or_insert(fingerprint, now);
        let action = entry.update_balance(&self.rates, self.slip, now, self.window);
        if action != Action::Ok && self.log_only {
            debug!(
                "RRL would {} response for {} (log-only).",
                match action {
                    Action::Drop => "drop",
                    _ => "slip",
                },
                fingerprint,
            );
            return Action::Ok;
        }
        action
    }

    /// Returns the total number of entries across all shards.
    pub fn entry_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap().entry_count())
            .sum()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RrlParams {
        RrlParams {
            max_entries: 800,
            responses_per_second: 2,
            nxdomains_per_second: 1,
            errors_per_second: 1,
            window: 15,
            slip: 0,
            log_only: false,
        }
    }

    #[test]
    fn rejects_a_zero_window() {
        let mut bad = params();
        bad.window = 0;
        assert_eq!(
            ResponseLimiter::new(bad).err(),
            Some(RrlParamError::ZeroWindow)
        );
    }

    #[test]
    fn limits_after_the_rate_is_exceeded() {
        let limiter = ResponseLimiter::new(params()).unwrap();
        let fp = Fingerprint::new(1234, ResponseType::Query);
        assert_eq!(limiter.check(fp, 10), Action::Ok);
        assert_eq!(limiter.check(fp, 10), Action::Ok);
        assert_eq!(limiter.check(fp, 10), Action::Drop);
        // A different client is unaffected.
        let other = Fingerprint::new(5678, ResponseType::Query);
        assert_eq!(limiter.check(other, 10), Action::Ok);
    }

    #[test]
    fn slip_passes_through() {
        let mut p = params();
        p.slip = 2;
        let limiter = ResponseLimiter::new(p).unwrap();
        let fp = Fingerprint::new(1234, ResponseType::Nxdomain);
        assert_eq!(limiter.check(fp, 10), Action::Ok);
        assert_eq!(limiter.check(fp, 10), Action::Drop);
        assert_eq!(limiter.check(fp, 10), Action::Slip);
    }

    #[test]
    fn log_only_never_drops() {
        let mut p = params();
        p.log_only = true;
        let limiter = ResponseLimiter::new(p).unwrap();
        let fp = Fingerprint::new(1234, ResponseType::Query);
        for _ in 0..10 {
            assert_eq!(limiter.check(fp, 10), Action::Ok);
        }
    }

    #[test]
    fn the_global_cap_is_divided_across_shards() {
        let limiter = ResponseLimiter::new(params()).unwrap();
        for identity in 0..10_000 {
            limiter.check(Fingerprint::new(identity, ResponseType::Query), 10);
        }
        assert!(limiter.entry_count() <= 800);
    }
}
