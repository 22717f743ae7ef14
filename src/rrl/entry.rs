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

//! Implementation of the [`RrlEntry`] structure and its token-bucket
//! accounting.

use std::fmt;

////////////////////////////////////////////////////////////////////////
// FINGERPRINTS AND RESPONSE TYPES                                    //
////////////////////////////////////////////////////////////////////////

/// The classification of a response for rate selection: ordinary
/// answers, name errors, and everything else are limited at separate
/// rates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResponseType {
    Query,
    Nxdomain,
    Error,
}

impl ResponseType {
    fn to_bits(self) -> u64 {
        match self {
            Self::Query => 0,
            Self::Nxdomain => 1,
            Self::Error => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            0 => Self::Query,
            1 => Self::Nxdomain,
            _ => Self::Error,
        }
    }
}

/// The identity a rate-limiting entry tracks: a digest of the client
/// and the response it was sent, with the [`ResponseType`] carried in
/// the low bits so that rate selection needs no separate lookup.
///
/// How the digest itself is computed (which address bits, which query
/// attributes, which hash) is the caller's concern; the table treats
/// the value as opaque.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Combines a caller-computed identity digest with the response
    /// type.
    pub fn new(identity: u64, response_type: ResponseType) -> Self {
        Self((identity << 2) | response_type.to_bits())
    }

    /// Returns the response type carried in the fingerprint.
    pub fn response_type(self) -> ResponseType {
        ResponseType::from_bits(self.0 & 0x3)
    }

    /// Returns the raw fingerprint value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the hash bucket this fingerprint falls into, for a table
    /// with `bin_count` buckets.
    pub(crate) fn bucket(self, bin_count: usize) -> usize {
        (self.0 % bin_count as u64) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// RATES AND ACTIONS                                                  //
////////////////////////////////////////////////////////////////////////

/// The per-second credit rates for each [`ResponseType`]. A rate of
/// zero disables limiting for that response type.
#[derive(Clone, Copy, Debug)]
pub struct Rates {
    pub responses_per_second: u32,
    pub nxdomains_per_second: u32,
    pub errors_per_second: u32,
}

impl Rates {
    /// Returns the rate for `response_type`.
    pub fn rate(&self, response_type: ResponseType) -> u32 {
        match response_type {
            ResponseType::Query => self.responses_per_second,
            ResponseType::Nxdomain => self.nxdomains_per_second,
            ResponseType::Error => self.errors_per_second,
        }
    }
}

/// What to do with the response whose accounting was just debited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Send the response normally.
    Ok,

    /// Drop the response.
    Drop,

    /// Send a minimal truncated response in place of the real one, so
    /// that legitimate clients behind a spoofed address can fall back
    /// to TCP.
    Slip,
}

////////////////////////////////////////////////////////////////////////
// ENTRIES                                                            //
////////////////////////////////////////////////////////////////////////

/// The index of an entry in an [`RrlTable`](super::RrlTable)'s block
/// storage. Blocks are never reallocated or freed while the table
/// lives, so an `EntryId` stays valid for the table's lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct EntryId {
    pub(crate) block: u32,
    pub(crate) slot: u32,
}

/// One rate-limiting record: a fingerprint, its token-bucket balance
/// and timestamp, and the intrusive links tying the entry into its
/// hash-bucket chain and the global LRU list.
///
/// Entries are created in bulk when the table grows its blocks and are
/// never individually freed; a reclaimed entry is simply reset with a
/// new fingerprint. The links are indices rather than pointers
/// ([`EntryId`]), which keeps unlinking O(1) without any per-link
/// allocation.
pub struct RrlEntry {
    fingerprint: Fingerprint,
    balance: i32,
    timestamp: u64,
    timestamp_valid: bool,
    slip_count: u32,
    /// The generation whose bucket chain the entry is linked into, or
    /// `None` for entries not (yet) in any chain.
    pub(crate) hash_gen: Option<u32>,
    pub(crate) hash_prev: Option<EntryId>,
    pub(crate) hash_next: Option<EntryId>,
    pub(crate) lru_prev: Option<EntryId>,
    pub(crate) lru_next: Option<EntryId>,
}

impl Default for RrlEntry {
    fn default() -> Self {
        Self {
            fingerprint: Fingerprint(0),
            balance: 0,
            timestamp: 0,
            timestamp_valid: false,
            slip_count: 0,
            hash_gen: None,
            hash_prev: None,
            hash_next: None,
            lru_prev: None,
            lru_next: None,
        }
    }
}

impl RrlEntry {
    /// Returns the fingerprint this entry tracks.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Re-purposes the entry for a new fingerprint, clearing all
    /// accounting state. Called when the table allocates or reclaims
    /// the entry; once reset, the prior fingerprint's counters no
    /// longer apply.
    pub(crate) fn reset(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = fingerprint;
        self.balance = 0;
        self.timestamp = 0;
        self.timestamp_valid = false;
        self.slip_count = 0;
    }

    /// Returns the seconds elapsed since the entry was last debited, or
    /// `None` if it never has been.
    pub fn age(&self, now: u64) -> Option<i64> {
        self.timestamp_valid
            .then(|| now as i64 - self.timestamp as i64)
    }

    /// Returns the entry's current balance. Exposed for observability;
    /// decisions should come from [`RrlEntry::update_balance`].
    pub fn balance(&self) -> i32 {
        self.balance
    }

    /// Debits the entry for one response and decides that response's
    /// fate.
    ///
    /// Before the debit, the balance is credited with `rate` tokens per
    /// second of age, clamped to at most `rate`: a full bucket never
    /// holds more than one second of credit. Entries older than
    /// `window` seconds (or never debited) are treated as if they were
    /// just created, and time running backwards credits nothing. After
    /// the debit, the balance is clamped below at `-(window * rate)` so
    /// that an abusive client cannot dig an arbitrarily deep hole it
    /// would then be excused from.
    ///
    /// When the balance is negative, every `slip`-th otherwise-dropped
    /// response is [slipped](Action::Slip) instead (`slip == 0`
    /// disables slipping; `slip == 1` slips every one).
    pub fn update_balance(&mut self, rates: &Rates, slip: u32, now: u64, window: u32) -> Action {
        let rate = rates.rate(self.fingerprint.response_type()) as i64;
        if rate == 0 {
            return Action::Ok;
        }

        match self.age(now) {
            None => self.balance = rate as i32,
            Some(age) if age > window as i64 => self.balance = rate as i32,
            Some(age) if age > 0 => {
                let credited = (self.balance as i64 + rate * age).min(rate);
                self.balance = credited as i32;
            }
            _ => {}
        }
        self.timestamp = now;
        self.timestamp_valid = true;

        self.balance -= 1;
        if self.balance >= 0 {
            return Action::Ok;
        }
        let floor = -(window as i64) * rate;
        if (self.balance as i64) < floor {
            self.balance = floor as i32;
        }

        if slip != 0 {
            self.slip_count += 1;
            if self.slip_count >= slip {
                self.slip_count = 0;
                return Action::Slip;
            }
        }
        Action::Drop
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: Rates = Rates {
        responses_per_second: 2,
        nxdomains_per_second: 1,
        errors_per_second: 0,
    };

    fn fresh(response_type: ResponseType) -> RrlEntry {
        let mut entry = RrlEntry::default();
        entry.reset(Fingerprint::new(99, response_type));
        entry
    }

    #[test]
    fn fingerprint_carries_the_response_type() {
        let fp = Fingerprint::new(0xabcd, ResponseType::Nxdomain);
        assert_eq!(fp.response_type(), ResponseType::Nxdomain);
        assert_ne!(
            fp,
            Fingerprint::new(0xabcd, ResponseType::Query),
        );
    }

    #[test]
    fn fresh_entry_starts_with_a_full_bucket() {
        let mut entry = fresh(ResponseType::Query);
        // Rate 2: two responses in the same second pass, the third is
        // dropped.
        assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Ok);
        assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Ok);
        assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Drop);
    }

    #[test]
    fn credit_accrues_with_age_but_never_exceeds_the_rate() {
        let mut entry = fresh(ResponseType::Query);
        for _ in 0..3 {
            entry.update_balance(&RATES, 0, 10, 15);
        }
        assert_eq!(entry.balance(), -1);

        // One second of age credits `rate` tokens.
        assert_eq!(entry.update_balance(&RATES, 0, 11, 15), Action::Ok);
        assert_eq!(entry.balance(), 0);

        // A long (but in-window) idle stretch cannot bank more than one
        // second of credit.
        assert_eq!(entry.update_balance(&RATES, 0, 21, 15), Action::Ok);
        assert_eq!(entry.balance(), 1);
    }

    #[test]
    fn entries_older_than_the_window_start_over() {
        let mut entry = fresh(ResponseType::Query);
        for _ in 0..5 {
            entry.update_balance(&RATES, 0, 10, 15);
        }
        assert!(entry.balance() < 0);
        assert_eq!(entry.update_balance(&RATES, 0, 100, 15), Action::Ok);
        assert_eq!(entry.balance(), 1);
    }

    #[test]
    fn time_running_backwards_credits_nothing() {
        let mut entry = fresh(ResponseType::Nxdomain);
        assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Ok);
        assert_eq!(entry.update_balance(&RATES, 0, 5, 15), Action::Drop);
    }

    #[test]
    fn balance_is_clamped_at_the_window_floor() {
        let mut entry = fresh(ResponseType::Nxdomain);
        for _ in 0..100 {
            entry.update_balance(&RATES, 0, 10, 15);
        }
        // Rate 1, window 15: the hole is at most 15 deep.
        assert_eq!(entry.balance(), -15);
    }

    #[test]
    fn every_nth_drop_slips() {
        let mut entry = fresh(ResponseType::Query);
        entry.update_balance(&RATES, 2, 10, 15);
        entry.update_balance(&RATES, 2, 10, 15);
        assert_eq!(entry.update_balance(&RATES, 2, 10, 15), Action::Drop);
        assert_eq!(entry.update_balance(&RATES, 2, 10, 15), Action::Slip);
        assert_eq!(entry.update_balance(&RATES, 2, 10, 15), Action::Drop);
        assert_eq!(entry.update_balance(&RATES, 2, 10, 15), Action::Slip);
    }

    #[test]
    fn slip_of_one_slips_every_drop() {
        let mut entry = fresh(ResponseType::Query);
        entry.update_balance(&RATES, 1, 10, 15);
        entry.update_balance(&RATES, 1, 10, 15);
        assert_eq!(entry.update_balance(&RATES, 1, 10, 15), Action::Slip);
        assert_eq!(entry.update_balance(&RATES, 1, 10, 15), Action::Slip);
    }

    #[test]
    fn zero_rate_disables_limiting() {
        let mut entry = fresh(ResponseType::Error);
        for _ in 0..1000 {
            assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Ok);
        }
    }

    #[test]
    fn reset_clears_prior_accounting() {
        let mut entry = fresh(ResponseType::Query);
        for _ in 0..5 {
            entry.update_balance(&RATES, 0, 10, 15);
        }
        entry.reset(Fingerprint::new(7, ResponseType::Query));
        assert_eq!(entry.age(10), None);
        assert_eq!(entry.update_balance(&RATES, 0, 10, 15), Action::Ok);
    }
}
