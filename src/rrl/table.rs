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

//! Implementation of the [`RrlTable`] structure.

use log::{debug, info};

use super::entry::{EntryId, Fingerprint, RrlEntry};

/// Bucket-array sizes are drawn from this sequence: the first prime at
/// least as large as the growth target. Beyond the last prime the
/// target is used as-is.
const PRIMES: [usize; 26] = [
    53,
    97,
    193,
    389,
    769,
    1543,
    3079,
    6151,
    12289,
    24593,
    49157,
    98317,
    196613,
    393241,
    786433,
    1572869,
    3145739,
    6291469,
    12582917,
    25165843,
    50331653,
    100663319,
    201326611,
    402653189,
    805306457,
    1610612741,
];

/// How many entries to add per block when the table grows its entry
/// storage.
const ENTRY_BLOCK_SIZE: usize = 1024;

/// Seconds between inspections of the observed load factor.
const EXPAND_CHECK_INTERVAL: u64 = 120;

/// The average probe count per search beyond which the bucket array is
/// considered too small.
const EXPAND_PROBE_FACTOR: u64 = 2;

/// One generation of the hash table: a bucket array of chain heads,
/// identified by its generation number.
struct Generation {
    gen: u32,
    /// When to next inspect the load factor (current generation only).
    check_time: u64,
    bins: Vec<Option<EntryId>>,
    /// How many entries are linked into this generation's chains.
    live: usize,
}

impl Generation {
    fn new(gen: u32, bin_count: usize, now: u64) -> Self {
        Self {
            gen,
            check_time: now + EXPAND_CHECK_INTERVAL,
            bins: vec![None; bin_count],
            live: 0,
        }
    }
}

/// The table maintaining response rate-limiting entries.
///
/// Entries live in stable blocks ([`expand_entries`] adds a block,
/// nothing ever moves or frees one) and are tied together by two
/// intrusive index lists: the chain of their hash bucket, and the
/// global LRU list that orders every entry by recency of use. When the
/// entry cap is reached, the least recently used entry is reset and
/// reused for the new fingerprint.
///
/// The bucket array expands online without pausing lookups: [`expand`]
/// installs a new, larger generation of buckets and retires the
/// current one to `old_hash`, where its entries remain reachable.
/// Lookups probe the new generation first, then migrate hits out of the
/// old one; the old generation is dropped as soon as it is empty. A
/// lookup therefore costs at most two bucket probes, and no rehash ever
/// touches more than one entry at a time.
///
/// The table is a single-owner structure; the
/// [`ResponseLimiter`](super::ResponseLimiter) provides the shared,
/// locked wrapper.
///
/// [`expand`]: RrlTable::expand
/// [`expand_entries`]: RrlTable::expand_entries
pub struct RrlTable {
    max_entries: usize,
    num_entries: usize,
    blocks: Vec<Vec<RrlEntry>>,
    hash: Option<Generation>,
    old_hash: Option<Generation>,
    lru_front: Option<EntryId>,
    lru_back: Option<EntryId>,
    hash_gen: u32,
    searches: u64,
    probes: u64,
}

impl RrlTable {
    /// Creates a table that will hold at most `max_entries` entries
    /// (zero means unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            num_entries: 0,
            blocks: Vec::new(),
            hash: None,
            old_hash: None,
            lru_front: None,
            lru_back: None,
            hash_gen: 0,
            searches: 0,
            probes: 0,
        }
    }

    /// Returns the current number of entries (in use or free).
    pub fn entry_count(&self) -> usize {
        self.num_entries
    }

    /// Returns the total bucket count across both generations.
    pub fn bin_count(&self) -> usize {
        self.hash.as_ref().map_or(0, |h| h.bins.len())
            + self.old_hash.as_ref().map_or(0, |h| h.bins.len())
    }

    /// Returns the current generation number, or `None` before the
    /// first [`expand`](RrlTable::expand).
    pub fn generation(&self) -> Option<u32> {
        let hash = self.hash.as_ref()?;
        debug_assert_eq!(hash.gen, self.hash_gen);
        Some(hash.gen)
    }

    fn entry(&self, id: EntryId) -> &RrlEntry {
        &self.blocks[id.block as usize][id.slot as usize]
    }

    fn entry_mut(&mut self, id: EntryId) -> &mut RrlEntry {
        &mut self.blocks[id.block as usize][id.slot as usize]
    }

    ////////////////////////////////////////////////////////////////////
    // LOOKUP                                                         //
    ////////////////////////////////////////////////////////////////////

    /// Returns the entry tracking `fingerprint`, creating one if none
    /// exists (which may reclaim the least recently used entry). The
    /// returned entry has been moved to the front of the LRU list.
    pub fn lookup_or_insert(&mut self, fingerprint: Fingerprint, now: u64) -> &mut RrlEntry {
        self.maybe_expand(now);
        self.searches += 1;

        // Probe the current generation.
        let hash = self.hash.as_ref().expect("maybe_expand provides a hash");
        let bin = fingerprint.bucket(hash.bins.len());
        let mut cursor = hash.bins[bin];
        while let Some(id) = cursor {
            self.probes += 1;
            let entry = self.entry(id);
            if entry.fingerprint() == fingerprint {
                self.lru_touch(id);
                return self.entry_mut(id);
            }
            cursor = entry.hash_next;
        }

        // Miss; probe the previous generation and migrate on a hit.
        if let Some(ref old) = self.old_hash {
            let old_bin = fingerprint.bucket(old.bins.len());
            let mut cursor = old.bins[old_bin];
            while let Some(id) = cursor {
                self.probes += 1;
                let entry = self.entry(id);
                if entry.fingerprint() == fingerprint {
                    self.bucket_unlink(id);
                    self.bucket_push_front(id);
                    self.lru_touch(id);
                    return self.entry_mut(id);
                }
                cursor = entry.hash_next;
            }
        }

        // Miss in both generations: allocate (or reclaim) an entry.
        let id = self.allocate_entry(now);
        self.entry_mut(id).reset(fingerprint);
        self.bucket_push_front(id);
        self.lru_touch(id);
        self.entry_mut(id)
    }

    /// Installs the bucket array on first use and re-inspects the load
    /// factor once per check interval, expanding when chains have grown
    /// too long.
    fn maybe_expand(&mut self, now: u64) {
        match self.hash {
            None => {
                if self.num_entries == 0 {
                    self.expand_entries(self.entry_growth());
                }
                self.expand(now);
            }
            Some(ref mut hash) if now >= hash.check_time => {
                if self.searches > 0 && self.probes / self.searches > EXPAND_PROBE_FACTOR {
                    self.expand(now);
                } else {
                    hash.check_time = now + EXPAND_CHECK_INTERVAL;
                }
            }
            Some(_) => {}
        }
    }

    /// Returns how many entries the next block should add.
    fn entry_growth(&self) -> usize {
        if self.max_entries == 0 {
            ENTRY_BLOCK_SIZE
        } else {
            ENTRY_BLOCK_SIZE.min(self.max_entries - self.num_entries)
        }
    }

    ////////////////////////////////////////////////////////////////////
    // ALLOCATION AND EVICTION                                        //
    ////////////////////////////////////////////////////////////////////

    /// Produces an entry slot for a new fingerprint: the next free
    /// entry if one exists (growing the blocks if permitted), otherwise
    /// the least recently used entry, which is unlinked from its hash
    /// chain for reuse.
    fn allocate_entry(&mut self, now: u64) -> EntryId {
        // Free entries sit at the back of the LRU list, where
        // expand_entries put them; a keyed entry at the back means
        // every entry is in use.
        let back_is_keyed = match self.lru_back {
            None => true,
            Some(id) => self.entry(id).hash_gen.is_some(),
        };
        if back_is_keyed && (self.max_entries == 0 || self.num_entries < self.max_entries) {
            self.expand_entries(self.entry_growth());
        }

        let id = self.lru_back.expect("RRL table has no entries to allocate");
        if self.entry(id).hash_gen.is_some() {
            if let Some(age) = self.entry(id).age(now) {
                debug!(
                    "Reclaiming RRL entry {} last debited {} seconds ago.",
                    self.entry(id).fingerprint(),
                    age,
                );
            }
            self.bucket_unlink(id);
        }
        id
    }

    /// Adds a block of `count_to_add` entries so that the addresses of
    /// existing entries remain stable. The count is clamped so that the
    /// table never exceeds its entry cap; at the cap this is a no-op.
    pub fn expand_entries(&mut self, mut count_to_add: usize) {
        assert!(count_to_add > 0, "attempt to expand RRL entries with none");

        if self.max_entries != 0 && self.num_entries + count_to_add >= self.max_entries {
            if self.num_entries >= self.max_entries {
                return;
            }
            count_to_add = self.max_entries - self.num_entries;
        }

        // Log expansions so that operators can tune the table size.
        if let Some(ref hash) = self.hash {
            info!(
                "RRL entry storage expanding from {} to {} entries \
                 ({} bins, {:.2} probes/search).",
                self.num_entries,
                self.num_entries + count_to_add,
                hash.bins.len(),
                self.probe_rate(),
            );
        }

        let block_index = self.blocks.len() as u32;
        let mut block = Vec::with_capacity(count_to_add);
        block.resize_with(count_to_add, RrlEntry::default);
        self.blocks.push(block);
        for slot in 0..count_to_add as u32 {
            self.lru_push_back(EntryId {
                block: block_index,
                slot,
            });
        }
        self.num_entries += count_to_add;
    }

    ////////////////////////////////////////////////////////////////////
    // GENERATION EXPANSION                                           //
    ////////////////////////////////////////////////////////////////////

    /// Installs a new, larger generation of the bucket array. The
    /// current generation is retired to `old_hash`, from which lookups
    /// keep finding (and migrating) its entries; any generation still
    /// retired at this point is abandoned, leaving its entries
    /// reachable only through LRU reclamation.
    pub fn expand(&mut self, now: u64) {
        if let Some(old) = self.old_hash.take() {
            self.abandon_generation(old);
        }

        let old_bins = self.hash.as_ref().map_or(0, |h| h.bins.len());
        let target = (old_bins + old_bins / 8).max(self.num_entries);
        if target == 0 {
            return;
        }
        let new_bins = next_bin_count(target);

        if old_bins != 0 {
            info!(
                "RRL bucket array expanding from {} to {} bins \
                 ({} entries, {:.2} probes/search).",
                old_bins,
                new_bins,
                self.num_entries,
                self.probe_rate(),
            );
        }

        self.hash_gen += 1;
        let new_hash = Generation::new(self.hash_gen, new_bins, now);
        self.old_hash = self.hash.replace(new_hash);
        self.searches = 0;
        self.probes = 0;
    }

    /// Clears the chain links of every entry still in `generation`,
    /// which is being dropped.
    fn abandon_generation(&mut self, generation: Generation) {
        for head in generation.bins {
            let mut cursor = head;
            while let Some(id) = cursor {
                let entry = self.entry_mut(id);
                cursor = entry.hash_next;
                entry.hash_gen = None;
                entry.hash_prev = None;
                entry.hash_next = None;
            }
        }
    }

    /// The observed average probe count per search.
    fn probe_rate(&self) -> f64 {
        if self.searches == 0 {
            0.0
        } else {
            self.probes as f64 / self.searches as f64
        }
    }

    ////////////////////////////////////////////////////////////////////
    // INTRUSIVE LIST MAINTENANCE                                     //
    ////////////////////////////////////////////////////////////////////

    /// Links `id` at the front of its bucket chain in the current
    /// generation.
    fn bucket_push_front(&mut self, id: EntryId) {
        let fingerprint = self.entry(id).fingerprint();
        let hash = self.hash.as_mut().expect("no current generation");
        let bin = fingerprint.bucket(hash.bins.len());
        let old_head = hash.bins[bin];
        hash.bins[bin] = Some(id);
        hash.live += 1;
        let gen = hash.gen;
        if let Some(head) = old_head {
            self.entry_mut(head).hash_prev = Some(id);
        }
        let entry = self.entry_mut(id);
        entry.hash_gen = Some(gen);
        entry.hash_prev = None;
        entry.hash_next = old_head;
    }

    /// Unlinks `id` from its bucket chain, in whichever generation that
    /// chain lives. Dropping the last entry out of the retired
    /// generation releases it.
    fn bucket_unlink(&mut self, id: EntryId) {
        let (fingerprint, gen, prev, next) = {
            let entry = self.entry(id);
            let Some(gen) = entry.hash_gen else { return };
            (
                entry.fingerprint(),
                gen,
                entry.hash_prev,
                entry.hash_next,
            )
        };

        if let Some(prev) = prev {
            self.entry_mut(prev).hash_next = next;
        }
        if let Some(next) = next {
            self.entry_mut(next).hash_prev = prev;
        }

        let in_current = self.hash.as_ref().map_or(false, |h| h.gen == gen);
        let table = if in_current {
            self.hash.as_mut().unwrap()
        } else {
            self.old_hash
                .as_mut()
                .expect("entry linked into a dropped generation")
        };
        debug_assert_eq!(table.gen, gen);
        if prev.is_none() {
            let bin = fingerprint.bucket(table.bins.len());
            table.bins[bin] = next;
        }
        table.live -= 1;

        let entry = self.entry_mut(id);
        entry.hash_gen = None;
        entry.hash_prev = None;
        entry.hash_next = None;

        if !in_current && self.old_hash.as_ref().map_or(false, |o| o.live == 0) {
            self.old_hash = None;
        }
    }

    /// Moves `id` to the front of the LRU list.
    fn lru_touch(&mut self, id: EntryId) {
        if self.lru_front == Some(id) {
            return;
        }
        self.lru_unlink(id);
        let old_front = self.lru_front;
        self.lru_front = Some(id);
        if let Some(front) = old_front {
            self.entry_mut(front).lru_prev = Some(id);
        } else {
            self.lru_back = Some(id);
        }
        let entry = self.entry_mut(id);
        entry.lru_prev = None;
        entry.lru_next = old_front;
    }

    fn lru_push_back(&mut self, id: EntryId) {
        let old_back = self.lru_back;
        self.lru_back = Some(id);
        if let Some(back) = old_back {
            self.entry_mut(back).lru_next = Some(id);
        } else {
            self.lru_front = Some(id);
        }
        let entry = self.entry_mut(id);
        entry.lru_next = None;
        entry.lru_prev = old_back;
    }

    fn lru_unlink(&mut self, id: EntryId) {
        let (prev, next) = {
            let entry = self.entry(id);
            (entry.lru_prev, entry.lru_next)
        };
        match prev {
            Some(prev) => self.entry_mut(prev).lru_next = next,
            None => self.lru_front = next,
        }
        match next {
            Some(next) => self.entry_mut(next).lru_prev = prev,
            None => self.lru_back = prev,
        }
        let entry = self.entry_mut(id);
        entry.lru_prev = None;
        entry.lru_next = None;
    }
}

/// Returns the bucket count to use for a growth target: the first prime
/// in the precomputed sequence at least as large as `target`, or the
/// target itself past the end of the sequence.
fn next_bin_count(target: usize) -> usize {
    PRIMES
        .iter()
        .find(|&&prime| prime >= target)
        .copied()
        .unwrap_or(target)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
