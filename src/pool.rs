//! Pooled slab arena backing interval allocation during a sweep.
//!
//! Records churn through the active window at stream rate, so the arena
//! hands slots out and takes them back in O(1) without touching the global
//! allocator in steady state: slabs hold a fixed number of slots, a bit
//! array tracks occupancy, and released slots keep their string buffers so
//! the next occupant reuses the capacity.
//!
//! Slots are addressed by copyable handles carrying a monotonically
//! increasing sequence number. The sequence number is the stable identity a
//! visitor may key ordered containers on for the lifetime of one sweep.
//!
//! A slab that drains completely is cached for reuse (at most one) or
//! freed. Growth is unbounded; memory pressure is the caller's concern.

use bitvec::array::BitArray;

use crate::config::SLAB_CAPACITY;
use crate::error::{Result, SweepError};
use crate::interval::{Interval, Strand};

const SLAB_WORDS: usize = SLAB_CAPACITY / 64;

/// Handle to a live pool slot. Valid from `alloc` until `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolId {
    slab: u32,
    slot: u32,
    seq: u64,
}

impl PoolId {
    /// Per-allocation sequence number; unique and increasing within a pool.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct Slab {
    slots: Box<[Interval]>,
    seqs: Box<[u64]>,
    used: BitArray<[u64; SLAB_WORDS]>,
    in_use: usize,
}

impl Slab {
    fn new() -> Box<Self> {
        Box::new(Slab {
            slots: (0..SLAB_CAPACITY)
                .map(|_| Interval::default())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            seqs: vec![0; SLAB_CAPACITY].into_boxed_slice(),
            used: BitArray::ZERO,
            in_use: 0,
        })
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.in_use == SLAB_CAPACITY
    }
}

/// Allocation and release counters, exposed for balance checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub allocated: u64,
    pub released: u64,
    pub live: usize,
    pub max_live: usize,
    pub slabs: usize,
    pub peak_slabs: usize,
}

pub struct Pool {
    slabs: Vec<Option<Box<Slab>>>,
    free_ids: Vec<u32>,
    curr: u32,
    cache: Option<Box<Slab>>,
    next_seq: u64,
    stats: PoolStats,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            slabs: vec![Some(Slab::new())],
            free_ids: Vec::new(),
            curr: 0,
            cache: None,
            next_seq: 0,
            stats: PoolStats {
                slabs: 1,
                peak_slabs: 1,
                ..PoolStats::default()
            },
        }
    }

    /// Allocate a slot and fill it from parsed row pieces, reusing the
    /// slot's retained buffers.
    pub fn alloc_record(
        &mut self,
        chrom: &str,
        start: u64,
        end: u64,
        tail: &str,
        measure: Option<f64>,
        strand: Option<Strand>,
    ) -> Result<PoolId> {
        let id = self.open_slot()?;
        let slab = self.slab_mut(id.slab);
        let rec = &mut slab.slots[id.slot as usize];
        rec.chrom.clear();
        rec.chrom.push_str(chrom);
        rec.start = start;
        rec.end = end;
        rec.tail.clear();
        rec.tail.push_str(tail);
        rec.measure = measure;
        rec.strand = strand;
        Ok(id)
    }

    /// Allocate a slot holding `iv`. Convenience for tests and drivers.
    pub fn alloc(&mut self, iv: Interval) -> Result<PoolId> {
        let id = self.open_slot()?;
        let slab = self.slab_mut(id.slab);
        slab.slots[id.slot as usize] = iv;
        Ok(id)
    }

    /// Read a live slot.
    #[inline]
    pub fn get(&self, id: PoolId) -> &Interval {
        let slab = self.slabs[id.slab as usize]
            .as_ref()
            .expect("pool handle into released slab");
        debug_assert!(slab.used[id.slot as usize]);
        debug_assert_eq!(slab.seqs[id.slot as usize], id.seq);
        &slab.slots[id.slot as usize]
    }

    /// Return a slot to its slab. The slab itself is cached or freed once
    /// it drains, unless it is the pool's only one.
    pub fn release(&mut self, id: PoolId) {
        let slab = self.slab_mut(id.slab);
        debug_assert!(slab.used[id.slot as usize]);
        debug_assert_eq!(slab.seqs[id.slot as usize], id.seq);
        slab.used.set(id.slot as usize, false);
        slab.in_use -= 1;
        let drained = slab.in_use == 0;
        self.stats.released += 1;
        self.stats.live -= 1;

        if drained && self.stats.slabs > 1 {
            let empty = self.slabs[id.slab as usize].take();
            self.free_ids.push(id.slab);
            self.stats.slabs -= 1;
            if self.cache.is_none() {
                self.cache = empty;
            }
            if self.curr == id.slab {
                self.curr = self
                    .slabs
                    .iter()
                    .position(Option::is_some)
                    .map(|i| i as u32)
                    .unwrap_or(0);
            }
        }
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.stats.live
    }

    fn open_slot(&mut self) -> Result<PoolId> {
        if self.slab_ref(self.curr).is_full() {
            let fresh = match self.cache.take() {
                Some(slab) => slab,
                None => Slab::new(),
            };
            let id = match self.free_ids.pop() {
                Some(id) => {
                    self.slabs[id as usize] = Some(fresh);
                    id
                }
                None => {
                    let id = u32::try_from(self.slabs.len()).map_err(|_| {
                        SweepError::Resource("pool slab index space exhausted".into())
                    })?;
                    self.slabs.push(Some(fresh));
                    id
                }
            };
            self.curr = id;
            self.stats.slabs += 1;
            self.stats.peak_slabs = self.stats.peak_slabs.max(self.stats.slabs);
        }

        let curr = self.curr;
        let seq = self.next_seq;
        self.next_seq += 1;
        let slab = self.slab_mut(curr);
        let slot = slab
            .used
            .first_zero()
            .expect("non-full slab has a free slot");
        slab.used.set(slot, true);
        slab.seqs[slot] = seq;
        slab.in_use += 1;

        self.stats.allocated += 1;
        self.stats.live += 1;
        self.stats.max_live = self.stats.max_live.max(self.stats.live);
        Ok(PoolId {
            slab: curr,
            slot: slot as u32,
            seq,
        })
    }

    #[inline]
    fn slab_ref(&self, id: u32) -> &Slab {
        self.slabs[id as usize]
            .as_ref()
            .expect("pool slab index out of date")
    }

    #[inline]
    fn slab_mut(&mut self, id: u32) -> &mut Slab {
        self.slabs[id as usize]
            .as_mut()
            .expect("pool slab index out of date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: u64, end: u64) -> Interval {
        Interval::new("chr1", start, end)
    }

    #[test]
    fn alloc_release_balance() {
        let mut pool = Pool::new();
        let ids: Vec<_> = (0..10).map(|i| pool.alloc(iv(i, i + 1)).unwrap()).collect();
        assert_eq!(pool.live(), 10);
        for id in ids {
            pool.release(id);
        }
        let s = pool.stats();
        assert_eq!(s.allocated, 10);
        assert_eq!(s.released, 10);
        assert_eq!(s.live, 0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut pool = Pool::new();
        let a = pool.alloc(iv(0, 1)).unwrap();
        let b = pool.alloc(iv(1, 2)).unwrap();
        pool.release(a);
        let c = pool.alloc(iv(2, 3)).unwrap();
        assert!(a.seq() < b.seq());
        assert!(b.seq() < c.seq());
        pool.release(b);
        pool.release(c);
    }

    #[test]
    fn grows_a_slab_when_full() {
        let mut pool = Pool::new();
        let ids: Vec<_> = (0..SLAB_CAPACITY as u64 + 1)
            .map(|i| pool.alloc(iv(i, i + 1)).unwrap())
            .collect();
        assert_eq!(pool.stats().slabs, 2);
        for id in ids {
            pool.release(id);
        }
        assert_eq!(pool.live(), 0);
        // one slab remains; the drained one went to the cache
        assert_eq!(pool.stats().slabs, 1);
    }

    #[test]
    fn drained_slab_is_reused_from_cache() {
        let mut pool = Pool::new();
        let first: Vec<_> = (0..SLAB_CAPACITY as u64)
            .map(|i| pool.alloc(iv(i, i + 1)).unwrap())
            .collect();
        let extra = pool.alloc(iv(9000, 9001)).unwrap();
        assert_eq!(pool.stats().slabs, 2);
        // drain the second slab so it gets cached
        pool.release(extra);
        assert_eq!(pool.stats().slabs, 1);
        // filling up again must not allocate a third slab beyond the peak
        let again = pool.alloc(iv(9001, 9002)).unwrap();
        assert_eq!(pool.stats().slabs, 2);
        assert_eq!(pool.stats().peak_slabs, 2);
        pool.release(again);
        for id in first {
            pool.release(id);
        }
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn slot_values_survive_until_release() {
        let mut pool = Pool::new();
        let a = pool.alloc(iv(5, 9)).unwrap();
        let b = pool
            .alloc_record("chr2", 1, 4, "id\t2.5", Some(2.5), None)
            .unwrap();
        assert_eq!(pool.get(a).start, 5);
        assert_eq!(pool.get(b).chrom, "chr2");
        assert_eq!(pool.get(b).tail, "id\t2.5");
        assert_eq!(pool.get(b).measure, Some(2.5));
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn fifo_churn_stays_in_one_slab() {
        let mut pool = Pool::new();
        for i in 0..10_000u64 {
            let id = pool.alloc(iv(i, i + 1)).unwrap();
            pool.release(id);
        }
        assert_eq!(pool.stats().peak_slabs, 1);
        assert_eq!(pool.stats().allocated, 10_000);
        assert_eq!(pool.stats().released, 10_000);
    }
}
