//! The sorted-interval sweep drivers.
//!
//! Both drivers maintain a sliding window of map records over sorted
//! input, classify candidates with a range predicate, and fan events out
//! to a visitor. Because the streams are sorted and every predicate is
//! monotone with the sort order, a discarded record never needs to be
//! revisited; the driver owns exactly one "peeked" candidate at any time.
//!
//! Windows hold pool handles; a record is released exactly once, when it
//! falls out of the window, is discarded unseen, or (for references) when
//! its `on_done` completes.

use std::collections::VecDeque;
use std::io::BufRead;

use crate::error::{Result, SweepError};
use crate::output::RowWriter;
use crate::pool::{Pool, PoolId};
use crate::predicate::{Predicate, Relation};
use crate::reader::ValidatingReader;
use crate::visitors::Visitor;

/// Counters reported by a finished sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub references: u64,
    pub map_items: u64,
    pub max_window: usize,
}

impl std::fmt::Display for SweepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "references: {}, map items: {}, max window: {}",
            self.references, self.map_items, self.max_window
        )
    }
}

/// Sweep one sorted stream against itself: every record is successively
/// the reference, and the window holds its in-range neighbors (including
/// the reference). Requires a symmetric predicate.
///
/// Items the predicate can never match (`admits` returns false) still pass
/// through the window so ordering bookkeeping holds, but their
/// `on_add`/`on_delete` callbacks are suppressed; every item a visitor
/// sees truly satisfies the predicate.
pub fn sweep_single<R: BufRead>(
    reader: &mut ValidatingReader<R>,
    pool: &mut Pool,
    pred: &Predicate,
    visitor: &mut dyn Visitor,
    out: &mut RowWriter<'_>,
) -> Result<SweepStats> {
    if !pred.is_symmetric() {
        return Err(SweepError::Argument(
            "single-input sweep requires a symmetric predicate".to_string(),
        ));
    }

    let mut win: VecDeque<PoolId> = VecDeque::new();
    let mut index: usize = 0;
    let mut cache: Option<PoolId> = None;
    let mut input_done = false;
    let mut first = true;
    let mut reset = true;
    let mut stats = SweepStats::default();

    while !input_done || cache.is_some() || !win.is_empty() {
        if !reset {
            // the cursor advanced onto an existing window member
            let r = win[index];
            stats.references += 1;
            visitor.on_start(pool.get(r), r.seq());
            while let Some(&front) = win.front() {
                if pred.relation(pool.get(front), pool.get(r)) != Relation::Before {
                    break;
                }
                if pred.admits(pool.get(front)) {
                    visitor.on_delete(pool.get(front), front.seq());
                }
                pool.release(front);
                win.pop_front();
                index -= 1;
            }
        } else {
            // peek one ahead so end-of-input is known before committing
            // to a fresh window
            if cache.is_none() && !input_done {
                cache = reader.read_into(pool)?;
                match cache {
                    Some(_) => stats.map_items += 1,
                    None => input_done = true,
                }
            }
            if input_done && cache.is_none() {
                visitor.on_end(out)?;
                while let Some(stale) = win.pop_front() {
                    pool.release(stale); // deletions belonging to no reference
                }
                break;
            }
            // more input exists: the extension below establishes the next
            // reference before any other callback fires, and any stale
            // window items are deleted on its behalf
        }

        // extend the window through everything in range of the reference
        loop {
            let candidate = match cache.take() {
                Some(c) => c,
                None => {
                    if input_done {
                        break;
                    }
                    match reader.read_into(pool)? {
                        Some(c) => {
                            stats.map_items += 1;
                            c
                        }
                        None => {
                            input_done = true;
                            break;
                        }
                    }
                }
            };
            let include = reset
                || win.is_empty()
                || pred.relation(pool.get(candidate), pool.get(win[index])) == Relation::Within;
            if !include {
                cache = Some(candidate); // one past the window; keep for later
                break;
            }
            if reset {
                reset = false;
                index = 0;
                stats.references += 1;
                visitor.on_start(pool.get(candidate), candidate.seq());
                if !first {
                    visitor.on_purge();
                }
                first = false;
                while let Some(stale) = win.pop_front() {
                    // deletions on behalf of the new reference
                    if pred.admits(pool.get(stale)) {
                        visitor.on_delete(pool.get(stale), stale.seq());
                    }
                    pool.release(stale);
                }
            }
            win.push_back(candidate);
            stats.max_window = stats.max_window.max(win.len());
            if pred.admits(pool.get(candidate)) {
                visitor.on_add(pool.get(candidate), candidate.seq());
            }
        }

        visitor.on_done(out)?;
        index += 1;
        reset = index >= win.len();
    }

    if let Some(c) = cache.take() {
        pool.release(c); // peeked but never given to the visitor
    }
    Ok(stats)
}

/// Sweep a sorted map stream across a sorted reference stream. Per
/// reference: purge when the whole window has fallen behind, evict
/// left-expired items in sort order, extend with in-range map items, and
/// report. `drain_map` reads the map stream to exhaustion afterwards, for
/// callers that must account for unclaimed map items.
pub fn sweep_paired<R1: BufRead, R2: BufRead>(
    refs: &mut ValidatingReader<R1>,
    maps: &mut ValidatingReader<R2>,
    pool: &mut Pool,
    pred: &Predicate,
    visitor: &mut dyn Visitor,
    out: &mut RowWriter<'_>,
    drain_map: bool,
) -> Result<SweepStats> {
    let mut win: VecDeque<PoolId> = VecDeque::new();
    let mut cache: Option<PoolId> = None;
    let mut map_done = false;
    let mut stats = SweepStats::default();

    while let Some(r) = refs.read_into(pool)? {
        stats.references += 1;
        visitor.on_start(pool.get(r), r.seq());

        // the window empties entirely: tell the visitor before deleting
        let will_purge = match win.back() {
            Some(&last) => pred.relation(pool.get(last), pool.get(r)) == Relation::Before,
            None => false,
        };
        if will_purge {
            visitor.on_purge();
        }

        while let Some(&front) = win.front() {
            if pred.relation(pool.get(front), pool.get(r)) != Relation::Before {
                break;
            }
            visitor.on_delete(pool.get(front), front.seq());
            pool.release(front);
            win.pop_front();
        }

        loop {
            let m = match cache.take() {
                Some(m) => m,
                None => {
                    if map_done {
                        break;
                    }
                    match maps.read_into(pool)? {
                        Some(m) => {
                            stats.map_items += 1;
                            m
                        }
                        None => {
                            map_done = true;
                            break;
                        }
                    }
                }
            };
            match pred.relation(pool.get(m), pool.get(r)) {
                Relation::Within => {
                    win.push_back(m);
                    stats.max_window = stats.max_window.max(win.len());
                    visitor.on_add(pool.get(m), m.seq());
                }
                Relation::After => {
                    cache = Some(m); // one past the window; next reference decides
                    break;
                }
                Relation::Before => pool.release(m), // never shown to the visitor
            }
        }

        visitor.on_done(out)?;
        pool.release(r);
    }

    visitor.on_end(out)?;
    while let Some(stale) = win.pop_front() {
        pool.release(stale); // deletions belonging to no reference
    }
    if let Some(c) = cache.take() {
        pool.release(c);
    }
    if drain_map {
        while let Some(m) = maps.read_into(pool)? {
            stats.map_items += 1;
            pool.release(m);
        }
    }
    Ok(stats)
}
