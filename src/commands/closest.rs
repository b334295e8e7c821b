//! The closest-features command: for every reference, the nearest map
//! elements flanking its left and right edges.
//!
//! An overlapping element has distance 0 and outranks every
//! non-overlapping one; overlaps can be suppressed entirely. One element
//! is reported per side (`NA` when a side has none), and the elements
//! reported left and right are never the same. `--closest` keeps only the
//! nearer side, ties going left.

use std::cmp::Ordering;
use std::fmt;
use std::io::Write;

use crate::error::Result;
use crate::output::RowWriter;
use crate::pool::{Pool, PoolId};
use crate::reader::{open_source, ReaderConfig};

const NONE_TEXT: &str = "NA";

#[derive(Debug, Clone)]
pub struct ClosestConfig {
    pub chrom: Option<String>,
    /// Report only the nearer of the two flanking elements.
    pub closest_only: bool,
    pub delim: String,
    /// Append signed edge-to-edge distances (0 for overlap).
    pub dist: bool,
    /// Overlapping elements participate (off with --no-overlaps).
    pub allow_overlaps: bool,
    /// Do not echo the reference element (--no-ref).
    pub suppress_ref: bool,
}

impl Default for ClosestConfig {
    fn default() -> Self {
        Self {
            chrom: None,
            closest_only: false,
            delim: "|".to_string(),
            dist: false,
            allow_overlaps: true,
            suppress_ref: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClosestStats {
    pub references: u64,
    pub map_items: u64,
}

impl fmt::Display for ClosestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "references: {}, map items: {}",
            self.references, self.map_items
        )
    }
}

enum Incoming {
    Stale,
    Future,
    Left,
    Right,
    Active,
}

pub fn run_closest(
    cfg: &ClosestConfig,
    ref_path: &str,
    map_path: &str,
    out: &mut dyn Write,
) -> Result<ClosestStats> {
    let mut refs = open_source(
        ref_path,
        ReaderConfig::new(ref_path).with_chrom(cfg.chrom.clone()),
    )?;
    let mut maps = open_source(
        map_path,
        ReaderConfig::new(map_path).with_chrom(cfg.chrom.clone()),
    )?;

    let mut pool = Pool::new();
    let mut w = RowWriter::new(out);
    let mut stats = ClosestStats::default();

    // map items that may still overlap this or a later reference
    let mut active: Vec<PoolId> = Vec::new();
    // the best upstream candidate seen so far on this chromosome
    let mut left_best: Option<PoolId> = None;
    // the one-ahead map item, re-examined for every reference
    let mut pending: Option<PoolId> = None;
    let mut map_done = false;
    let mut cur_chrom = String::new();

    while let Some(r) = refs.read_into(&mut pool)? {
        stats.references += 1;
        let (r_start, r_end) = {
            let iv = pool.get(r);
            (iv.start, iv.end)
        };

        if pool.get(r).chrom != cur_chrom {
            cur_chrom = pool.get(r).chrom.clone();
            for id in active.drain(..) {
                pool.release(id);
            }
            if let Some(id) = left_best.take() {
                pool.release(id);
            }
        }

        // items whose end has passed the reference move to the left side
        let mut expired: Vec<PoolId> = Vec::new();
        active.retain(|&id| {
            if pool.get(id).end <= r_start {
                expired.push(id);
                false
            } else {
                true
            }
        });
        for id in expired {
            offer_left(&mut pool, &mut left_best, id);
        }

        // pull map rows until one lands at or beyond the right edge
        loop {
            let m = match pending.take() {
                Some(m) => m,
                None => {
                    if map_done {
                        break;
                    }
                    match maps.read_into(&mut pool)? {
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
            let class = {
                let mi = pool.get(m);
                match mi.chrom.as_bytes().cmp(cur_chrom.as_bytes()) {
                    Ordering::Less => Incoming::Stale,
                    Ordering::Greater => Incoming::Future,
                    Ordering::Equal => {
                        if mi.start >= r_end {
                            Incoming::Right
                        } else if mi.end <= r_start {
                            Incoming::Left
                        } else {
                            Incoming::Active
                        }
                    }
                }
            };
            match class {
                Incoming::Stale => pool.release(m),
                Incoming::Future | Incoming::Right => {
                    pending = Some(m);
                    break;
                }
                Incoming::Left => offer_left(&mut pool, &mut left_best, m),
                Incoming::Active => active.push(m),
            }
        }

        // pick the flanking elements for this reference
        let mut overlap_first: Option<PoolId> = None;
        let mut overlap_second: Option<PoolId> = None;
        let mut down_best: Option<PoolId> = None;
        for &id in &active {
            let iv = pool.get(id);
            if iv.start < r_end {
                if cfg.allow_overlaps {
                    if overlap_first.is_none() {
                        overlap_first = Some(id);
                    } else if overlap_second.is_none() {
                        overlap_second = Some(id);
                    }
                }
            } else {
                // nested references leave downstream items in the window
                down_best = nearer_start(&pool, down_best, id);
            }
        }
        if let Some(p) = pending {
            let pi = pool.get(p);
            if pi.chrom.as_bytes() == cur_chrom.as_bytes() && pi.start >= r_end {
                down_best = nearer_start(&pool, down_best, p);
            }
        }

        let (left, right) = if overlap_first.is_some() {
            (overlap_first, overlap_second.or(down_best))
        } else {
            (left_best, down_best)
        };
        let left_dist = left.map(|id| edge_distance(&pool, id, r_start, r_end));
        let right_dist = right.map(|id| edge_distance(&pool, id, r_start, r_end));

        if cfg.closest_only {
            print_shortest(&mut w, cfg, &pool, r, left, left_dist, right, right_dist)?;
        } else {
            print_all(&mut w, cfg, &pool, r, left, left_dist, right, right_dist)?;
        }
        pool.release(r);
    }

    for id in active.drain(..) {
        pool.release(id);
    }
    if let Some(id) = left_best.take() {
        pool.release(id);
    }
    if let Some(id) = pending.take() {
        pool.release(id);
    }
    w.flush()?;
    debug_assert_eq!(pool.live(), 0);
    log::debug!("closest finished: {stats}");
    Ok(stats)
}

/// Keep the upstream candidate with the greatest end; equal ends keep the
/// earlier element.
fn offer_left(pool: &mut Pool, best: &mut Option<PoolId>, cand: PoolId) {
    match *best {
        None => *best = Some(cand),
        Some(b) => {
            if pool.get(cand).end > pool.get(b).end {
                pool.release(b);
                *best = Some(cand);
            } else {
                pool.release(cand);
            }
        }
    }
}

/// Keep the downstream candidate with the smallest start; equal starts
/// keep the earlier element.
fn nearer_start(pool: &Pool, best: Option<PoolId>, cand: PoolId) -> Option<PoolId> {
    match best {
        None => Some(cand),
        Some(b) => {
            if pool.get(cand).start < pool.get(b).start {
                Some(cand)
            } else {
                Some(b)
            }
        }
    }
}

/// Signed edge-to-edge distance to the reference: 0 for overlap, `gap + 1`
/// otherwise.
fn edge_distance(pool: &Pool, id: PoolId, r_start: u64, r_end: u64) -> i64 {
    let iv = pool.get(id);
    if iv.start < r_end && iv.end > r_start {
        0
    } else if iv.end <= r_start {
        (r_start - iv.end) as i64 + 1
    } else {
        (iv.start - r_end) as i64 + 1
    }
}

fn print_all(
    w: &mut RowWriter<'_>,
    cfg: &ClosestConfig,
    pool: &Pool,
    r: PoolId,
    left: Option<PoolId>,
    left_dist: Option<i64>,
    right: Option<PoolId>,
    right_dist: Option<i64>,
) -> Result<()> {
    if !cfg.suppress_ref {
        w.interval(pool.get(r))?;
        w.text(&cfg.delim)?;
    }
    print_side(w, cfg, pool, left, left_dist)?;
    w.text(&cfg.delim)?;
    print_side(w, cfg, pool, right, right_dist)?;
    w.newline()
}

fn print_shortest(
    w: &mut RowWriter<'_>,
    cfg: &ClosestConfig,
    pool: &Pool,
    r: PoolId,
    left: Option<PoolId>,
    left_dist: Option<i64>,
    right: Option<PoolId>,
    right_dist: Option<i64>,
) -> Result<()> {
    if !cfg.suppress_ref {
        w.interval(pool.get(r))?;
        w.text(&cfg.delim)?;
    }
    let (pick, dist) = match (left, right) {
        (None, None) => (None, None),
        (Some(_), None) => (left, left_dist),
        (None, Some(_)) => (right, right_dist),
        (Some(_), Some(_)) => {
            if left_dist <= right_dist {
                (left, left_dist)
            } else {
                (right, right_dist)
            }
        }
    };
    print_side(w, cfg, pool, pick, dist)?;
    w.newline()
}

fn print_side(
    w: &mut RowWriter<'_>,
    cfg: &ClosestConfig,
    pool: &Pool,
    side: Option<PoolId>,
    dist: Option<i64>,
) -> Result<()> {
    match side {
        Some(id) => {
            w.interval(pool.get(id))?;
            if cfg.dist {
                w.text(&cfg.delim)?;
                w.signed_distance(dist.unwrap_or(0))?;
            }
        }
        None => {
            w.text(NONE_TEXT)?;
            if cfg.dist {
                w.text(&cfg.delim)?;
                w.text(NONE_TEXT)?;
            }
        }
    }
    Ok(())
}
