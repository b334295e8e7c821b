//! The bedmap-style command: reduce a map stream onto a reference stream
//! (or one stream onto itself) under a range predicate.

use std::fs::File;
use std::io::Write;

use memmap2::Mmap;
use rayon::prelude::*;

use crate::error::{Result, SweepError};
use crate::output::RowWriter;
use crate::pool::Pool;
use crate::predicate::Predicate;
use crate::reader::{chrom_ranges, open_source, seek_chrom_offset, ReaderConfig, ValidatingReader};
use crate::sweep::{sweep_paired, sweep_single, SweepStats};
use crate::visitors::{
    CoeffVariation, Count, EchoOverlapSize, Extreme, Extremum, Indicator, Mean,
    MedianAbsoluteDeviation, MultiVisitor, NeighborCount, RollingKth, RollingKthAverage, StdDev,
    Sum, TrimmedMean, Variance, Visitor, WeightedAverage, WeightedMean,
};

/// One requested per-reference output column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapOp {
    Count,
    Indicator,
    Sum,
    Mean,
    Variance,
    StdDev,
    Cv,
    Min,
    Max,
    Median,
    Kth(f64),
    Mad(f64),
    TrimmedMean(f64, f64),
    WeightedMean,
    WeightedAverage,
    EchoOverlapSize,
}

impl MapOp {
    /// Operations consuming the 5th column force 5-field input rows.
    fn needs_measure(&self) -> bool {
        !matches!(self, MapOp::Count | MapOp::Indicator | MapOp::EchoOverlapSize)
    }

    fn build(&self, cfg: &MapConfig, single_input: bool) -> Result<Box<dyn Visitor>> {
        Ok(match *self {
            // counting yourself is not interesting when the reference is
            // one of the map items
            MapOp::Count if single_input => Box::new(NeighborCount::new()),
            MapOp::Count => Box::new(Count::new()),
            MapOp::Indicator => Box::new(Indicator::new()),
            MapOp::Sum => Box::new(Sum::new()),
            MapOp::Mean => Box::new(Mean::new()),
            MapOp::Variance => Box::new(Variance::new()),
            MapOp::StdDev => Box::new(StdDev::new()),
            MapOp::Cv => Box::new(CoeffVariation::new()),
            MapOp::Min => Box::new(Extreme::new(Extremum::Min)),
            MapOp::Max => Box::new(Extreme::new(Extremum::Max)),
            MapOp::Median => Box::new(RollingKthAverage::median()),
            MapOp::Kth(q) => Box::new(RollingKth::new(q)?),
            MapOp::Mad(mult) => Box::new(MedianAbsoluteDeviation::new(mult)),
            MapOp::TrimmedMean(lo, hi) => Box::new(TrimmedMean::new(lo, hi)?),
            MapOp::WeightedMean => Box::new(WeightedMean::new()),
            MapOp::WeightedAverage => Box::new(WeightedAverage::new()),
            MapOp::EchoOverlapSize => Box::new(EchoOverlapSize::new(cfg.multidelim.clone())),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub ops: Vec<MapOp>,
    pub echo: bool,
    pub predicate: Predicate,
    pub delim: String,
    pub multidelim: String,
    pub chrom: Option<String>,
    pub parallel: bool,
}

impl MapConfig {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            ops: Vec::new(),
            echo: false,
            predicate,
            delim: "|".to_string(),
            multidelim: ";".to_string(),
            chrom: None,
            parallel: false,
        }
    }

    fn map_fields(&self) -> usize {
        if self.ops.iter().any(MapOp::needs_measure) {
            5
        } else {
            3
        }
    }

    fn build_visitor(&self, single_input: bool) -> Result<MultiVisitor> {
        let mut visitors: Vec<Box<dyn Visitor>> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            visitors.push(op.build(self, single_input)?);
        }
        Ok(MultiVisitor::new(visitors, self.echo, self.delim.clone()))
    }
}

/// Run the map command. With `map_path` absent the reference stream sweeps
/// against itself.
pub fn run_map(
    cfg: &MapConfig,
    ref_path: &str,
    map_path: Option<&str>,
    out: &mut dyn Write,
) -> Result<SweepStats> {
    if cfg.ops.is_empty() && !cfg.echo {
        return Err(SweepError::Usage(
            "map requires at least one operation or --echo".to_string(),
        ));
    }

    let stats = match map_path {
        None => run_self(cfg, ref_path, out)?,
        Some(map_path) => {
            if cfg.parallel && ref_path != "-" && map_path != "-" && cfg.chrom.is_none() {
                run_parallel(cfg, ref_path, map_path, out)?
            } else {
                run_serial(cfg, ref_path, map_path, out)?
            }
        }
    };
    log::debug!("map sweep finished: {stats}");
    Ok(stats)
}

fn run_self(cfg: &MapConfig, ref_path: &str, out: &mut dyn Write) -> Result<SweepStats> {
    let reader_cfg = ReaderConfig::new(ref_path)
        .with_chrom(cfg.chrom.clone())
        .with_required_fields(cfg.map_fields());
    let mut reader = open_source(ref_path, reader_cfg)?;
    let mut visitor = cfg.build_visitor(true)?;
    let mut pool = Pool::new();
    let mut row_out = RowWriter::new(out);
    let stats = sweep_single(&mut reader, &mut pool, &cfg.predicate, &mut visitor, &mut row_out)?;
    row_out.flush()?;
    debug_assert_eq!(pool.live(), 0);
    Ok(stats)
}

fn run_serial(
    cfg: &MapConfig,
    ref_path: &str,
    map_path: &str,
    out: &mut dyn Write,
) -> Result<SweepStats> {
    if ref_path == "-" && map_path == "-" {
        return Err(SweepError::Usage(
            "stdin may only be used for one input".to_string(),
        ));
    }
    let ref_cfg = ReaderConfig::new(ref_path).with_chrom(cfg.chrom.clone());
    let map_cfg = ReaderConfig::new(map_path)
        .with_chrom(cfg.chrom.clone())
        .with_required_fields(cfg.map_fields());
    let mut refs = open_source(ref_path, ref_cfg)?;
    let mut maps = open_source(map_path, map_cfg)?;
    let mut visitor = cfg.build_visitor(false)?;
    let mut pool = Pool::new();
    let mut row_out = RowWriter::new(out);
    let stats = sweep_paired(
        &mut refs,
        &mut maps,
        &mut pool,
        &cfg.predicate,
        &mut visitor,
        &mut row_out,
        false,
    )?;
    row_out.flush()?;
    debug_assert_eq!(pool.live(), 0);
    Ok(stats)
}

/// One fully independent sweep per reference chromosome: disjoint pools,
/// readers, and visitors, with per-chromosome output buffers concatenated
/// in file order. The core stays single-threaded; this is parallelism
/// across sweeps, not within one.
fn run_parallel(
    cfg: &MapConfig,
    ref_path: &str,
    map_path: &str,
    out: &mut dyn Write,
) -> Result<SweepStats> {
    let ref_file = File::open(ref_path)?;
    let map_file = File::open(map_path)?;
    // Safety: both maps are read-only for the duration of the sweeps.
    let ref_bytes = unsafe { Mmap::map(&ref_file) }?;
    let map_bytes = unsafe { Mmap::map(&map_file) }?;

    let ranges = chrom_ranges(&ref_bytes);
    for pair in ranges.windows(2) {
        if pair[1].0 <= pair[0].0 {
            return Err(SweepError::SortOrder {
                file: ref_path.to_string(),
                line: 0,
                msg: format!("chromosome '{}' after '{}'", pair[1].0, pair[0].0),
            });
        }
    }
    log::info!(
        "{}: {} chromosomes swept in parallel",
        ref_path,
        ranges.len()
    );

    let chunks: Result<Vec<(Vec<u8>, SweepStats)>> = ranges
        .into_par_iter()
        .map(|(chrom, range)| {
            let ref_cfg = ReaderConfig::new(format!("{ref_path}:{chrom}"));
            let map_cfg = ReaderConfig::new(format!("{map_path}:{chrom}"))
                .with_chrom(Some(chrom.clone()))
                .with_required_fields(cfg.map_fields());
            let mut refs = ValidatingReader::new(&ref_bytes[range], ref_cfg);
            let map_off = seek_chrom_offset(&map_bytes, chrom.as_bytes());
            let mut maps = ValidatingReader::new(&map_bytes[map_off..], map_cfg);

            let mut visitor = cfg.build_visitor(false)?;
            let mut pool = Pool::new();
            let mut buf = Vec::new();
            let stats = {
                let mut row_out = RowWriter::new(&mut buf);
                sweep_paired(
                    &mut refs,
                    &mut maps,
                    &mut pool,
                    &cfg.predicate,
                    &mut visitor,
                    &mut row_out,
                    false,
                )?
            };
            debug_assert_eq!(pool.live(), 0);
            Ok((buf, stats))
        })
        .collect();

    let mut total = SweepStats::default();
    for (buf, stats) in chunks? {
        out.write_all(&buf)?;
        total.references += stats.references;
        total.map_items += stats.map_items;
        total.max_window = total.max_window.max(stats.max_window);
    }
    out.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Denominator;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn temp_bed(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn path(f: &NamedTempFile) -> String {
        f.path().to_string_lossy().into_owned()
    }

    #[test]
    fn self_count_excludes_the_reference() {
        let f = temp_bed("chr1\t10\t20\nchr1\t15\t25\nchr1\t30\t40\n");
        let mut cfg = MapConfig::new(Predicate::Overlapping(1));
        cfg.ops = vec![MapOp::Count];
        cfg.echo = true;
        let mut out = Vec::new();
        run_map(&cfg, &path(&f), None, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "chr1\t10\t20|1\nchr1\t15\t25|1\nchr1\t30\t40|0\n"
        );
    }

    #[test]
    fn paired_mean() {
        let refs = temp_bed("chr1\t0\t100\n");
        let maps = temp_bed("chr1\t10\t20\ta\t2.0\nchr1\t50\t60\tb\t4.0\nchr2\t0\t10\tc\t100.0\n");
        let mut cfg = MapConfig::new(Predicate::Overlapping(1));
        cfg.ops = vec![MapOp::Mean];
        let mut out = Vec::new();
        run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "3.0\n");
    }

    #[test]
    fn percent_reference_count() {
        let refs = temp_bed("chr1\t0\t100\n");
        let maps = temp_bed("chr1\t0\t40\tm1\nchr1\t0\t50\tm2\nchr1\t0\t60\tm3\n");
        let pred = Predicate::percent(Denominator::Reference, 0.5).unwrap();
        let mut cfg = MapConfig::new(pred);
        cfg.ops = vec![MapOp::Count];
        let mut out = Vec::new();
        run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\n");
    }

    #[test]
    fn requires_an_operation() {
        let f = temp_bed("chr1\t0\t10\n");
        let cfg = MapConfig::new(Predicate::Overlapping(1));
        let mut out = Vec::new();
        assert!(matches!(
            run_map(&cfg, &path(&f), None, &mut out),
            Err(SweepError::Usage(_))
        ));
    }

    #[test]
    fn short_rows_fail_for_measure_ops() {
        let refs = temp_bed("chr1\t0\t100\n");
        let maps = temp_bed("chr1\t10\t20\n");
        let mut cfg = MapConfig::new(Predicate::Overlapping(1));
        cfg.ops = vec![MapOp::Mean];
        let mut out = Vec::new();
        let err = run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut out).unwrap_err();
        assert!(matches!(err, SweepError::Parse { .. }));
    }

    #[test]
    fn parallel_matches_serial() {
        let mut ref_text = String::new();
        let mut map_text = String::new();
        for chrom in ["chr1", "chr2", "chr3"] {
            for i in 0..20u64 {
                ref_text.push_str(&format!("{chrom}\t{}\t{}\n", i * 100, i * 100 + 50));
                map_text.push_str(&format!(
                    "{chrom}\t{}\t{}\tid\t{}.0\n",
                    i * 100 + 10,
                    i * 100 + 40,
                    i + 1
                ));
            }
        }
        let refs = temp_bed(&ref_text);
        let maps = temp_bed(&map_text);

        let mut cfg = MapConfig::new(Predicate::Overlapping(1));
        cfg.ops = vec![MapOp::Count, MapOp::Mean];
        cfg.echo = true;

        let mut serial = Vec::new();
        run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut serial).unwrap();

        cfg.parallel = true;
        let mut parallel = Vec::new();
        run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut parallel).unwrap();

        assert_eq!(serial, parallel);
        assert!(!serial.is_empty());
    }

    #[test]
    fn chrom_filter_restricts_output() {
        let refs = temp_bed("chr1\t0\t10\nchr2\t0\t10\nchr3\t0\t10\n");
        let maps = temp_bed("chr1\t0\t5\nchr2\t0\t5\nchr3\t0\t5\n");
        let mut cfg = MapConfig::new(Predicate::Overlapping(1));
        cfg.ops = vec![MapOp::Count];
        cfg.echo = true;
        cfg.chrom = Some("chr2".to_string());
        let mut out = Vec::new();
        run_map(&cfg, &path(&refs), Some(&path(&maps)), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "chr2\t0\t10|1\n");
    }
}
