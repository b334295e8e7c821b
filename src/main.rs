//! bedsweep command line: map statistics onto references, find flanking
//! features, or check sort order.

use clap::{Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::process;

use bedsweep::commands::{run_check_sort, run_closest, run_map, ClosestConfig, MapConfig, MapOp};
use bedsweep::error::{Result, SweepError};
use bedsweep::predicate::{Denominator, Predicate};

#[derive(Parser)]
#[command(name = "bedsweep")]
#[command(version)]
#[command(about = "Set algebra and statistics over sorted BED streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map statistics from a sorted map file onto a sorted reference file
    Map {
        /// Sorted reference BED file (use - for stdin)
        reference: String,

        /// Sorted map BED file; omit to sweep the reference against itself
        map: Option<String>,

        /// Echo each reference row before its operation columns
        #[arg(long)]
        echo: bool,

        /// Number of in-range map items
        #[arg(long)]
        count: bool,

        /// 1 when any map item is in range, else 0
        #[arg(long)]
        indicator: bool,

        /// Sum of map measurements
        #[arg(long)]
        sum: bool,

        /// Mean of map measurements
        #[arg(long)]
        mean: bool,

        /// Sample variance of map measurements
        #[arg(long)]
        variance: bool,

        /// Sample standard deviation of map measurements
        #[arg(long)]
        stdev: bool,

        /// Coefficient of variation (stdev / mean)
        #[arg(long)]
        cv: bool,

        /// Smallest map measurement
        #[arg(long)]
        min: bool,

        /// Largest map measurement
        #[arg(long)]
        max: bool,

        /// Median map measurement
        #[arg(long)]
        median: bool,

        /// K-th order statistic for quantile Q in (0, 1]
        #[arg(long, value_name = "Q")]
        kth: Option<f64>,

        /// Median absolute deviation, scaled by MULT (--mad=2.5)
        #[arg(long, value_name = "MULT", num_args = 0..=1, default_missing_value = "1", require_equals = true)]
        mad: Option<f64>,

        /// Mean with the bottom LO and top HI quantiles trimmed
        #[arg(long, value_names = ["LO", "HI"], num_args = 2)]
        tmean: Option<Vec<f64>>,

        /// Overlap-weighted mean: sum(overlap * score) / reference length
        #[arg(long)]
        wmean: bool,

        /// Overlap-fraction-weighted average of map measurements
        #[arg(long)]
        wavg: bool,

        /// Per-map-item overlap lengths with the reference
        #[arg(long = "echo-ovr-size")]
        echo_ovr_size: bool,

        /// Require at least K overlapping positions (default predicate, K = 1)
        #[arg(long = "bp-ovr", value_name = "K")]
        bp_ovr: Option<u64>,

        /// Treat the reference as padded by D positions on each side
        #[arg(long, value_name = "D")]
        range: Option<u64>,

        /// Require overlap / reference length >= P
        #[arg(long = "fraction-ref", value_name = "P")]
        fraction_ref: Option<f64>,

        /// Require overlap / map length >= P
        #[arg(long = "fraction-map", value_name = "P")]
        fraction_map: Option<f64>,

        /// Require either fraction test to pass
        #[arg(long = "fraction-either", value_name = "P")]
        fraction_either: Option<f64>,

        /// Require both fraction tests to pass
        #[arg(long = "fraction-both", value_name = "P")]
        fraction_both: Option<f64>,

        /// Require identical chromosome, start, and end
        #[arg(long)]
        exact: bool,

        /// Delimiter between the echoed reference and operation columns
        #[arg(long, default_value = "|")]
        delim: String,

        /// Delimiter within list-valued operation columns
        #[arg(long, default_value = ";")]
        multidelim: String,

        /// Process only this chromosome
        #[arg(long)]
        chrom: Option<String>,

        /// Sweep chromosomes in parallel (independent sweeps, file inputs)
        #[arg(long)]
        parallel: bool,
    },

    /// For each reference element, the nearest map elements on each side
    Closest {
        /// Sorted reference BED file (use - for stdin)
        reference: String,

        /// Sorted map BED file
        map: String,

        /// Process only this chromosome
        #[arg(long)]
        chrom: Option<String>,

        /// Report only the closer of the two flanking elements; ties go left
        #[arg(long)]
        closest: bool,

        /// Output column delimiter
        #[arg(long, default_value = "|")]
        delim: String,

        /// Print signed edge-to-edge distances (0 for overlap)
        #[arg(long)]
        dist: bool,

        /// Error-check all input rows (always on; accepted for compatibility)
        #[arg(long)]
        ec: bool,

        /// Accept headers in any input (always on; accepted for compatibility)
        #[arg(long)]
        header: bool,

        /// Never report overlapping map elements
        #[arg(long = "no-overlaps")]
        no_overlaps: bool,

        /// Do not echo reference elements
        #[arg(long = "no-ref")]
        no_ref: bool,
    },

    /// Verify that inputs parse and are in sort order
    CheckSort {
        /// Input BED files (use - for stdin)
        #[arg(default_value = "-")]
        inputs: Vec<String>,

        /// Additionally reject fully nested intervals
        #[arg(long)]
        nested: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Map {
            reference,
            map,
            echo,
            count,
            indicator,
            sum,
            mean,
            variance,
            stdev,
            cv,
            min,
            max,
            median,
            kth,
            mad,
            tmean,
            wmean,
            wavg,
            echo_ovr_size,
            bp_ovr,
            range,
            fraction_ref,
            fraction_map,
            fraction_either,
            fraction_both,
            exact,
            delim,
            multidelim,
            chrom,
            parallel,
        } => run_map_command(MapArgs {
            reference,
            map,
            echo,
            flags: OpFlags {
                count,
                indicator,
                sum,
                mean,
                variance,
                stdev,
                cv,
                min,
                max,
                median,
                kth,
                mad,
                tmean,
                wmean,
                wavg,
                echo_ovr_size,
            },
            predicate: PredicateArgs {
                bp_ovr,
                range,
                fraction_ref,
                fraction_map,
                fraction_either,
                fraction_both,
                exact,
            },
            delim,
            multidelim,
            chrom,
            parallel,
        }),

        Commands::Closest {
            reference,
            map,
            chrom,
            closest,
            delim,
            dist,
            ec,
            header,
            no_overlaps,
            no_ref,
        } => {
            if ec || header {
                log::debug!("inputs are always validated; --ec/--header accepted as no-ops");
            }
            let cfg = ClosestConfig {
                chrom,
                closest_only: closest,
                delim,
                dist,
                allow_overlaps: !no_overlaps,
                suppress_ref: no_ref,
            };
            let stdout = io::stdout();
            let mut out = BufWriter::with_capacity(8 * 1024 * 1024, stdout.lock());
            run_closest(&cfg, &reference, &map, &mut out)
                .map(|_| ())
                .and_then(|_| out.flush().map_err(SweepError::from))
        }

        Commands::CheckSort { inputs, nested } => run_check_sort(&inputs, nested),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

struct OpFlags {
    count: bool,
    indicator: bool,
    sum: bool,
    mean: bool,
    variance: bool,
    stdev: bool,
    cv: bool,
    min: bool,
    max: bool,
    median: bool,
    kth: Option<f64>,
    mad: Option<f64>,
    tmean: Option<Vec<f64>>,
    wmean: bool,
    wavg: bool,
    echo_ovr_size: bool,
}

struct PredicateArgs {
    bp_ovr: Option<u64>,
    range: Option<u64>,
    fraction_ref: Option<f64>,
    fraction_map: Option<f64>,
    fraction_either: Option<f64>,
    fraction_both: Option<f64>,
    exact: bool,
}

struct MapArgs {
    reference: String,
    map: Option<String>,
    echo: bool,
    flags: OpFlags,
    predicate: PredicateArgs,
    delim: String,
    multidelim: String,
    chrom: Option<String>,
    parallel: bool,
}

fn build_predicate(args: &PredicateArgs) -> Result<Predicate> {
    let mut picked: Vec<Predicate> = Vec::new();
    if let Some(k) = args.bp_ovr {
        picked.push(Predicate::Overlapping(k));
    }
    if let Some(d) = args.range {
        picked.push(Predicate::Ranged(d));
    }
    if let Some(p) = args.fraction_ref {
        picked.push(Predicate::percent(Denominator::Reference, p)?);
    }
    if let Some(p) = args.fraction_map {
        picked.push(Predicate::percent(Denominator::Mapping, p)?);
    }
    if let Some(p) = args.fraction_either {
        picked.push(Predicate::percent(Denominator::Either, p)?);
    }
    if let Some(p) = args.fraction_both {
        picked.push(Predicate::percent(Denominator::Both, p)?);
    }
    if args.exact {
        picked.push(Predicate::Exact);
    }
    match picked.len() {
        0 => Ok(Predicate::Overlapping(1)),
        1 => Ok(picked.remove(0)),
        _ => Err(SweepError::Usage(
            "at most one range predicate may be given".to_string(),
        )),
    }
}

fn build_ops(flags: &OpFlags) -> Result<Vec<MapOp>> {
    let mut ops = Vec::new();
    if flags.count {
        ops.push(MapOp::Count);
    }
    if flags.indicator {
        ops.push(MapOp::Indicator);
    }
    if flags.sum {
        ops.push(MapOp::Sum);
    }
    if flags.mean {
        ops.push(MapOp::Mean);
    }
    if flags.variance {
        ops.push(MapOp::Variance);
    }
    if flags.stdev {
        ops.push(MapOp::StdDev);
    }
    if flags.cv {
        ops.push(MapOp::Cv);
    }
    if flags.min {
        ops.push(MapOp::Min);
    }
    if flags.max {
        ops.push(MapOp::Max);
    }
    if flags.median {
        ops.push(MapOp::Median);
    }
    if let Some(q) = flags.kth {
        ops.push(MapOp::Kth(q));
    }
    if let Some(mult) = flags.mad {
        ops.push(MapOp::Mad(mult));
    }
    if let Some(bounds) = &flags.tmean {
        ops.push(MapOp::TrimmedMean(bounds[0], bounds[1]));
    }
    if flags.wmean {
        ops.push(MapOp::WeightedMean);
    }
    if flags.wavg {
        ops.push(MapOp::WeightedAverage);
    }
    if flags.echo_ovr_size {
        ops.push(MapOp::EchoOverlapSize);
    }
    Ok(ops)
}

fn run_map_command(args: MapArgs) -> Result<()> {
    let mut cfg = MapConfig::new(build_predicate(&args.predicate)?);
    cfg.ops = build_ops(&args.flags)?;
    cfg.echo = args.echo;
    cfg.delim = args.delim;
    cfg.multidelim = args.multidelim;
    cfg.chrom = args.chrom;
    cfg.parallel = args.parallel;

    let stdout = io::stdout();
    let mut out = BufWriter::with_capacity(8 * 1024 * 1024, stdout.lock());
    run_map(&cfg, &args.reference, args.map.as_deref(), &mut out)?;
    out.flush()?;
    Ok(())
}
