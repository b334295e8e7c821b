//! Validating source iterator: reads sorted interval text, enforces the
//! row grammar and sort-order invariants, and yields pool-backed records.
//!
//! Every failure is fatal and reported with the source name and line
//! number. The first three columns may be separated by a tab or a single
//! space; everything past the third column is tab-delimited and preserved
//! verbatim as the record tail.
//!
//! A chromosome filter positions seekable sources with a binary search
//! over byte offsets (`memmap2`) and linearly skips non-seekable ones,
//! stopping for good once a later chromosome appears.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use memchr::{memchr, memchr2};
use memmap2::Mmap;

use crate::config::{MAX_CHROM_LEN, MAX_COORD, MAX_COORD_DIGITS, MAX_ID_LEN, MAX_TAIL_LEN};
use crate::error::{Result, SweepError};
use crate::interval::Strand;
use crate::pool::{Pool, PoolId};

/// Behavior knobs for one source.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Name used in error messages ("-" for stdin).
    pub source_name: String,
    /// Produce rows for this chromosome only.
    pub chrom_filter: Option<String>,
    /// Columns every row must carry (3..=6). Columns up to this count are
    /// grammar-checked; anything further is uninterpreted tail.
    pub required_fields: usize,
    /// Reject fully nested intervals as a sort-order error.
    pub reject_nested: bool,
}

impl ReaderConfig {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            chrom_filter: None,
            required_fields: 3,
            reject_nested: false,
        }
    }

    pub fn with_chrom(mut self, chrom: Option<String>) -> Self {
        self.chrom_filter = chrom;
        self
    }

    pub fn with_required_fields(mut self, n: usize) -> Self {
        self.required_fields = n;
        self
    }

    pub fn with_nested_check(mut self, on: bool) -> Self {
        self.reject_nested = on;
        self
    }
}

#[derive(Debug)]
struct Parsed<'a> {
    chrom: &'a str,
    start: u64,
    end: u64,
    tail: &'a str,
    measure: Option<f64>,
    strand: Option<Strand>,
}

#[derive(Default)]
struct PrevRow {
    any: bool,
    chrom: String,
    start: u64,
    end: u64,
    tail: String,
    max_end: u64,
}

pub struct ValidatingReader<R: BufRead> {
    input: R,
    cfg: ReaderConfig,
    line_no: usize,
    seen_data: bool,
    done: bool,
    buf: String,
    prev: PrevRow,
}

impl<R: BufRead> ValidatingReader<R> {
    pub fn new(input: R, cfg: ReaderConfig) -> Self {
        Self {
            input,
            cfg,
            line_no: 0,
            seen_data: false,
            done: false,
            buf: String::with_capacity(1024),
            prev: PrevRow::default(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.cfg.source_name
    }

    /// Read, validate, and allocate the next record. `Ok(None)` at end of
    /// input or once the chromosome filter is exhausted.
    pub fn read_into(&mut self, pool: &mut Pool) -> Result<Option<PoolId>> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let n = self.input.read_line(&mut self.buf)?;
            if n == 0 {
                self.done = true;
                return Ok(None);
            }
            self.line_no += 1;

            let line = trim_line(&self.buf);
            if line.is_empty() {
                return Err(self.err("empty line"));
            }
            if is_header(line) {
                if self.seen_data {
                    return Err(self.err("header permitted only before the first data row"));
                }
                continue;
            }

            let parsed = parse_line(line, &self.cfg, self.line_no)?;
            Self::check_order(
                &mut self.prev,
                &self.cfg,
                self.line_no,
                &parsed,
            )?;
            self.seen_data = true;

            if let Some(filter) = &self.cfg.chrom_filter {
                match parsed.chrom.cmp(filter.as_str()) {
                    Ordering::Less => continue,
                    Ordering::Greater => {
                        self.done = true;
                        return Ok(None);
                    }
                    Ordering::Equal => {}
                }
            }

            let id = pool.alloc_record(
                parsed.chrom,
                parsed.start,
                parsed.end,
                parsed.tail,
                parsed.measure,
                parsed.strand,
            )?;
            return Ok(Some(id));
        }
    }

    /// Validate the whole source, releasing records as they come. Returns
    /// the number of rows that passed.
    pub fn validate_to_end(&mut self, pool: &mut Pool) -> Result<u64> {
        let mut rows = 0;
        while let Some(id) = self.read_into(pool)? {
            pool.release(id);
            rows += 1;
        }
        Ok(rows)
    }

    fn err(&self, msg: impl Into<String>) -> SweepError {
        SweepError::Parse {
            file: self.cfg.source_name.clone(),
            line: self.line_no,
            msg: msg.into(),
        }
    }

    fn check_order(
        prev: &mut PrevRow,
        cfg: &ReaderConfig,
        line_no: usize,
        cur: &Parsed<'_>,
    ) -> Result<()> {
        let order_err = |msg: String| SweepError::SortOrder {
            file: cfg.source_name.clone(),
            line: line_no,
            msg,
        };

        if prev.any {
            match cur.chrom.cmp(prev.chrom.as_str()) {
                Ordering::Less => {
                    return Err(order_err(format!(
                        "chromosome '{}' after '{}'",
                        cur.chrom, prev.chrom
                    )));
                }
                Ordering::Greater => {}
                Ordering::Equal => {
                    if cur.start < prev.start {
                        return Err(order_err(format!(
                            "start {} after start {}",
                            cur.start, prev.start
                        )));
                    }
                    if cur.start == prev.start && cur.end < prev.end {
                        return Err(order_err(format!(
                            "end {} after end {} for equal starts",
                            cur.end, prev.end
                        )));
                    }
                    if cur.start == prev.start
                        && cur.end == prev.end
                        && cur.tail < prev.tail.as_str()
                    {
                        return Err(order_err(
                            "text after the third column regressed for equal coordinates"
                                .to_string(),
                        ));
                    }
                    if cfg.reject_nested && cur.start > prev.start && cur.end < prev.max_end {
                        return Err(order_err(format!(
                            "interval [{}, {}) fully nested under an earlier end {}",
                            cur.start, cur.end, prev.max_end
                        )));
                    }
                }
            }
        }

        if !prev.any || cur.chrom != prev.chrom {
            prev.max_end = cur.end;
        } else {
            prev.max_end = prev.max_end.max(cur.end);
        }
        prev.any = true;
        prev.chrom.clear();
        prev.chrom.push_str(cur.chrom);
        prev.start = cur.start;
        prev.end = cur.end;
        prev.tail.clear();
        prev.tail.push_str(cur.tail);
        Ok(())
    }
}

/// Open a path ("-" for stdin) as a validating reader, seeking straight to
/// the filtered chromosome when the source is a regular file.
pub fn open_source(path: &str, cfg: ReaderConfig) -> Result<ValidatingReader<Box<dyn BufRead>>> {
    if path == "-" {
        let input: Box<dyn BufRead> = Box::new(BufReader::new(io::stdin().lock()));
        return Ok(ValidatingReader::new(input, cfg));
    }

    let mut file = File::open(Path::new(path)).map_err(|e| {
        SweepError::Io(io::Error::new(e.kind(), format!("{path}: {e}")))
    })?;

    if let Some(chrom) = &cfg.chrom_filter {
        // Safety: the map is read-only and dropped before the file is read.
        let mmap = unsafe { Mmap::map(&file) }?;
        let offset = seek_chrom_offset(&mmap, chrom.as_bytes());
        log::debug!("{path}: chromosome {chrom} starts at byte {offset}");
        drop(mmap);
        file.seek(SeekFrom::Start(offset as u64))?;
    }

    let input: Box<dyn BufRead> = Box::new(BufReader::with_capacity(256 * 1024, file));
    Ok(ValidatingReader::new(input, cfg))
}

fn trim_line(buf: &str) -> &str {
    let line = buf.strip_suffix('\n').unwrap_or(buf);
    line.strip_suffix('\r').unwrap_or(line)
}

/// UCSC-style header rows: `track`, `browser`, `#…`, `@…`.
fn is_header(line: &str) -> bool {
    let b = line.as_bytes();
    if b[0] == b'#' || b[0] == b'@' {
        return true;
    }
    let token_end = memchr2(b'\t', b' ', b).unwrap_or(b.len());
    let token = &b[..token_end];
    token.eq_ignore_ascii_case(b"track") || token.eq_ignore_ascii_case(b"browser")
}

fn parse_line<'a>(line: &'a str, cfg: &ReaderConfig, line_no: usize) -> Result<Parsed<'a>> {
    let fail = |msg: String| SweepError::Parse {
        file: cfg.source_name.clone(),
        line: line_no,
        msg,
    };
    let b = line.as_bytes();

    // chromosome
    let chrom_end = memchr2(b'\t', b' ', b)
        .ok_or_else(|| fail("row has fewer than 3 columns".to_string()))?;
    if chrom_end == 0 {
        return Err(fail("chromosome column is empty".to_string()));
    }
    if chrom_end > MAX_CHROM_LEN {
        return Err(fail(format!(
            "chromosome name longer than {MAX_CHROM_LEN} bytes"
        )));
    }
    let chrom = &line[..chrom_end];

    // start
    let (start, start_end) = parse_coord(b, chrom_end + 1, "start", &fail)?;
    if start_end >= b.len() {
        return Err(fail("row has no end coordinate".to_string()));
    }
    if b[start_end] != b'\t' && b[start_end] != b' ' {
        return Err(fail(format!(
            "start coordinate contains non-numeric character: {}",
            b[start_end] as char
        )));
    }

    // end
    let (end, end_end) = parse_coord(b, start_end + 1, "end", &fail)?;
    if end <= start {
        return Err(fail(format!(
            "end coordinate {end} must be greater than start coordinate {start}"
        )));
    }

    // delimiter after the third column must be a tab; spaces are only
    // accepted between the first three columns
    let tail = if end_end >= b.len() {
        ""
    } else if b[end_end] == b'\t' {
        &line[end_end + 1..]
    } else if b[end_end] == b' ' {
        return Err(fail(
            "columns past the third must be tab-delimited".to_string(),
        ));
    } else {
        return Err(fail(format!(
            "end coordinate contains non-numeric character: {}",
            b[end_end] as char
        )));
    };

    if tail.len() > MAX_TAIL_LEN {
        return Err(fail(format!(
            "text after the third column longer than {MAX_TAIL_LEN} bytes"
        )));
    }

    let mut measure = None;
    let mut strand = None;
    if cfg.required_fields > 3 {
        let mut fields = tail.split('\t');

        let id = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| fail(format!(
                "only 3 columns given, require at least {}",
                cfg.required_fields
            )))?;
        if id.as_bytes().contains(&b' ') {
            return Err(fail("id column may not contain a space".to_string()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(fail(format!("id column longer than {MAX_ID_LEN} bytes")));
        }

        if cfg.required_fields > 4 {
            let raw = fields.next().filter(|f| !f.is_empty()).ok_or_else(|| {
                fail(format!(
                    "only 4 columns given, require at least {}",
                    cfg.required_fields
                ))
            })?;
            check_measure_grammar(raw.as_bytes()).map_err(&fail)?;
            let v: f64 = raw
                .parse()
                .map_err(|_| fail(format!("measurement '{raw}' is not a number")))?;
            measure = Some(v);
        }

        if cfg.required_fields > 5 {
            let raw = fields.next().filter(|f| !f.is_empty()).ok_or_else(|| {
                fail(format!(
                    "only 5 columns given, require at least {}",
                    cfg.required_fields
                ))
            })?;
            if raw.len() != 1 {
                return Err(fail(format!("strand column must be '+' or '-', got '{raw}'")));
            }
            strand = Strand::from_byte(raw.as_bytes()[0])
                .ok_or_else(|| fail(format!("strand column must be '+' or '-', got '{raw}'")))?
                .into();
        }
    }

    Ok(Parsed {
        chrom,
        start,
        end,
        tail,
        measure,
        strand,
    })
}

fn parse_coord(
    b: &[u8],
    from: usize,
    which: &str,
    fail: &impl Fn(String) -> SweepError,
) -> Result<(u64, usize)> {
    let mut i = from;
    let mut value: u64 = 0;
    while i < b.len() {
        let d = b[i].wrapping_sub(b'0');
        if d > 9 {
            break;
        }
        value = value * 10 + d as u64;
        i += 1;
        if i - from > MAX_COORD_DIGITS {
            return Err(fail(format!(
                "{which} coordinate has more than {MAX_COORD_DIGITS} digits"
            )));
        }
    }
    if i == from {
        let found = if from < b.len() {
            format!("'{}'", b[from] as char)
        } else {
            "end of row".to_string()
        };
        return Err(fail(format!(
            "{which} coordinate must be decimal digits, found {found}"
        )));
    }
    if value > MAX_COORD {
        return Err(fail(format!(
            "{which} coordinate {value} exceeds the configured maximum {MAX_COORD}"
        )));
    }
    Ok((value, i))
}

/// Measurement grammar: at most one decimal point, at most one exponent
/// marker, signs only leading or immediately after the exponent.
fn check_measure_grammar(b: &[u8]) -> std::result::Result<(), String> {
    let mut decimals = 0;
    let mut exps = 0;
    let mut exp_pos = None;
    for (i, &c) in b.iter().enumerate() {
        match c {
            b'0'..=b'9' => {}
            b'.' => {
                decimals += 1;
                if decimals > 1 {
                    return Err("more than one decimal point in measurement".to_string());
                }
                if exps > 0 {
                    return Err("decimal point inside the measurement exponent".to_string());
                }
            }
            b'e' | b'E' => {
                exps += 1;
                if exps > 1 {
                    return Err("multiple exponent markers in measurement".to_string());
                }
                exp_pos = Some(i);
            }
            b'+' | b'-' => {
                let after_exp = exp_pos.map_or(false, |p| p + 1 == i);
                if i != 0 && !after_exp {
                    return Err("measurement sign in the wrong position".to_string());
                }
                if i + 1 == b.len() {
                    return Err("measurement ends with a sign".to_string());
                }
            }
            b' ' => return Err("measurement may not contain a space".to_string()),
            other => {
                return Err(format!(
                    "measurement contains non-numeric character: {}",
                    other as char
                ));
            }
        }
    }
    Ok(())
}

/// Byte offset of the first row of `chrom` (or of the first later
/// chromosome when absent) in a sorted, header-prefixed byte image.
pub fn seek_chrom_offset(bytes: &[u8], chrom: &[u8]) -> usize {
    let mut lo = skip_header_block(bytes);
    if lo >= bytes.len() {
        return lo;
    }
    if chrom_token(bytes, lo) >= chrom {
        return lo;
    }
    let mut hi = bytes.len();
    // invariant: line at lo sorts before chrom, line at hi (if any) does not
    while let Some(split) = interior_line_start(bytes, lo, hi) {
        if chrom_token(bytes, split) < chrom {
            lo = split;
        } else {
            hi = split;
        }
    }
    hi
}

/// Chromosome ranges of a sorted byte image, in file order.
pub fn chrom_ranges(bytes: &[u8]) -> Vec<(String, Range<usize>)> {
    let mut out: Vec<(String, Range<usize>)> = Vec::new();
    let mut pos = skip_header_block(bytes);
    while pos < bytes.len() {
        let token = chrom_token(bytes, pos);
        let line_end = memchr(b'\n', &bytes[pos..])
            .map(|i| pos + i + 1)
            .unwrap_or(bytes.len());
        let extends_last = matches!(out.last(), Some((name, _)) if name.as_bytes() == token);
        if extends_last {
            out.last_mut().expect("non-empty after match").1.end = line_end;
        } else {
            out.push((String::from_utf8_lossy(token).into_owned(), pos..line_end));
        }
        pos = line_end;
    }
    out
}

fn skip_header_block(bytes: &[u8]) -> usize {
    let mut pos = 0;
    while pos < bytes.len() {
        let line_end = memchr(b'\n', &bytes[pos..])
            .map(|i| pos + i + 1)
            .unwrap_or(bytes.len());
        let line = &bytes[pos..line_end];
        let text = std::str::from_utf8(line).unwrap_or("");
        let text = text.trim_end_matches(['\n', '\r']);
        if text.is_empty() || !is_header(text) {
            break;
        }
        pos = line_end;
    }
    pos
}

fn chrom_token(bytes: &[u8], line_start: usize) -> &[u8] {
    let rest = &bytes[line_start..];
    let end = rest
        .iter()
        .position(|&c| c == b'\t' || c == b' ' || c == b'\n' || c == b'\r')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// A line start strictly inside `(lo, hi)`, or `None` when no such start
/// exists. Midpoint-snapped so the caller's search stays logarithmic on
/// uniform rows.
fn interior_line_start(bytes: &[u8], lo: usize, hi: usize) -> Option<usize> {
    let mid = lo + (hi - lo) / 2;
    if let Some(i) = memchr(b'\n', &bytes[mid..hi]) {
        let s = mid + i + 1;
        if s < hi {
            return Some(s);
        }
    }
    if let Some(i) = memchr(b'\n', &bytes[lo..mid]) {
        let s = lo + i + 1;
        if s > lo && s < hi {
            return Some(s);
        }
    }
    None
}
