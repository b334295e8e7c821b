//! Row formatting for sweep output.
//!
//! Integers go through itoa and floats through ryu so the per-row hot path
//! does no allocation. Non-finite statistics render as the `NAN` sentinel.

use std::io::Write;

use crate::config::NAN_TEXT;
use crate::error::Result;
use crate::interval::Interval;

pub struct RowWriter<'a> {
    out: &'a mut dyn Write,
    itoa_buf: itoa::Buffer,
    ryu_buf: ryu::Buffer,
}

impl<'a> RowWriter<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            itoa_buf: itoa::Buffer::new(),
            ryu_buf: ryu::Buffer::new(),
        }
    }

    #[inline]
    pub fn text(&mut self, s: &str) -> Result<()> {
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    #[inline]
    pub fn bytes(&mut self, b: &[u8]) -> Result<()> {
        self.out.write_all(b)?;
        Ok(())
    }

    #[inline]
    pub fn tab(&mut self) -> Result<()> {
        self.bytes(b"\t")
    }

    #[inline]
    pub fn newline(&mut self) -> Result<()> {
        self.bytes(b"\n")
    }

    #[inline]
    pub fn uint(&mut self, n: u64) -> Result<()> {
        let s = self.itoa_buf.format(n);
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    #[inline]
    pub fn int(&mut self, n: i64) -> Result<()> {
        let s = self.itoa_buf.format(n);
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    /// A statistic value; NaN collapses to the `NAN` sentinel.
    #[inline]
    pub fn value(&mut self, v: f64) -> Result<()> {
        if v.is_nan() {
            return self.nan();
        }
        let s = self.ryu_buf.format(v);
        self.out.write_all(s.as_bytes())?;
        Ok(())
    }

    #[inline]
    pub fn nan(&mut self) -> Result<()> {
        self.text(NAN_TEXT)
    }

    /// Signed edge distance: `0` when overlapping, otherwise the sign is
    /// always written.
    #[inline]
    pub fn signed_distance(&mut self, d: i64) -> Result<()> {
        if d > 0 {
            self.bytes(b"+")?;
        }
        self.int(d)
    }

    /// A full interval row, tail verbatim, no trailing newline.
    pub fn interval(&mut self, iv: &Interval) -> Result<()> {
        self.bytes(iv.chrom.as_bytes())?;
        self.tab()?;
        self.uint(iv.start)?;
        self.tab()?;
        self.uint(iv.end)?;
        if !iv.tail.is_empty() {
            self.tab()?;
            self.bytes(iv.tail.as_bytes())?;
        }
        Ok(())
    }

    /// A full interval row with trailing newline.
    pub fn interval_line(&mut self, iv: &Interval) -> Result<()> {
        self.interval(iv)?;
        self.newline()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}
