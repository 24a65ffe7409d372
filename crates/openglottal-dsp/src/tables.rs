//! Glottal wavetable bank: one LF period per Rd, Rd sampled log-uniformly.
//!
//! Every table is circularly shifted so its minimum (the main excitation
//! instant) lands on the same index. Without this, blending two neighbouring
//! tables would smear the excitation across two positions.
//!
//! Built once, then shared read-only (wrap in `Arc` to share across models).

use crate::error::{Error, Result};
use crate::glottal::{LfPulse, RD_MAX, RD_MIN};

pub const DEFAULT_TABLE_SIZE: usize = 1024;
pub const DEFAULT_TABLE_COUNT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct GlottalTableBank {
    tables: Vec<Vec<f64>>,
    rd_values: Vec<f64>,
    table_size: usize,
    align_index: usize,
}

impl GlottalTableBank {
    /// `table_count` tables of `table_size` samples over the calibrated Rd range.
    pub fn new(table_count: usize, table_size: usize) -> Result<Self> {
        Self::with_range(table_count, table_size, RD_MIN, RD_MAX)
    }

    /// Bank over an explicit Rd range. Rd values outside the calibrated
    /// range are generated best-effort.
    pub fn with_range(table_count: usize, table_size: usize, rd_min: f64, rd_max: f64) -> Result<Self> {
        if table_count == 0 {
            return Err(Error::InvalidConfig("table bank needs at least one table".to_string()));
        }
        if table_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "table size must be at least 2, got {table_size}"
            )));
        }
        if !(rd_min.is_finite() && rd_max.is_finite() && rd_min > 0.0 && rd_max >= rd_min) {
            return Err(Error::InvalidConfig(format!(
                "invalid Rd range [{rd_min}, {rd_max}]"
            )));
        }

        let rd_values = log_uniform(rd_min, rd_max, table_count);
        let raw: Vec<Vec<f64>> = rd_values
            .iter()
            .map(|&rd| LfPulse::new(rd).table(table_size))
            .collect();

        let minima: Vec<usize> = raw.iter().map(|t| argmin(t)).collect();
        let align_index = minima.iter().copied().max().unwrap_or(0);

        let tables = raw
            .into_iter()
            .zip(&minima)
            .map(|(mut t, &pos)| {
                t.rotate_right(align_index - pos);
                t
            })
            .collect();

        tracing::debug!(table_count, table_size, align_index, "built glottal table bank");

        Ok(Self {
            tables,
            rd_values,
            table_size,
            align_index,
        })
    }

    /// Number of tables (N).
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Samples per table (P).
    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn table(&self, index: usize) -> &[f64] {
        &self.tables[index]
    }

    pub fn rd_values(&self) -> &[f64] {
        &self.rd_values
    }

    /// Index every table's minimum was shifted to.
    pub fn alignment_index(&self) -> usize {
        self.align_index
    }

    /// Rd at a fractional bank index (log-linear between neighbours).
    pub fn rd_at(&self, index: f64) -> f64 {
        let n = self.rd_values.len();
        if n == 1 {
            return self.rd_values[0];
        }
        let x = index.clamp(0.0, (n - 1) as f64);
        let lo = (x.floor() as usize).min(n - 2);
        let frac = x - lo as f64;
        let (a, b) = (self.rd_values[lo].ln(), self.rd_values[lo + 1].ln());
        (a + frac * (b - a)).exp()
    }

    /// Fractional bank index of `rd`, clamped to the bank.
    pub fn index_of_rd(&self, rd: f64) -> f64 {
        let n = self.rd_values.len();
        if n == 1 || rd.is_nan() || rd <= 0.0 {
            return 0.0;
        }
        let lo = self.rd_values[0].ln();
        let hi = self.rd_values[n - 1].ln();
        if hi <= lo {
            return 0.0;
        }
        ((rd.ln() - lo) / (hi - lo) * (n - 1) as f64).clamp(0.0, (n - 1) as f64)
    }
}

fn log_uniform(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![lo];
    }
    let (a, b) = (lo.ln(), hi.ln());
    (0..count)
        .map(|k| (a + (b - a) * k as f64 / (count - 1) as f64).exp())
        .collect()
}

fn argmin(x: &[f64]) -> usize {
    let mut best = 0;
    for i in 1..x.len() {
        if x[i] < x[best] {
            best = i;
        }
    }
    best
}
