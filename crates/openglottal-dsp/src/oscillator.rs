//! Wavetable oscillator over a `GlottalTableBank`.
//!
//! Two linear interpolations per sample:
//! - bank dimension: fractional index b blends tables lo = min(floor b, N-2)
//!   and lo + 1 with weight f = b - lo;
//! - phase dimension: p = (n f0 / fs + offset) mod 1, x = p P, blend
//!   samples floor(x) and floor(x) + 1 of the (circular) table.
//!
//! The oscillator holds no running state: sample n is a pure function of
//! the parameters, so any iterator over it can be restarted or cloned.

use crate::tables::GlottalTableBank;

/// Phase of sample `n`, wrapped into [0, 1).
#[inline]
pub fn phase_at(n: usize, f0: f64, offset: f64, sample_rate: f64) -> f64 {
    (n as f64 * f0 / sample_rate + offset).rem_euclid(1.0)
}

/// Output sample plus its local partial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorSample {
    pub value: f64,
    /// Wrapped phase in [0, 1).
    pub phase: f64,
    /// d value / d phase: P (v1 - v0).
    pub d_phase: f64,
    /// d value / d bank index.
    pub d_bank_index: f64,
}

#[derive(Debug, Clone, Copy)]
struct BankBlend {
    lo: usize,
    hi: usize,
    frac: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct WavetableOscillator<'a> {
    bank: &'a GlottalTableBank,
    f0: f64,
    offset: f64,
    bank_index: f64,
    sample_rate: f64,
    blend: BankBlend,
}

impl<'a> WavetableOscillator<'a> {
    /// `bank_index` is clamped into [0, N-1]; `offset` is used mod 1.
    pub fn new(
        bank: &'a GlottalTableBank,
        f0: f64,
        offset: f64,
        bank_index: f64,
        sample_rate: f64,
    ) -> Self {
        let n = bank.len();
        let blend = if n < 2 {
            BankBlend {
                lo: 0,
                hi: 0,
                frac: 0.0,
            }
        } else {
            let b = if bank_index.is_nan() {
                0.0
            } else {
                bank_index.clamp(0.0, (n - 1) as f64)
            };
            let lo = (b.floor() as usize).min(n - 2);
            BankBlend {
                lo,
                hi: lo + 1,
                frac: b - lo as f64,
            }
        };
        Self {
            bank,
            f0,
            offset,
            bank_index,
            sample_rate,
            blend,
        }
    }

    pub fn f0(&self) -> f64 {
        self.f0
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn bank_index(&self) -> f64 {
        self.bank_index
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Output period in samples (fs / f0).
    pub fn period_samples(&self) -> f64 {
        self.sample_rate / self.f0
    }

    pub fn phase(&self, n: usize) -> f64 {
        phase_at(n, self.f0, self.offset, self.sample_rate)
    }

    pub fn sample(&self, n: usize) -> f64 {
        self.sample_with_derivatives(n).value
    }

    pub fn sample_with_derivatives(&self, n: usize) -> OscillatorSample {
        let size = self.bank.table_size();
        let phase = self.phase(n);
        let x = phase * size as f64;
        let base = x.floor();
        let w = x - base;
        let i0 = (base as usize) % size;
        let i1 = (i0 + 1) % size;

        let BankBlend { lo, hi, frac } = self.blend;
        let (tl, th) = (self.bank.table(lo), self.bank.table(hi));
        let v0 = (1.0 - frac) * tl[i0] + frac * th[i0];
        let v1 = (1.0 - frac) * tl[i1] + frac * th[i1];

        OscillatorSample {
            value: (1.0 - w) * v0 + w * v1,
            phase,
            d_phase: size as f64 * (v1 - v0),
            d_bank_index: (1.0 - w) * (th[i0] - tl[i0]) + w * (th[i1] - tl[i1]),
        }
    }

    /// Lazy sequence of the first `steps` samples.
    pub fn samples(&self, steps: usize) -> Samples<'a> {
        Samples {
            osc: *self,
            next: 0,
            steps,
        }
    }

    pub fn render(&self, steps: usize) -> Vec<f64> {
        self.samples(steps).collect()
    }
}

/// Iterator returned by [`WavetableOscillator::samples`].
#[derive(Debug, Clone)]
pub struct Samples<'a> {
    osc: WavetableOscillator<'a>,
    next: usize,
    steps: usize,
}

impl Iterator for Samples<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.next >= self.steps {
            return None;
        }
        let v = self.osc.sample(self.next);
        self.next += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.steps - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for Samples<'_> {}
