use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum HistogramError {
    #[error("histogram needs at least one bin")]
    NoBins,
    #[error("invalid histogram range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },
}

/// Fixed-width histogram over `[min, max]`.
///
/// Values outside the range land in the first or last bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    min: f64,
    max: f64,
    counts: Vec<u32>,
}

impl Histogram {
    pub fn new(min: f64, max: f64, bins: usize) -> Result<Self, HistogramError> {
        if bins == 0 {
            return Err(HistogramError::NoBins);
        }
        if !(min.is_finite() && max.is_finite() && max > min) {
            return Err(HistogramError::InvalidRange { min, max });
        }
        Ok(Self {
            min,
            max,
            counts: vec![0; bins],
        })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Bin a value would fall into; `None` for NaN.
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        let n = self.counts.len();
        let t = (value - self.min) / (self.max - self.min);
        let bin = (t * n as f64).floor();
        Some(if bin <= 0.0 {
            0
        } else {
            (bin as usize).min(n - 1)
        })
    }

    /// Count `value`; returns the bin it went to.
    pub fn add(&mut self, value: f64) -> Option<usize> {
        let bin = self.bin_of(value)?;
        self.counts[bin] += 1;
        Some(bin)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// `[lo, hi)` value range of a bin.
    pub fn bin_range(&self, bin: usize) -> (f64, f64) {
        let w = (self.max - self.min) / self.counts.len() as f64;
        (self.min + w * bin as f64, self.min + w * (bin + 1) as f64)
    }

    pub fn empty_bins(&self) -> Vec<usize> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == 0)
            .map(|(i, _)| i)
            .collect()
    }
}
