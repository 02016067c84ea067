//! Trailing row windows for per-ticker rolling statistics
//!
//! A window holds the last `size` observations of one partition, current
//! row included. Observations may be missing (`None`); statistics skip
//! them, matching SQL aggregate semantics over a `ROWS BETWEEN n PRECEDING
//! AND CURRENT ROW` frame.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TrailingWindow {
    size: usize,
    values: VecDeque<Option<f64>>,
}

impl TrailingWindow {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "window size must be positive");
        Self {
            size,
            values: VecDeque::with_capacity(size),
        }
    }

    /// Push the current row's observation, evicting the oldest one once the
    /// window is full.
    pub fn push(&mut self, value: Option<f64>) {
        if self.values.len() == self.size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn present(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }

    /// Mean of the present observations; `None` when there are none.
    pub fn mean(&self) -> Option<f64> {
        let (sum, n) = self.present().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            None
        } else {
            Some(sum / n as f64)
        }
    }

    /// Sample standard deviation (n - 1 denominator); `None` below two
    /// present observations.
    pub fn sample_std(&self) -> Option<f64> {
        let n = self.present().count();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let ss: f64 = self.present().map(|v| (v - mean).powi(2)).sum();
        Some((ss / (n - 1) as f64).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = TrailingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            w.push(Some(v));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.mean(), Some(3.0));
    }

    #[test]
    fn test_partial_window_uses_available_rows() {
        let mut w = TrailingWindow::new(7);
        w.push(Some(2.0));
        w.push(Some(4.0));
        assert_eq!(w.mean(), Some(3.0));
        let std = w.sample_std().unwrap();
        assert!((std - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let mut w = TrailingWindow::new(7);
        w.push(None);
        assert!(w.mean().is_none());
        assert!(w.sample_std().is_none());

        w.push(Some(0.5));
        assert_eq!(w.mean(), Some(0.5));
        // one sample is not enough for a sample deviation
        assert!(w.sample_std().is_none());
    }
}
