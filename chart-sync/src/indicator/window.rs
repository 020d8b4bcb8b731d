/// Fixed-capacity rolling window with a running sum
///
/// Backs the SMA and the RSI gain/loss averages.
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    /// Maximum number of entries to keep
    capacity: usize,
    values: VecDeque<f64>,
    /// Running sum of `values`
    sum: f64,
    /// Evictions since the sum was last rebuilt from contents
    evictions: usize,
}

impl RollingWindow {
    /// Create a new window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            evictions: 0,
        }
    }

    /// Push a value, returning the evicted oldest value once full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() >= self.capacity {
            self.values.pop_front()
        } else {
            None
        };

        self.values.push_back(value);
        match evicted {
            Some(old) => {
                self.evictions += 1;
                if self.evictions >= self.capacity {
                    // Rebuild to keep floating-point drift bounded
                    self.sum = self.values.iter().sum();
                    self.evictions = 0;
                } else {
                    self.sum += value - old;
                }
            }
            None => self.sum += value,
        }
        evicted
    }

    /// Mean of the window, defined only once it is full.
    pub fn mean(&self) -> Option<f64> {
        self.is_full().then(|| self.sum / self.capacity as f64)
    }

    /// Mean the window would have after pushing `value`, without pushing it.
    ///
    /// Performs the same arithmetic as [`Self::push`] so the result is
    /// bit-identical to pushing and then calling [`Self::mean`].
    pub fn peek_mean(&self, value: f64) -> Option<f64> {
        if self.values.len() + 1 < self.capacity {
            return None;
        }
        let sum = match self.values.front() {
            Some(&old) if self.is_full() => {
                if self.evictions + 1 >= self.capacity {
                    self.values.iter().skip(1).sum::<f64>() + value
                } else {
                    self.sum + (value - old)
                }
            }
            _ => self.sum + value,
        };
        Some(sum / self.capacity as f64)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.evictions = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }
}
