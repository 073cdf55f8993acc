use std::collections::VecDeque;

use bigdecimal::{BigDecimal, Zero};

use crate::units::div_rounded;

/// Fixed-capacity buffer of numeric samples, newest first.
#[derive(Debug, Clone)]
pub struct RollingSamples {
    samples: VecDeque<BigDecimal>,
    max_len: usize,
}

impl RollingSamples {
    pub fn new(max_len: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
        }
    }

    /// Prepends a sample and evicts the oldest ones beyond capacity.
    pub fn push(&mut self, value: BigDecimal) {
        self.samples.push_front(value);
        self.samples.truncate(self.max_len);
    }

    /// Arithmetic mean, or `None` when empty.
    pub fn average(&self) -> Option<BigDecimal> {
        if self.samples.is_empty() {
            return None;
        }

        let sum = self
            .samples
            .iter()
            .fold(BigDecimal::zero(), |acc, v| acc + v);

        Some(div_rounded(&sum, &BigDecimal::from(self.samples.len() as u64)))
    }

    pub fn max(&self) -> Option<BigDecimal> {
        self.samples.iter().max().cloned()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Iterates newest to oldest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &BigDecimal> {
        self.samples.iter()
    }
}
