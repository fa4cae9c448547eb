//! Deterministic `DeterministicRng` implementations for tests.

use cascade_core::rng::DeterministicRng;

/// An RNG that always returns `min` for `next_u32_range` and `0.0` for
/// `next_f64`. With a payment gateway that approves below its approval rate,
/// every payment is approved.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_u32_range(&mut self, min: u32, _max: u32) -> u32 {
        min
    }

    fn next_f64(&mut self) -> f64 {
        0.0
    }
}

/// An RNG that replays predetermined values. Panics if a sequence is
/// exhausted, so a test that draws more than it scripted fails loudly.
#[derive(Debug, Default)]
pub struct SequenceRng {
    integers: Vec<u32>,
    floats: Vec<f64>,
    next_integer: usize,
    next_float: usize,
}

impl SequenceRng {
    /// Create a `SequenceRng` replaying `values` from `next_u32_range`.
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        Self {
            integers: values,
            ..Self::default()
        }
    }

    /// Create a `SequenceRng` replaying `values` from `next_f64`.
    #[must_use]
    pub fn floats(values: Vec<f64>) -> Self {
        Self {
            floats: values,
            ..Self::default()
        }
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u32_range(&mut self, _min: u32, _max: u32) -> u32 {
        let val = self.integers[self.next_integer];
        self.next_integer += 1;
        val
    }

    fn next_f64(&mut self) -> f64 {
        let val = self.floats[self.next_float];
        self.next_float += 1;
        val
    }
}
