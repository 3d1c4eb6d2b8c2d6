//! Per-tuple operators applied by the derived-channel engine.
//!
//! An operator sees one index-aligned tuple at a time (one sample per input,
//! in input order) and returns the output value. Domain failures are
//! reported as [`ChannelError::Domain`] and handled by the engine's policy.

use std::collections::VecDeque;

use crate::data::Sample;
use crate::error::{ChannelError, ChannelResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match *self {
            Arity::Exactly(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }

    fn expected(&self) -> usize {
        match *self {
            Arity::Exactly(k) | Arity::AtLeast(k) => k,
        }
    }
}

pub trait Operator: Send + 'static {
    fn name(&self) -> &'static str;

    fn arity(&self) -> Arity;

    /// Computes the output value for the tuple at `index`.
    fn apply(&mut self, index: u64, tuple: &[Sample]) -> ChannelResult<f64>;

    /// Drops any state carried between tuples. Called when inputs are cleared.
    fn reset(&mut self) {}

    fn check_arity(&self, inputs: usize) -> ChannelResult<()> {
        let arity = self.arity();
        if arity.accepts(inputs) {
            Ok(())
        } else {
            Err(ChannelError::Arity {
                operator: self.name(),
                expected: arity.expected(),
                actual: inputs,
            })
        }
    }
}

pub struct Divide;

impl Operator for Divide {
    fn name(&self) -> &'static str {
        "divide"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(2)
    }

    fn apply(&mut self, index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        let (dividend, divisor) = (tuple[0].value, tuple[1].value);
        if divisor == 0.0 {
            return Err(ChannelError::Domain {
                index,
                reason: "division by zero",
            });
        }
        Ok(dividend / divisor)
    }
}

pub struct Multiply;

impl Operator for Multiply {
    fn name(&self) -> &'static str {
        "multiply"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(2)
    }

    fn apply(&mut self, _index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        Ok(tuple[0].value * tuple[1].value)
    }
}

pub struct Subtract;

impl Operator for Subtract {
    fn name(&self) -> &'static str {
        "subtract"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(2)
    }

    fn apply(&mut self, _index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        Ok(tuple[0].value - tuple[1].value)
    }
}

/// Weighted sum `Σ kᵢ·xᵢ`.
pub struct Sum {
    weights: Vec<f64>,
}

impl Sum {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }
}

impl Operator for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(self.weights.len().max(1))
    }

    fn apply(&mut self, _index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        Ok(tuple
            .iter()
            .zip(&self.weights)
            .map(|(s, k)| s.value * k)
            .sum())
    }
}

/// `scale * x + offset`.
pub struct ScaleOffset {
    pub scale: f64,
    pub offset: f64,
}

impl Operator for ScaleOffset {
    fn name(&self) -> &'static str {
        "scale_offset"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn apply(&mut self, _index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        Ok(tuple[0].value * self.scale + self.offset)
    }
}

/// Trapezoidal running integral over the input's timestamps.
pub struct Integrate {
    y0: f64,
    accum: f64,
    prev: Option<Sample>,
}

impl Integrate {
    pub fn new(y0: f64) -> Self {
        Self {
            y0,
            accum: y0,
            prev: None,
        }
    }
}

impl Operator for Integrate {
    fn name(&self) -> &'static str {
        "integrate"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn apply(&mut self, index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        let s = finite_input(index, tuple[0])?;
        let mut accum = self.accum;
        if let Some(prev) = self.prev {
            let dt = s.timestamp - prev.timestamp;
            if dt > 0.0 {
                accum += 0.5 * (s.value + prev.value) * dt;
            }
        }
        if !accum.is_finite() {
            return Err(ChannelError::Domain {
                index,
                reason: "integral overflow",
            });
        }
        self.accum = accum;
        self.prev = Some(s);
        Ok(accum)
    }

    fn reset(&mut self) {
        self.accum = self.y0;
        self.prev = None;
    }
}

/// Mean of the last `window` input samples (fewer while the window fills).
pub struct MovingAverage {
    window: usize,
    buffer: VecDeque<f64>,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            buffer: VecDeque::with_capacity(window),
        }
    }
}

impl Operator for MovingAverage {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn arity(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn apply(&mut self, index: u64, tuple: &[Sample]) -> ChannelResult<f64> {
        let v = finite_input(index, tuple[0])?.value;
        if self.buffer.len() == self.window {
            self.buffer.pop_front();
        }
        self.buffer.push_back(v);
        // Summed from the window each time so one overflow cannot stick.
        let sum: f64 = self.buffer.iter().sum();
        Ok(sum / self.buffer.len() as f64)
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Stateful operators refuse non-finite inputs before touching their state.
fn finite_input(index: u64, s: Sample) -> ChannelResult<Sample> {
    if s.value.is_finite() {
        Ok(s)
    } else {
        Err(ChannelError::Domain {
            index,
            reason: "non-finite input",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: f64, v: f64) -> Sample {
        Sample::new(t, v)
    }

    #[test]
    fn divide_reports_zero_divisor() {
        let mut op = Divide;
        assert_eq!(op.apply(0, &[s(0.0, 10.0), s(0.0, 4.0)]).unwrap(), 2.5);
        assert!(matches!(
            op.apply(7, &[s(0.0, 1.0), s(0.0, 0.0)]),
            Err(ChannelError::Domain { index: 7, .. })
        ));
    }

    #[test]
    fn arity_is_checked() {
        assert!(Divide.check_arity(2).is_ok());
        assert_eq!(
            Divide.check_arity(3).unwrap_err(),
            ChannelError::Arity {
                operator: "divide",
                expected: 2,
                actual: 3
            }
        );
        assert!(Sum::new(vec![1.0, 1.0, 1.0]).check_arity(3).is_ok());
    }

    #[test]
    fn weighted_sum() {
        let mut op = Sum::new(vec![1.0, -2.0, 0.5]);
        let v = op.apply(0, &[s(0.0, 1.0), s(0.0, 2.0), s(0.0, 4.0)]).unwrap();
        assert_eq!(v, 1.0 - 4.0 + 2.0);
    }

    #[test]
    fn integrate_uses_trapezoids_and_resets() {
        let mut op = Integrate::new(1.0);
        assert_eq!(op.apply(0, &[s(0.0, 2.0)]).unwrap(), 1.0);
        assert_eq!(op.apply(1, &[s(1.0, 4.0)]).unwrap(), 4.0);
        assert_eq!(op.apply(2, &[s(3.0, 0.0)]).unwrap(), 8.0);
        op.reset();
        assert_eq!(op.apply(0, &[s(10.0, 5.0)]).unwrap(), 1.0);
    }

    #[test]
    fn non_finite_input_leaves_state_untouched() {
        let mut integral = Integrate::new(0.0);
        integral.apply(0, &[s(0.0, 1.0)]).unwrap();
        assert!(matches!(
            integral.apply(1, &[s(1.0, f64::INFINITY)]),
            Err(ChannelError::Domain { index: 1, .. })
        ));
        assert_eq!(integral.apply(2, &[s(2.0, 1.0)]).unwrap(), 2.0);

        let mut avg = MovingAverage::new(2);
        avg.apply(0, &[s(0.0, 1.0)]).unwrap();
        assert!(avg.apply(1, &[s(1.0, f64::NAN)]).is_err());
        assert_eq!(avg.apply(2, &[s(2.0, 3.0)]).unwrap(), 2.0);
    }

    #[test]
    fn moving_average_recovers_after_overflow() {
        let mut avg = MovingAverage::new(2);
        avg.apply(0, &[s(0.0, f64::MAX)]).unwrap();
        assert_eq!(avg.apply(1, &[s(1.0, f64::MAX)]).unwrap(), f64::INFINITY);
        avg.apply(2, &[s(2.0, 1.0)]).unwrap();
        assert_eq!(avg.apply(3, &[s(3.0, 1.0)]).unwrap(), 1.0);
    }

    #[test]
    fn moving_average_window() {
        let mut op = MovingAverage::new(2);
        let out: Vec<f64> = [2.0, 4.0, 8.0]
            .iter()
            .enumerate()
            .map(|(i, v)| op.apply(i as u64, &[s(i as f64, *v)]).unwrap())
            .collect();
        assert_eq!(out, vec![2.0, 3.0, 6.0]);
    }
}
