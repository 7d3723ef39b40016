//! Sweep generation.
//!
//! A [`SweepSpec`] expands into the finite sequence of values one input takes over a
//! run. Quantities sharing a level are zipped into tuples ([`zip_columns`]); levels
//! are combined by an [`Odometer`] whose last digit turns fastest.
//!
//! Generation dispatches on the sweep's data type:
//!
//! - `DOUBLE`: linear interpolation from start to stop, endpoints included.
//! - every other type: discrete. If start and stop are equal the start value is
//!   repeated; otherwise the first `floor(points / 2)` entries are the start value and
//!   the rest the stop value.

use daq_core::limits::MAX_SWEEP_POINTS;
use daq_core::{DaqError, DaqResult, DataType, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// One fixed value.
    Single,
    /// Start to stop.
    Range,
}

/// How the number of points of a range sweep is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepMode {
    /// `points` is given directly.
    FixedCount,
    /// A step size is given; the point count is derived from it and the step is
    /// then adjusted so both endpoints are hit exactly. DOUBLE only.
    FixedStep(f64),
}

/// What one input does over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub kind: SweepKind,
    pub datatype: DataType,
    pub start: Value,
    pub stop: Value,
    /// Requested point count. Ignored under [`StepMode::FixedStep`].
    pub points: usize,
    pub step_mode: StepMode,
}

impl SweepSpec {
    pub fn single(datatype: DataType, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            kind: SweepKind::Single,
            datatype,
            start: value.clone(),
            stop: value,
            points: 1,
            step_mode: StepMode::FixedCount,
        }
    }

    pub fn range(
        datatype: DataType,
        start: impl Into<Value>,
        stop: impl Into<Value>,
        points: usize,
    ) -> Self {
        Self {
            kind: SweepKind::Range,
            datatype,
            start: start.into(),
            stop: stop.into(),
            points,
            step_mode: StepMode::FixedCount,
        }
    }

    /// DOUBLE range given by step size instead of point count.
    pub fn stepped(start: f64, stop: f64, step: f64) -> Self {
        Self {
            kind: SweepKind::Range,
            datatype: DataType::Double,
            start: Value::Double(start),
            stop: Value::Double(stop),
            points: 0,
            step_mode: StepMode::FixedStep(step),
        }
    }

    /// Number of values this sweep produces. `subject` names the swept quantity in
    /// validation errors.
    pub fn effective_points(&self, subject: &str) -> DaqResult<usize> {
        let points = match (self.kind, self.step_mode) {
            (SweepKind::Single, StepMode::FixedStep(_)) => {
                return Err(DaqError::validation(
                    subject,
                    "a single-value sweep cannot use a step size",
                ))
            }
            (SweepKind::Single, StepMode::FixedCount) => {
                if self.points != 1 {
                    return Err(DaqError::validation(
                        subject,
                        format!("a single-value sweep takes exactly 1 point, not {}", self.points),
                    ));
                }
                1
            }
            (SweepKind::Range, StepMode::FixedCount) => {
                if self.points < 1 {
                    return Err(DaqError::validation(
                        subject,
                        "a range sweep needs at least 1 point",
                    ));
                }
                self.points
            }
            (SweepKind::Range, StepMode::FixedStep(step)) => {
                if self.datatype != DataType::Double {
                    return Err(DaqError::validation(
                        subject,
                        format!("step sizes only apply to DOUBLE sweeps, not {}", self.datatype),
                    ));
                }
                if !step.is_finite() || step == 0.0 {
                    return Err(DaqError::validation(
                        subject,
                        format!("step size {} is not usable", step),
                    ));
                }
                let (start, stop) = self.numeric_bounds(subject)?;
                let intervals = ((stop - start) / step).round();
                if !intervals.is_finite() || intervals < 1.0 || intervals >= MAX_SWEEP_POINTS as f64 {
                    return Err(DaqError::validation(
                        subject,
                        format!(
                            "step {} from {} to {} gives {} intervals",
                            step, start, stop, intervals
                        ),
                    ));
                }
                intervals as usize + 1
            }
        };
        if points > MAX_SWEEP_POINTS {
            return Err(DaqError::validation(
                subject,
                format!("{} points exceeds the limit of {}", points, MAX_SWEEP_POINTS),
            ));
        }
        Ok(points)
    }

    /// Expand into the value sequence, validating the spec first.
    pub fn values(&self, subject: &str) -> DaqResult<Vec<Value>> {
        let points = self.effective_points(subject)?;
        if self.kind == SweepKind::Single {
            return Ok(vec![self.start.clone()]);
        }
        match self.datatype {
            DataType::Double => {
                let (start, stop) = self.numeric_bounds(subject)?;
                Ok(linear(start, stop, points)
                    .into_iter()
                    .map(Value::Double)
                    .collect())
            }
            _ => Ok(split(&self.start, &self.stop, points)),
        }
    }

    fn numeric_bounds(&self, subject: &str) -> DaqResult<(f64, f64)> {
        let bound = |v: &Value, which: &str| -> DaqResult<f64> {
            v.as_f64().filter(|x| x.is_finite()).ok_or_else(|| {
                DaqError::validation(subject, format!("{} value '{}' is not a finite number", which, v))
            })
        };
        Ok((bound(&self.start, "start")?, bound(&self.stop, "stop")?))
    }
}

/// `points` values from `start` to `stop` inclusive.
pub fn linear(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let span = stop - start;
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| start + i as f64 * span / last)
                .collect()
        }
    }
}

/// Discrete two-value sweep: first half `start`, second half `stop`.
pub fn split(start: &Value, stop: &Value, points: usize) -> Vec<Value> {
    if start == stop {
        return vec![start.clone(); points];
    }
    let head = points / 2;
    let mut values = Vec::with_capacity(points);
    values.extend(std::iter::repeat(start).take(head).cloned());
    values.extend(std::iter::repeat(stop).take(points - head).cloned());
    values
}

/// Zip per-quantity sequences of one level into per-step tuples, truncating to the
/// shortest sequence.
pub fn zip_columns(columns: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    (0..len)
        .map(|row| columns.iter().map(|c| c[row].clone()).collect())
        .collect()
}

/// Number of steps of a run over levels with the given point counts. An empty
/// level list has no steps. `None` on overflow.
pub fn total_steps(radices: &[usize]) -> Option<usize> {
    if radices.is_empty() {
        return Some(0);
    }
    radices
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

/// Mixed-radix counter over level indices. Level 0 is the slowest digit.
#[derive(Debug, Clone)]
pub struct Odometer {
    radices: Vec<usize>,
    next: Option<Vec<usize>>,
}

impl Odometer {
    pub fn new(radices: Vec<usize>) -> Self {
        let next = if radices.is_empty() || radices.contains(&0) {
            None
        } else {
            Some(vec![0; radices.len()])
        };
        Self { radices, next }
    }
}

impl Iterator for Odometer {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for pos in (0..following.len()).rev() {
            following[pos] += 1;
            if following[pos] < self.radices[pos] {
                self.next = Some(following);
                break;
            }
            following[pos] = 0;
        }
        Some(current)
    }
}
