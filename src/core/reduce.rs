//! Cell value reducers shared by rasterization and polygon aggregation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reduction over a set of cell values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Most frequent value; ties resolve to the smallest value
    Mode,
    Sum,
    Max,
    Min,
    Mean,
    /// First value in visiting order
    First,
}

impl Reducer {
    pub fn accumulator(&self) -> Accumulator {
        match self {
            Reducer::Mode => Accumulator::Mode(BTreeMap::new()),
            Reducer::Sum => Accumulator::Sum { sum: 0.0, seen: false },
            Reducer::Max => Accumulator::Max(None),
            Reducer::Min => Accumulator::Min(None),
            Reducer::Mean => Accumulator::Mean { sum: 0.0, count: 0 },
            Reducer::First => Accumulator::First(None),
        }
    }

    pub fn reduce<I>(&self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut acc = self.accumulator();
        for v in values {
            acc.push(v);
        }
        acc.finish()
    }
}

/// Totally ordered key for exact value counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValueKey(i64);

impl ValueKey {
    fn of(v: f64) -> Self {
        // same bit trick as f64::total_cmp; -0.0 folds into 0.0
        let v = if v == 0.0 { 0.0 } else { v };
        let bits = v.to_bits() as i64;
        ValueKey(bits ^ (((bits >> 63) as u64) >> 1) as i64)
    }

    fn value(self) -> f64 {
        let bits = self.0 ^ ((((self.0 >> 63) as u64) >> 1) as i64);
        f64::from_bits(bits as u64)
    }
}

/// Streaming state of one reducer
#[derive(Debug, Clone)]
pub enum Accumulator {
    Mode(BTreeMap<ValueKey, u64>),
    Sum { sum: f64, seen: bool },
    Max(Option<f64>),
    Min(Option<f64>),
    Mean { sum: f64, count: u64 },
    First(Option<f64>),
}

impl Accumulator {
    pub fn push(&mut self, v: f64) {
        if !v.is_finite() {
            return;
        }
        match self {
            Accumulator::Mode(counts) => {
                *counts.entry(ValueKey::of(v)).or_insert(0) += 1;
            }
            Accumulator::Sum { sum, seen } => {
                *sum += v;
                *seen = true;
            }
            Accumulator::Max(m) => *m = Some(m.map_or(v, |x| x.max(v))),
            Accumulator::Min(m) => *m = Some(m.map_or(v, |x| x.min(v))),
            Accumulator::Mean { sum, count } => {
                *sum += v;
                *count += 1;
            }
            Accumulator::First(f) => {
                if f.is_none() {
                    *f = Some(v);
                }
            }
        }
    }

    /// `None` when no value was pushed
    pub fn finish(&self) -> Option<f64> {
        match self {
            Accumulator::Mode(counts) => {
                // ascending key order + strict '>' keeps the smallest value on ties
                let mut best: Option<(ValueKey, u64)> = None;
                for (&key, &count) in counts {
                    if best.map_or(true, |(_, c)| count > c) {
                        best = Some((key, count));
                    }
                }
                best.map(|(key, _)| key.value())
            }
            Accumulator::Sum { sum, seen } => seen.then_some(*sum),
            Accumulator::Max(m) | Accumulator::Min(m) | Accumulator::First(m) => *m,
            Accumulator::Mean { sum, count } => (*count > 0).then(|| sum / *count as f64),
        }
    }
}
