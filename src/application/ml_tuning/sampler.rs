//! Latin-hypercube sampling over parameter ranges.
//!
//! Each parameter's range is cut into `n` equal strata and every sample
//! takes exactly one stratum per parameter, with stratum order permuted
//! independently per parameter. Coverage beats plain uniform sampling for
//! the same sample count, and the whole plan is a pure function of the
//! seed.

use crate::domain::evaluation::ParamRange;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// `n` parameter vectors covering the ranges, keyed like the input map.
pub fn latin_hypercube(
    ranges: &BTreeMap<String, ParamRange>,
    n: usize,
    seed: u64,
) -> Vec<BTreeMap<String, f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); n];

    for (name, range) in ranges {
        let mut strata: Vec<usize> = (0..n).collect();
        strata.shuffle(&mut rng);

        for (sample, &stratum) in samples.iter_mut().zip(&strata) {
            let offset: f64 = rng.random();
            let position = (stratum as f64 + offset) / n as f64;
            sample.insert(name.clone(), value_at(range, position));
        }
    }

    samples
}

/// Map a position in [0, 1) onto the range.
fn value_at(range: &ParamRange, position: f64) -> f64 {
    match range {
        ParamRange::Continuous { min, max } => min + position * (max - min),
        ParamRange::Integer { min, max } => {
            let span = (max - min + 1) as f64;
            let value = *min + (position * span).floor() as i64;
            value.min(*max) as f64
        }
        ParamRange::Discrete { values } => {
            if values.is_empty() {
                return 0.0;
            }
            let idx = ((position * values.len() as f64).floor() as usize).min(values.len() - 1);
            values[idx]
        }
    }
}
