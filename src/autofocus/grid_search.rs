//! Round-based grid search over actuator positions.
//!
//! Round `r` samples `2N` positions `center + step * (i - N)` with
//! `step = initial_step / (r + 1)`, then moves the centre to the position
//! with the best averaged quality. The scan direction alternates between
//! rounds; results are always indexed by grid position, so the choice of the
//! new centre does not depend on the scan direction.

use crate::assert_invariant;
use crate::errors::RigError;

/// Positions of one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundPlan {
    pub round: usize,
    pub step: f64,
    /// Setpoint per grid index, clamped to the actuator range and rounded.
    pub positions: Vec<f64>,
    /// Grid indices in the order they are visited.
    pub order: Vec<usize>,
}

/// Result of finishing a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundOutcome {
    pub round: usize,
    pub best_index: usize,
    pub best_quality: f64,
    pub center: f64,
}

#[derive(Debug, Clone)]
pub struct GridSearch {
    half_width: usize,
    initial_step: f64,
    rounds: usize,
    min: f64,
    max: f64,
    center: f64,
    round: usize,
    ascending: bool,
}

impl GridSearch {
    pub fn new(
        center: f64,
        half_width: usize,
        initial_step: f64,
        rounds: usize,
        range: (f64, f64),
    ) -> Result<Self, RigError> {
        if half_width == 0 || rounds == 0 {
            return Err(RigError::invalid_argument(
                "grid half-width and round count must be positive",
            ));
        }
        if !(initial_step.is_finite() && initial_step > 0.0) {
            return Err(RigError::invalid_argument(format!(
                "initial step {initial_step} must be positive"
            )));
        }
        let (min, max) = range;
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(RigError::invalid_argument(format!(
                "actuator range [{min}, {max}] is empty"
            )));
        }
        if !center.is_finite() {
            return Err(RigError::invalid_argument("start centre is not finite"));
        }
        Ok(Self {
            half_width,
            initial_step,
            rounds,
            min,
            max,
            center: round2(center.clamp(min, max)),
            round: 0,
            ascending: true,
        })
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn is_finished(&self) -> bool {
        self.round >= self.rounds
    }

    /// Positions for the current round, `None` once every round is done.
    pub fn plan(&self) -> Option<RoundPlan> {
        if self.is_finished() {
            return None;
        }
        let step = self.initial_step / (self.round + 1) as f64;
        let n = self.half_width as f64;
        let positions: Vec<f64> = (0..2 * self.half_width)
            .map(|i| round2((self.center + step * (i as f64 - n)).clamp(self.min, self.max)))
            .collect();
        let mut order: Vec<usize> = (0..positions.len()).collect();
        if !self.ascending {
            order.reverse();
        }
        Some(RoundPlan {
            round: self.round,
            step,
            positions,
            order,
        })
    }

    /// Take the averaged quality per grid index and move the centre.
    pub fn complete_round(&mut self, averages: &[f64]) -> Result<RoundOutcome, RigError> {
        let plan = self
            .plan()
            .ok_or_else(|| RigError::invalid_argument("grid search already finished"))?;
        if averages.len() != plan.positions.len() {
            return Err(RigError::invalid_argument(format!(
                "expected {} averages, got {}",
                plan.positions.len(),
                averages.len()
            )));
        }
        if averages.iter().any(|q| !q.is_finite()) {
            return Err(RigError::unreliable_signal("non-finite averaged quality"));
        }
        let best_index = stable_argmax(averages)
            .ok_or_else(|| RigError::unreliable_signal("no comparable quality in round"))?;
        let best_quality = averages[best_index];
        assert_invariant!(
            averages[..best_index].iter().all(|q| *q < best_quality)
                && averages[best_index..].iter().all(|q| *q <= best_quality),
            "new centre is the first maximum of the round",
            "complete_round"
        );

        self.center = plan.positions[best_index];
        self.round += 1;
        self.ascending = !self.ascending;
        Ok(RoundOutcome {
            round: plan.round,
            best_index,
            best_quality,
            center: self.center,
        })
    }
}

/// Index of the largest value, lowest index on ties. NaN never wins.
pub fn stable_argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, value) in values.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        match best {
            Some(b) if values[b] >= *value => {}
            _ => best = Some(index),
        }
    }
    best
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: f64) -> f64 {
        -(x - 10.0).powi(2) + 100.0
    }

    #[test]
    fn test_positions_of_first_round() {
        let search = GridSearch::new(8.0, 2, 1.0, 3, (-100.0, 100.0)).unwrap();
        let plan = search.plan().unwrap();
        assert_eq!(plan.positions, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(plan.order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_step_decays_and_direction_alternates() {
        let mut search = GridSearch::new(0.0, 1, 3.0, 3, (-100.0, 100.0)).unwrap();
        search.complete_round(&[1.0, 2.0]).unwrap();
        let plan = search.plan().unwrap();
        assert_eq!(plan.step, 1.5);
        assert_eq!(plan.order, vec![1, 0]);
        search.complete_round(&[1.0, 2.0]).unwrap();
        let plan = search.plan().unwrap();
        assert_eq!(plan.step, 1.0);
        assert_eq!(plan.order, vec![0, 1]);
    }

    #[test]
    fn test_converges_on_quadratic() {
        let mut search = GridSearch::new(8.0, 5, 0.5, 3, (-100.0, 100.0)).unwrap();
        while let Some(plan) = search.plan() {
            let averages: Vec<f64> = plan.positions.iter().map(|p| quadratic(*p)).collect();
            search.complete_round(&averages).unwrap();
        }
        assert!(search.is_finished());
        assert!((search.center() - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_positions_clamped_to_range() {
        let search = GridSearch::new(99.0, 3, 2.0, 1, (-100.0, 100.0)).unwrap();
        let plan = search.plan().unwrap();
        assert!(plan.positions.iter().all(|p| *p <= 100.0));
        assert_eq!(plan.positions[5], 100.0);
    }

    #[test]
    fn test_stable_argmax_prefers_first() {
        assert_eq!(stable_argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(stable_argmax(&[f64::NAN, 0.5]), Some(1));
        assert_eq!(stable_argmax(&[]), None);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(GridSearch::new(0.0, 0, 1.0, 1, (-1.0, 1.0)).is_err());
        assert!(GridSearch::new(0.0, 1, 0.0, 1, (-1.0, 1.0)).is_err());
        assert!(GridSearch::new(0.0, 1, 1.0, 1, (1.0, 1.0)).is_err());
        assert!(GridSearch::new(f64::NAN, 1, 1.0, 1, (-1.0, 1.0)).is_err());
    }

    #[test]
    fn test_wrong_average_count() {
        let mut search = GridSearch::new(0.0, 2, 1.0, 1, (-10.0, 10.0)).unwrap();
        assert!(search.complete_round(&[1.0]).is_err());
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        /// Averages drawn from a handful of levels so ties are common.
        fn averages(len: usize) -> impl Strategy<Value = Vec<f64>> {
            prop::collection::vec(prop::sample::select(vec![0.5, 1.0, 1.25, 2.0]), len)
        }

        proptest! {
            /// INVARIANT: the new centre is the position of the first maximum,
            /// rounded to 2 decimals and inside the actuator range
            #[test]
            fn prop_centre_moves_to_first_maximum(
                center in -150.0f64..150.0,
                half_width in 1usize..6,
                step in 0.01f64..40.0,
                seed in averages(12),
            ) {
                let mut search = GridSearch::new(center, half_width, step, 2, (-100.0, 100.0)).unwrap();
                let plan = search.plan().unwrap();
                let averages = &seed[..2 * half_width];

                let outcome = search.complete_round(averages).unwrap();

                let best = averages.iter().cloned().fold(f64::MIN, f64::max);
                let first = averages.iter().position(|q| *q == best).unwrap();
                prop_assert_eq!(outcome.best_index, first);
                prop_assert_eq!(outcome.best_quality, best);
                prop_assert_eq!(outcome.center, plan.positions[first]);
                prop_assert_eq!(search.center(), outcome.center);
                prop_assert!((-100.0..=100.0).contains(&outcome.center));
                prop_assert!((outcome.center * 100.0 - (outcome.center * 100.0).round()).abs() < 1e-6);
            }
        }
    }
}
