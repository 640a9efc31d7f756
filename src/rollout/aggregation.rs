//! Frame-skip policies and how skipped observations collapse into one.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UlerlError};

/// Action sent during skipped micro-steps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Action 0
    #[default]
    Noop,
    /// The selected action again
    Repeat,
}

impl SkipPolicy {
    pub fn action(self, selected: usize) -> usize {
        match self {
            SkipPolicy::Noop => 0,
            SkipPolicy::Repeat => selected,
        }
    }
}

/// How the observations of one action and its skipped micro-steps
/// become the next observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Element-wise mean
    Average,
    First,
    #[default]
    Last,
    /// First observation minus the reset observation
    New,
}

impl Aggregation {
    pub fn aggregate(self, observations: &[Vec<f64>], reset_obs: &[f64]) -> Result<Vec<f64>> {
        let (first, last) = match (observations.first(), observations.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(UlerlError::Environment(
                    "no observations to aggregate".into(),
                ))
            }
        };
        let obs = match self {
            Aggregation::Average => {
                let n = observations.len() as f64;
                let mut sum = vec![0.0; first.len()];
                for obs in observations {
                    for (s, v) in sum.iter_mut().zip(obs) {
                        *s += v;
                    }
                }
                sum.iter().map(|s| s / n).collect()
            }
            Aggregation::First => first.clone(),
            Aggregation::Last => last.clone(),
            Aggregation::New => {
                if reset_obs.len() != first.len() {
                    return Err(UlerlError::ShapeMismatch {
                        expected: first.len(),
                        got: reset_obs.len(),
                    });
                }
                first.iter().zip(reset_obs).map(|(o, r)| o - r).collect()
            }
        };
        Ok(obs)
    }
}

/// Frame preprocessing before downsampling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preprocessing {
    #[default]
    None,
    /// Subtract the last reset frame
    SubtractBackground,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_policies() {
        let obs = vec![vec![2.0], vec![4.0], vec![6.0]];
        assert_eq!(Aggregation::Average.aggregate(&obs, &[0.0]).unwrap(), vec![4.0]);
        assert_eq!(Aggregation::First.aggregate(&obs, &[0.0]).unwrap(), vec![2.0]);
        assert_eq!(Aggregation::Last.aggregate(&obs, &[0.0]).unwrap(), vec![6.0]);
        assert_eq!(Aggregation::New.aggregate(&obs, &[0.5]).unwrap(), vec![1.5]);
    }

    #[test]
    fn test_empty_observations_rejected() {
        assert!(Aggregation::Last.aggregate(&[], &[]).is_err());
    }

    #[test]
    fn test_skip_policy_actions() {
        assert_eq!(SkipPolicy::Noop.action(4), 0);
        assert_eq!(SkipPolicy::Repeat.action(4), 4);
    }
}
