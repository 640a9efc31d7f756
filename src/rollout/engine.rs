//! Rollout Engine: one episode of one genotype against one environment.
//!
//! `Reset → Running → {Terminated | Truncated}`, plus `Diverged` when
//! the controller output goes non-finite and divergence is tolerated.
//! The engine only reads the compressor; the episode's most novel
//! observation is returned, not enqueued.

use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::{Result, UlerlError};
use crate::kernel::Controller;
use crate::memory::Compressor;

use super::aggregation::{Aggregation, SkipPolicy};
use super::environment::EnvBinding;
use super::evaluator::DivergencePolicy;

/// Per-episode settings, copied out of [`RunConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RolloutSettings {
    pub max_steps: usize,
    pub skip_frames: usize,
    pub skip_policy: SkipPolicy,
    pub aggregation: Aggregation,
    pub divergence: DivergencePolicy,
}

impl From<&RunConfig> for RolloutSettings {
    fn from(run: &RunConfig) -> Self {
        Self {
            max_steps: run.max_steps,
            skip_frames: run.skip_frames,
            skip_policy: run.skip_policy,
            aggregation: run.aggregation,
            divergence: run.divergence,
        }
    }
}

/// Most novel observation of an episode.
#[derive(Clone, Debug, PartialEq)]
pub struct Representative {
    pub observation: Vec<f64>,
    pub novelty: f64,
}

/// Running arg-max of novelty over an episode.
#[derive(Clone, Debug)]
pub struct NoveltyTracker {
    best: Option<Vec<f64>>,
    max: f64,
}

impl Default for NoveltyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NoveltyTracker {
    /// The maximum starts at negative infinity, so the first observation
    /// always seeds the tracker.
    pub fn new() -> Self {
        Self {
            best: None,
            max: f64::NEG_INFINITY,
        }
    }

    /// Keep `observation` if it beats the stored maximum. Returns whether it did.
    pub fn observe(&mut self, observation: &[f64], novelty: f64) -> bool {
        if novelty > self.max || self.best.is_none() {
            self.max = novelty;
            self.best = Some(observation.to_vec());
            true
        } else {
            false
        }
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn into_representative(self) -> Option<Representative> {
        let novelty = self.max;
        self.best.map(|observation| Representative {
            observation,
            novelty,
        })
    }
}

/// How an episode ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The environment reported completion
    Terminated,
    /// `max_steps` ran out
    Truncated,
    /// Non-finite controller output; fitness is the sentinel
    Diverged,
}

#[derive(Clone, Debug)]
pub struct RolloutOutcome {
    pub fitness: f64,
    pub steps: usize,
    pub termination: Termination,
    pub representative: Option<Representative>,
}

/// Arg-max over the controller output. Any non-finite entry is a divergence.
pub fn select_action(output: &[f64], step: usize) -> Result<usize> {
    if output.iter().any(|v| !v.is_finite()) {
        return Err(UlerlError::Divergence {
            step,
            output: output.to_vec(),
        });
    }
    let (action, _) = output
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    Ok(action)
}

/// Runs episodes against a shared, read-only compressor.
#[derive(Clone, Copy, Debug)]
pub struct RolloutEngine<'a> {
    compressor: &'a Compressor,
    settings: RolloutSettings,
    render: bool,
}

impl<'a> RolloutEngine<'a> {
    pub fn new(compressor: &'a Compressor, settings: RolloutSettings) -> Self {
        Self {
            compressor,
            settings,
            render: false,
        }
    }

    /// Render every step (best effort).
    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    /// Override the step limit.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.settings.max_steps = max_steps;
        self
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    /// Play one episode with `genotype` loaded into `controller`.
    pub fn run(
        &self,
        controller: &mut Controller,
        genotype: &[f64],
        binding: &mut EnvBinding,
    ) -> Result<RolloutOutcome> {
        let settings = &self.settings;

        // Reset
        controller.load_weights(genotype)?;
        let mut observation = binding.reset()?;
        if self.render {
            binding.render();
        }

        let mut tracker = NoveltyTracker::new();
        let mut fitness = 0.0;
        let mut steps = 0;
        let mut termination = Termination::Truncated;

        // Running
        for step in 0..settings.max_steps {
            let code = self.compressor.encode(&observation)?;
            let novelty = self.compressor.novelty(&observation, &code)?;
            tracker.observe(&observation, novelty);

            let output = controller.activate(&code.to_dense())?;
            let action = match select_action(&output, step) {
                Ok(action) => action,
                Err(err) if settings.divergence == DivergencePolicy::Sentinel => {
                    warn!(step, error = %err, "rollout diverged");
                    return Ok(RolloutOutcome {
                        fitness: settings.divergence.sentinel(),
                        steps,
                        termination: Termination::Diverged,
                        representative: tracker.into_representative(),
                    });
                }
                Err(err) => return Err(err),
            };

            let transition = binding.execute(action, settings.skip_frames, settings.skip_policy)?;
            observation = settings
                .aggregation
                .aggregate(&transition.observations, binding.reset_observation())?;
            fitness += transition.reward;
            steps = step + 1;
            if self.render {
                binding.render();
            }
            if transition.done {
                termination = Termination::Terminated;
                break;
            }
        }

        debug!(fitness, steps, ?termination, "rollout finished");
        Ok(RolloutOutcome {
            fitness,
            steps,
            termination,
            representative: tracker.into_representative(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressorConfig, CompressorKind, LearningRate};
    use crate::kernel::{Activation, NetworkKind, NetworkLayout};
    use crate::memory::Encoding;
    use crate::rollout::testing::{FrameScript, ScriptedEnv};

    fn compressor(frame: (usize, usize), ncentrs: usize) -> Compressor {
        let config = CompressorConfig {
            kind: CompressorKind::Fixed {
                ncentrs,
                lrate: LearningRate::default(),
            },
            encoding: Encoding::EnsembleNorm,
            ..Default::default()
        };
        Compressor::new(&config, frame, 1).unwrap()
    }

    fn settings(max_steps: usize) -> RolloutSettings {
        RolloutSettings {
            max_steps,
            skip_frames: 0,
            skip_policy: SkipPolicy::Noop,
            aggregation: Aggregation::Last,
            divergence: DivergencePolicy::Sentinel,
        }
    }

    fn controller(ninputs: usize, noutputs: usize) -> Controller {
        let layout = NetworkLayout::from_parts(NetworkKind::FeedForward, ninputs, &[], noutputs).unwrap();
        Controller::new(layout, Activation::Identity)
    }

    #[test]
    fn test_novelty_tracker_keeps_argmax() {
        let mut tracker = NoveltyTracker::new();
        for (i, novelty) in [0.2, 0.9, 0.4].into_iter().enumerate() {
            tracker.observe(&[i as f64], novelty);
        }
        let rep = tracker.into_representative().unwrap();
        assert_eq!(rep.observation, vec![1.0]);
        assert_eq!(rep.novelty, 0.9);
    }

    #[test]
    fn test_first_observation_always_seeds() {
        let mut tracker = NoveltyTracker::new();
        assert!(tracker.observe(&[1.0], f64::NEG_INFINITY));
        assert!(tracker.into_representative().is_some());
    }

    #[test]
    fn test_select_action() {
        assert_eq!(select_action(&[0.1, 0.7, 0.3], 0).unwrap(), 1);
        assert_eq!(select_action(&[0.5, 0.5], 0).unwrap(), 0);
        assert!(matches!(
            select_action(&[0.1, f64::NAN], 4),
            Err(UlerlError::Divergence { step: 4, .. })
        ));
        assert!(select_action(&[f64::INFINITY, 0.0], 0).is_err());
    }

    #[test]
    fn test_truncated_after_max_steps() {
        let compr = compressor((2, 2), 3);
        let mut binding = EnvBinding::new(
            Box::new(ScriptedEnv::new([2, 2, 1], 2, 100)),
            compr.config(),
        )
        .unwrap();
        let mut ctrl = controller(3, 2);
        // Bias favours action 1
        let mut genotype = vec![0.0; ctrl.nweights()];
        genotype[1] = 1.0;

        let outcome = RolloutEngine::new(&compr, settings(5))
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap();
        assert_eq!(outcome.termination, Termination::Truncated);
        assert_eq!(outcome.steps, 5);
        assert_eq!(outcome.fitness, 5.0 * ScriptedEnv::reward_for(1));
        assert!(outcome.representative.is_some());
    }

    #[test]
    fn test_terminated_with_skip_rewards() {
        let compr = compressor((2, 2), 3);
        let mut binding = EnvBinding::new(
            Box::new(ScriptedEnv::new([2, 2, 1], 2, 7)),
            compr.config(),
        )
        .unwrap();
        let mut ctrl = controller(3, 2);
        let genotype = vec![0.0; ctrl.nweights()];
        let mut s = settings(100);
        s.skip_frames = 2;
        s.skip_policy = SkipPolicy::Repeat;

        let outcome = RolloutEngine::new(&compr, s)
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap();
        // Micro-steps 1..=7 all take action 0; step 3 stops after one micro-step.
        assert_eq!(outcome.termination, Termination::Terminated);
        assert_eq!(outcome.steps, 3);
        assert_eq!(outcome.fitness, 7.0 * ScriptedEnv::reward_for(0));
    }

    #[test]
    fn test_representative_is_most_novel_observation() {
        // Frames in [0, 255]; the compressor has one prototype, so the
        // most novel frame is the one farthest from it.
        let frames = vec![
            vec![10.0, 10.0],
            vec![255.0, 255.0],
            vec![20.0, 20.0],
            vec![0.0, 0.0],
        ];
        let mut compr = compressor((1, 2), 1);
        compr.seed_prototypes(&[0.0, 0.0], 1.0).unwrap();
        let mut binding = EnvBinding::new(
            Box::new(FrameScript::new(1, 2, frames.clone(), 2)),
            compr.config(),
        )
        .unwrap();
        let mut ctrl = controller(1, 2);
        let genotype = vec![0.0; ctrl.nweights()];

        let outcome = RolloutEngine::new(&compr, settings(10))
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap();
        let rep = outcome.representative.unwrap();
        assert_eq!(rep.observation, frames[1]);
        assert!((rep.novelty - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_divergence_sentinel_and_strict() {
        let compr = compressor((2, 2), 2);
        let mut binding = EnvBinding::new(
            Box::new(ScriptedEnv::new([2, 2, 1], 2, 100)),
            compr.config(),
        )
        .unwrap();
        let mut ctrl = controller(2, 2);
        let mut genotype = vec![0.0; ctrl.nweights()];
        genotype[0] = f64::NAN;

        let outcome = RolloutEngine::new(&compr, settings(10))
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap();
        assert_eq!(outcome.termination, Termination::Diverged);
        assert_eq!(outcome.fitness, f64::NEG_INFINITY);
        assert_eq!(outcome.steps, 0);

        let mut strict = settings(10);
        strict.divergence = DivergencePolicy::Strict;
        let err = RolloutEngine::new(&compr, strict)
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap_err();
        assert!(err.is_rollout_local());
    }

    #[test]
    fn test_compressor_untouched_by_rollout() {
        let compr = compressor((2, 2), 3);
        let before = compr.snapshot();
        let mut binding = EnvBinding::new(
            Box::new(ScriptedEnv::new([2, 2, 1], 2, 100)),
            compr.config(),
        )
        .unwrap();
        let mut ctrl = controller(3, 2);
        let genotype = vec![0.1; ctrl.nweights()];
        RolloutEngine::new(&compr, settings(8))
            .run(&mut ctrl, &genotype, &mut binding)
            .unwrap();
        assert_eq!(compr.snapshot(), before);
        assert!(compr.train_set().is_empty());
    }
}
