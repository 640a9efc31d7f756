//! The UL-ERL generation loop.
//!
//! One generation:
//!
//! 1. sample a population from the search distribution,
//! 2. evaluate it (the evaluator enqueues one representative observation
//!    per rollout into the compressor),
//! 3. tell the fitnesses to the optimizer,
//! 4. train the compressor on the buffered observations,
//! 5. resize controller and optimizer if the codebook grew.
//!
//! Steps 4 and 5 only run once every rollout of step 2 has returned.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ExperimentConfig;
use crate::error::{Result, UlerlError};
use crate::evolution::{
    build_strategy, check_consistency, restore_strategy, DimensionalityAdapter, ResizeReport,
    SearchStrategy, StrategySnapshot,
};
use crate::kernel::{Controller, NetworkLayout};
use crate::memory::{CodebookSnapshot, Compressor, TrainReport};
use crate::rollout::{
    EnvBinding, EnvFactory, ParallelEvaluator, RolloutEngine, RolloutOutcome, RolloutSettings,
};

/// Multiplier on `max_steps` for [`UlerlExperiment::evaluate_best`] with an extended horizon.
pub const EXTENDED_HORIZON: usize = 1000;

/// Summary of one generation.
#[derive(Clone, Debug)]
pub struct GenerationStats {
    /// 1-based generation number
    pub generation: u64,
    /// Best finite fitness so far
    pub best_fitness: Option<f64>,
    /// Mean over this generation's finite fitnesses
    pub mean_fitness: f64,
    pub convergence: f64,
    pub diverged: usize,
    pub ncentrs: usize,
    pub ndims: usize,
    pub train: TrainReport,
    pub resize: Option<ResizeReport>,
}

/// Everything needed to resume a run. Codebook, controller and optimizer
/// are saved and restored together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub layout: NetworkLayout,
    pub controller_weights: Vec<f64>,
    pub codebook: CodebookSnapshot,
    pub strategy: StrategySnapshot,
}

impl ExperimentSnapshot {
    /// Check that codebook, controller and optimizer describe the same network.
    pub fn validate(&self) -> Result<()> {
        let nweights = self.layout.nweights();
        let mean = self.strategy.mean.len();
        let covariance = self.strategy.factor.ndims();
        if self.controller_weights.len() != nweights || mean != nweights || covariance != nweights {
            return Err(UlerlError::ResizeInconsistency {
                mean,
                covariance,
                controller: self.controller_weights.len(),
            });
        }
        let ncentrs = self.codebook.usage.len();
        if ncentrs != self.layout.ninputs() {
            return Err(UlerlError::ShapeMismatch {
                expected: self.layout.ninputs(),
                got: ncentrs,
            });
        }
        Ok(())
    }
}

/// A complete UL-ERL experiment.
///
/// # Example
///
/// ```rust
/// use ulerl::config::{CompressorConfig, ExperimentConfig, RunConfig};
/// use ulerl::highlevel::UlerlExperiment;
/// use ulerl::rollout::testing::ScriptedEnv;
///
/// let config = ExperimentConfig {
///     run: RunConfig { max_steps: 10, workers: Some(2), ..Default::default() },
///     compr: CompressorConfig { downsample: [2, 2], ..Default::default() },
///     ..Default::default()
/// };
/// let factory = ScriptedEnv::new([8, 8, 3], 4, 50).factory();
///
/// let mut exp = UlerlExperiment::new(config, factory).unwrap();
/// let stats = exp.run(2).unwrap();
/// assert_eq!(stats.len(), 2);
/// ```
pub struct UlerlExperiment {
    config: ExperimentConfig,
    settings: RolloutSettings,
    compressor: Compressor,
    controller: Controller,
    strategy: Box<dyn SearchStrategy>,
    adapter: DimensionalityAdapter,
    evaluator: ParallelEvaluator,
    history: Vec<GenerationStats>,
}

impl UlerlExperiment {
    /// Build every component from `config`.
    ///
    /// The shared environment is bound first: its frame shape sizes the
    /// compressor and its action count the controller output.
    pub fn new(config: ExperimentConfig, factory: EnvFactory) -> Result<Self> {
        config.validate()?;
        let seed = config.run.random_seed;

        info!(env = %config.env.name, "binding environment");
        let single = EnvBinding::from_factory(&factory, &config.env, &config.compr)?;

        let mut compressor = Compressor::new(&config.compr, single.frame_size(), seed)?;
        if let Some(proportion) = config.compr.seed_proportion {
            compressor.seed_prototypes(single.reset_observation(), proportion)?;
        }
        info!(
            ncentrs = compressor.ncentrs(),
            dims = compressor.dims(),
            "compressor ready"
        );

        let layout = NetworkLayout::from_parts(
            config.net.kind,
            compressor.ncentrs(),
            &config.net.hidden_layers,
            single.action_count(),
        )?;
        let controller = Controller::new(layout, config.net.activation);
        let strategy = build_strategy(&config.opt, controller.layout(), seed)?;
        info!(
            optimizer = %config.opt.kind,
            ndims = strategy.ndims(),
            popsize = strategy.population_size(),
            "optimizer ready"
        );

        let adapter = DimensionalityAdapter::new(compressor.ncentrs());
        let evaluator = ParallelEvaluator::new(
            config.run.evaluation,
            config.run.worker_count(),
            factory,
            config.env.clone(),
            config.compr.clone(),
            single,
        )?;

        Ok(Self {
            settings: RolloutSettings::from(&config.run),
            config,
            compressor,
            controller,
            strategy,
            adapter,
            evaluator,
            history: Vec::new(),
        })
    }

    /// Build from `config` and resume from a snapshot file.
    pub fn resume(config: ExperimentConfig, factory: EnvFactory, path: impl AsRef<Path>) -> Result<Self> {
        let mut exp = Self::new(config, factory)?;
        exp.restore(Self::load_snapshot(path)?)?;
        Ok(exp)
    }

    // --- Accessors ---

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Controller carrying the best genotype found so far.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn strategy(&self) -> &dyn SearchStrategy {
        self.strategy.as_ref()
    }

    pub fn evaluator(&self) -> &ParallelEvaluator {
        &self.evaluator
    }

    pub fn history(&self) -> &[GenerationStats] {
        &self.history
    }

    pub fn generation(&self) -> u64 {
        self.strategy.generation()
    }

    // --- Run loop ---

    /// Run up to `ngens` generations, stopping early once the best fitness
    /// reaches `target_fitness`.
    pub fn run(&mut self, ngens: usize) -> Result<Vec<GenerationStats>> {
        let mut stats = Vec::with_capacity(ngens);
        for _ in 0..ngens {
            let gen = self.run_generation()?;
            let reached = match (self.config.run.target_fitness, gen.best_fitness) {
                (Some(target), Some(best)) => best >= target,
                _ => false,
            };
            stats.push(gen);
            if reached {
                info!(generation = self.generation(), "target fitness reached");
                break;
            }
        }
        Ok(stats)
    }

    /// Run for the configured `max_generations`.
    pub fn run_configured(&mut self) -> Result<Vec<GenerationStats>> {
        self.run(self.config.run.max_generations)
    }

    pub fn run_generation(&mut self) -> Result<GenerationStats> {
        info!(
            generation = self.generation() + 1,
            ncentrs = self.compressor.ncentrs(),
            "generation start"
        );
        let population = self.strategy.sample_population();
        let evaluation = self.evaluator.evaluate(
            &population,
            &self.controller,
            &mut self.compressor,
            &self.settings,
        )?;
        let fitnesses = evaluation.fitnesses();
        self.strategy.tell(&fitnesses)?;
        if let Some((_, best)) = self.strategy.best() {
            self.controller.load_weights(best)?;
        }

        let (train, resize) = self.train_and_adapt()?;

        let finite: Vec<f64> = fitnesses.iter().copied().filter(|f| f.is_finite()).collect();
        let mean_fitness = if finite.is_empty() {
            f64::NEG_INFINITY
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        let stats = GenerationStats {
            generation: self.generation(),
            best_fitness: self.strategy.best().map(|(f, _)| f),
            mean_fitness,
            convergence: self.strategy.convergence(),
            diverged: evaluation.diverged(),
            ncentrs: self.compressor.ncentrs(),
            ndims: self.strategy.ndims(),
            train,
            resize,
        };
        info!(
            generation = stats.generation,
            best = ?stats.best_fitness,
            mean = stats.mean_fitness,
            conv = stats.convergence,
            diverged = stats.diverged,
            "generation done"
        );
        self.history.push(stats.clone());
        Ok(stats)
    }

    /// Train the compressor, then bring controller and optimizer up to
    /// the new codebook size.
    fn train_and_adapt(&mut self) -> Result<(TrainReport, Option<ResizeReport>)> {
        let train = self.compressor.train()?;
        let resize = self.adapter.sync(
            self.compressor.ncentrs(),
            &mut self.controller,
            self.strategy.as_mut(),
        )?;
        Ok((train, resize))
    }

    /// Replay the best individual on the shared environment.
    ///
    /// With `extended_horizon` the step limit is multiplied by
    /// [`EXTENDED_HORIZON`], so the episode normally runs until the
    /// environment ends it. The compressor is not fed.
    pub fn evaluate_best(&mut self, render: bool, extended_horizon: bool) -> Result<Option<RolloutOutcome>> {
        let genotype = match self.strategy.best() {
            Some((_, best)) => best.to_vec(),
            None => return Ok(None),
        };
        let max_steps = if extended_horizon {
            self.settings.max_steps.saturating_mul(EXTENDED_HORIZON)
        } else {
            self.settings.max_steps
        };
        let engine = RolloutEngine::new(&self.compressor, self.settings)
            .with_render(render)
            .with_max_steps(max_steps);
        let outcome = self
            .evaluator
            .evaluate_single(&genotype, &self.controller, &engine)?;
        info!(fitness = outcome.fitness, steps = outcome.steps, "best individual replayed");
        Ok(Some(outcome))
    }

    // --- Persistence ---

    pub fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot {
            layout: self.controller.layout().clone(),
            controller_weights: self.controller.weights().to_vec(),
            codebook: self.compressor.snapshot(),
            strategy: self.strategy.snapshot(),
        }
    }

    /// Replace codebook, controller and optimizer with a consistent snapshot.
    pub fn restore(&mut self, snap: ExperimentSnapshot) -> Result<()> {
        snap.validate()?;
        let actions = self.evaluator.single().action_count();
        if snap.layout.noutputs() != actions {
            return Err(UlerlError::ShapeMismatch {
                expected: actions,
                got: snap.layout.noutputs(),
            });
        }

        let controller = Controller::with_weights(
            snap.layout,
            self.config.net.activation,
            &snap.controller_weights,
        )?;
        let strategy = restore_strategy(&self.config.opt, snap.strategy)?;
        check_consistency(&controller, strategy.as_ref())?;
        self.compressor.restore(snap.codebook)?;

        self.adapter = DimensionalityAdapter::new(self.compressor.ncentrs());
        self.controller = controller;
        self.strategy = strategy;
        info!(
            generation = self.generation(),
            ncentrs = self.compressor.ncentrs(),
            ndims = self.strategy.ndims(),
            "experiment restored"
        );
        Ok(())
    }

    /// Write a JSON snapshot to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &self.snapshot())?;
        Ok(())
    }

    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<ExperimentSnapshot> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CompressorConfig, CompressorKind, LearningRate, OptimizerConfig, RunConfig,
    };
    use crate::evolution::OptimizerKind;
    use crate::kernel::SimilarityMeasure;
    use crate::rollout::testing::ScriptedEnv;
    use crate::rollout::{EvaluationMode, Termination};

    fn config(mode: EvaluationMode) -> ExperimentConfig {
        ExperimentConfig {
            run: RunConfig {
                max_steps: 6,
                skip_frames: 1,
                evaluation: mode,
                workers: Some(3),
                random_seed: 11,
                ..Default::default()
            },
            opt: OptimizerConfig {
                kind: OptimizerKind::Bdnes,
                population_size: Some(6),
                ..Default::default()
            },
            compr: CompressorConfig {
                kind: CompressorKind::Growing {
                    initial_ncentrs: 3,
                    threshold: 0.8,
                    lrate: LearningRate::Constant { rate: 0.5 },
                },
                similarity: SimilarityMeasure::Mse,
                downsample: [2, 2],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn factory() -> EnvFactory {
        ScriptedEnv::new([4, 4, 1], 3, 20).factory()
    }

    #[test]
    fn test_construction_wires_dimensions() {
        let exp = UlerlExperiment::new(config(EvaluationMode::Parallel), factory()).unwrap();
        assert_eq!(exp.compressor().dims(), 4);
        assert_eq!(exp.controller().layout().ninputs(), 3);
        assert_eq!(exp.controller().layout().noutputs(), 3);
        assert_eq!(exp.strategy().ndims(), exp.controller().nweights());
        assert_eq!(exp.evaluator().bound_slots(), 0);
    }

    #[test]
    fn test_growth_three_to_four() {
        let mut exp = UlerlExperiment::new(config(EvaluationMode::Parallel), factory()).unwrap();
        exp.compressor
            .restore(CodebookSnapshot {
                dims: 4,
                prototypes: [0.0, 0.1, 0.2].iter().flat_map(|&v| [v; 4]).collect(),
                usage: vec![1, 1, 1],
                rounds: 0,
            })
            .unwrap();
        exp.compressor.enqueue(&[255.0; 4]).unwrap();

        let ndims = exp.strategy().ndims();
        let (train, resize) = exp.train_and_adapt().unwrap();

        assert_eq!(train.grew_by(), 1);
        assert_eq!(exp.compressor().ncentrs(), 4);
        assert_eq!(exp.controller().layout().ninputs(), 4);
        let resize = resize.unwrap();
        assert_eq!(resize.inserted, 3);
        assert_eq!(exp.strategy().ndims(), ndims + 3);
        assert!(check_consistency(exp.controller(), exp.strategy()).is_ok());
        assert_eq!(exp.compressor().encode(&[7.0; 4]).unwrap().len(), 4);

        // The grown network runs a full generation.
        let stats = exp.run_generation().unwrap();
        assert!(stats.ncentrs >= 4);
        assert_eq!(stats.ndims, exp.controller().nweights());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut par = UlerlExperiment::new(config(EvaluationMode::Parallel), factory()).unwrap();
        let mut seq = UlerlExperiment::new(config(EvaluationMode::SequentialMulti), factory()).unwrap();
        let a = par.run(3).unwrap();
        let b = seq.run(3).unwrap();

        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.best_fitness, y.best_fitness);
            assert_eq!(x.mean_fitness, y.mean_fitness);
            assert_eq!(x.ncentrs, y.ncentrs);
        }
        assert_eq!(par.strategy().mean(), seq.strategy().mean());
        assert_eq!(par.compressor().snapshot(), seq.compressor().snapshot());
    }

    #[test]
    fn test_buffer_empty_after_generation() {
        let mut exp = UlerlExperiment::new(config(EvaluationMode::SequentialSingle), factory()).unwrap();
        let stats = exp.run_generation().unwrap();
        assert_eq!(stats.train.samples, 6);
        assert!(exp.compressor().train_set().is_empty());
        assert!(stats.ncentrs >= 3);
    }

    #[test]
    fn test_target_fitness_stops_run() {
        let mut cfg = config(EvaluationMode::SequentialSingle);
        cfg.run.target_fitness = Some(0.0);
        let mut exp = UlerlExperiment::new(cfg, factory()).unwrap();
        assert_eq!(exp.run(5).unwrap().len(), 1);
    }

    #[test]
    fn test_evaluate_best() {
        let mut exp = UlerlExperiment::new(config(EvaluationMode::SequentialSingle), factory()).unwrap();
        assert!(exp.evaluate_best(false, false).unwrap().is_none());

        exp.run(1).unwrap();
        let short = exp.evaluate_best(false, false).unwrap().unwrap();
        assert_eq!(short.steps, 6);
        assert_eq!(short.termination, Termination::Truncated);

        let long = exp.evaluate_best(true, true).unwrap().unwrap();
        assert_eq!(long.termination, Termination::Terminated);
        assert_eq!(long.steps, 10);
        assert!(exp.compressor().train_set().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut exp = UlerlExperiment::new(config(EvaluationMode::Parallel), factory()).unwrap();
        exp.run(2).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        exp.save(&path).unwrap();

        let mut resumed =
            UlerlExperiment::resume(config(EvaluationMode::Parallel), factory(), &path).unwrap();
        assert_eq!(resumed.generation(), 2);
        assert_eq!(resumed.compressor().snapshot(), exp.compressor().snapshot());
        assert_eq!(resumed.controller().weights(), exp.controller().weights());

        let a = exp.run_generation().unwrap();
        let b = resumed.run_generation().unwrap();
        assert_eq!(a.mean_fitness, b.mean_fitness);
        assert_eq!(exp.strategy().mean(), resumed.strategy().mean());
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let mut exp = UlerlExperiment::new(config(EvaluationMode::Parallel), factory()).unwrap();
        let mut snap = exp.snapshot();
        snap.controller_weights.push(0.0);
        assert!(matches!(
            exp.restore(snap),
            Err(UlerlError::ResizeInconsistency { .. })
        ));

        let mut snap = exp.snapshot();
        snap.strategy.mean.pop();
        assert!(matches!(
            exp.restore(snap),
            Err(UlerlError::ResizeInconsistency { .. })
        ));
    }
}
