//! Parallel Evaluator: one fitness per genotype, plus the merge of every
//! rollout's representative observation into the compressor.
//!
//! Rollouts share the compressor read-only. Each returns its
//! `(fitness, representative)` pair; once every rollout of the batch has
//! finished, the representatives are enqueued into the compressor in
//! genotype order. `evaluate` borrows the compressor mutably for the
//! whole call, so nothing else can train it while rollouts are in flight.

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CompressorConfig, EnvConfig};
use crate::error::{Result, UlerlError};
use crate::kernel::Controller;
use crate::memory::Compressor;

use super::engine::{RolloutEngine, RolloutOutcome, RolloutSettings};
use super::environment::{EnvBinding, EnvFactory};

/// Where rollouts run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// One after the other on the single shared environment
    SequentialSingle,
    /// One after the other, one environment per population slot
    SequentialMulti,
    /// Worker pool, one environment per worker
    #[default]
    Parallel,
}

/// What a diverged rollout costs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergencePolicy {
    /// Worst possible fitness; the run goes on
    #[default]
    Sentinel,
    /// The divergence ends the run
    Strict,
}

impl DivergencePolicy {
    /// Fitness assigned to a diverged rollout.
    pub fn sentinel(self) -> f64 {
        f64::NEG_INFINITY
    }
}

/// Fitnesses of one batch, in genotype order.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub outcomes: Vec<RolloutOutcome>,
}

impl Evaluation {
    pub fn fitnesses(&self) -> Vec<f64> {
        self.outcomes.iter().map(|o| o.fitness).collect()
    }

    pub fn diverged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.termination == super::engine::Termination::Diverged)
            .count()
    }
}

type Slot = Mutex<Option<EnvBinding>>;

/// Evaluates populations under one [`EvaluationMode`].
///
/// Holds the single shared environment plus lazily created per-slot
/// bindings, which live for the whole run.
pub struct ParallelEvaluator {
    mode: EvaluationMode,
    factory: EnvFactory,
    env_config: EnvConfig,
    compr_config: CompressorConfig,
    single: EnvBinding,
    slots: Vec<Slot>,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for ParallelEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelEvaluator")
            .field("mode", &self.mode)
            .field("slots", &self.slots.len())
            .field("bound", &self.bound_slots())
            .finish()
    }
}

impl ParallelEvaluator {
    /// `single` is the already bound shared environment. Parallel mode
    /// spins up a pool of `workers` threads.
    pub fn new(
        mode: EvaluationMode,
        workers: usize,
        factory: EnvFactory,
        env_config: EnvConfig,
        compr_config: CompressorConfig,
        single: EnvBinding,
    ) -> Result<Self> {
        let (slots, pool) = match mode {
            EvaluationMode::SequentialSingle | EvaluationMode::SequentialMulti => (Vec::new(), None),
            EvaluationMode::Parallel => {
                let workers = workers.max(1);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("ulerl-worker-{}", i))
                    .build()
                    .map_err(|e| UlerlError::Config(format!("worker pool: {}", e)))?;
                let slots = (0..workers).map(|_| Mutex::new(None)).collect();
                (slots, Some(pool))
            }
        };
        debug!(?mode, slots = slots.len(), "evaluator ready");
        Ok(Self {
            mode,
            factory,
            env_config,
            compr_config,
            single,
            slots,
            pool,
        })
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    /// The shared environment.
    pub fn single(&self) -> &EnvBinding {
        &self.single
    }

    /// Slots whose environment has been created so far.
    pub fn bound_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.lock().is_some()).count()
    }

    /// Evaluate `genotypes` and merge their representatives into `compressor`.
    ///
    /// A fatal error in any rollout is returned after the batch finishes;
    /// nothing is enqueued in that case.
    pub fn evaluate(
        &mut self,
        genotypes: &[Vec<f64>],
        template: &Controller,
        compressor: &mut Compressor,
        settings: &RolloutSettings,
    ) -> Result<Evaluation> {
        let engine = RolloutEngine::new(compressor, *settings);

        let results: Vec<Result<RolloutOutcome>> = match self.mode {
            EvaluationMode::SequentialSingle => {
                let single = &mut self.single;
                genotypes
                    .iter()
                    .map(|g| engine.run(&mut template.clone(), g, single))
                    .collect()
            }
            EvaluationMode::SequentialMulti => {
                while self.slots.len() < genotypes.len() {
                    self.slots.push(Mutex::new(None));
                }
                genotypes
                    .iter()
                    .enumerate()
                    .map(|(i, g)| {
                        Self::run_in_slot(
                            &self.slots[i],
                            i,
                            &self.factory,
                            &self.env_config,
                            &self.compr_config,
                            &engine,
                            template,
                            g,
                        )
                    })
                    .collect()
            }
            EvaluationMode::Parallel => {
                let pool = self
                    .pool
                    .as_ref()
                    .ok_or_else(|| UlerlError::Config("parallel evaluator without a pool".into()))?;
                let slots = &self.slots;
                let factory = &self.factory;
                let env_config = &self.env_config;
                let compr_config = &self.compr_config;
                let engine = &engine;
                pool.install(|| {
                    genotypes
                        .par_iter()
                        .map(|g| {
                            let slot = rayon::current_thread_index().unwrap_or(0) % slots.len();
                            Self::run_in_slot(
                                &slots[slot],
                                slot,
                                factory,
                                env_config,
                                compr_config,
                                engine,
                                template,
                                g,
                            )
                        })
                        .collect()
                })
            }
        };

        // The first error in genotype order wins; no sample is merged.
        let outcomes = results.into_iter().collect::<Result<Vec<_>>>()?;

        for outcome in &outcomes {
            if let Some(rep) = &outcome.representative {
                compressor.enqueue(&rep.observation)?;
            }
        }
        Ok(Evaluation { outcomes })
    }

    /// One episode on the shared environment, without touching the
    /// compressor's training buffer.
    pub fn evaluate_single(
        &mut self,
        genotype: &[f64],
        template: &Controller,
        engine: &RolloutEngine<'_>,
    ) -> Result<RolloutOutcome> {
        engine.run(&mut template.clone(), genotype, &mut self.single)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_in_slot(
        slot: &Slot,
        index: usize,
        factory: &EnvFactory,
        env_config: &EnvConfig,
        compr_config: &CompressorConfig,
        engine: &RolloutEngine<'_>,
        template: &Controller,
        genotype: &[f64],
    ) -> Result<RolloutOutcome> {
        let mut guard = slot.lock();
        if guard.is_none() {
            let binding = EnvBinding::from_factory(factory, env_config, compr_config)?;
            info!(slot = index, "environment binding created");
            *guard = Some(binding);
        }
        match guard.as_mut() {
            Some(binding) => engine.run(&mut template.clone(), genotype, binding),
            None => Err(UlerlError::Environment(format!("slot {} has no environment", index))),
        }
    }
}
